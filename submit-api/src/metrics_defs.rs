use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const SUBMISSIONS_RECEIVED: MetricDef = MetricDef {
    name: "submissions.received",
    metric_type: MetricType::Counter,
    description: "Number of POST /submit requests",
};

pub const ROWS_INSERTED: MetricDef = MetricDef {
    name: "rows.inserted",
    metric_type: MetricType::Counter,
    description: "Rows accepted by the analytical store",
};

pub const ROWS_REJECTED: MetricDef = MetricDef {
    name: "rows.rejected",
    metric_type: MetricType::Counter,
    description: "Rows the analytical store reported as rejected in a partial failure",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    SUBMISSIONS_RECEIVED,
    ROWS_INSERTED,
    ROWS_REJECTED,
];
