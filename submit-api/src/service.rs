use crate::bigquery::{InsertError, RowError, RowFailure, TableInserter, TableRef};
use crate::errors::{SubmitApiError, SubmitError};
use crate::metrics_defs::{REQUEST_DURATION, ROWS_INSERTED, ROWS_REJECTED, SUBMISSIONS_RECEIVED};
use crate::normalizer::{InsertRow, NormalizeError, Normalizer};
use chrono::Utc;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderMap, HeaderValue,
};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use shared::http::{make_boxed_error_response, make_empty_response, make_text_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const SUBMIT_PATH: &str = "/submit";
pub const HEALTH_PATH: &str = "/health";

const SUCCESS_BODY: &str = "Data inserted successfully.";
const FAILURE_BODY: &str = "Insert failed";

pub type HandlerBody = BoxBody<Bytes, SubmitApiError>;

enum Route {
    Preflight,
    Submit,
    Health,
    MethodNotAllowed,
    NotFound,
}

impl Route {
    fn of(method: &Method, path: &str) -> Self {
        match (method, path) {
            (&Method::OPTIONS, _) => Route::Preflight,
            (&Method::POST, SUBMIT_PATH) => Route::Submit,
            (&Method::GET, HEALTH_PATH) => Route::Health,
            (_, SUBMIT_PATH) => Route::MethodNotAllowed,
            _ => Route::NotFound,
        }
    }
}

struct Inner {
    inserter: Arc<dyn TableInserter>,
    normalizer: Box<dyn Normalizer>,
    table: TableRef,
    max_body_bytes: usize,
}

/// Accepts client submissions and writes them to the configured table.
///
/// Requests share nothing but read-only handles, so any number may be in
/// flight at once.
#[derive(Clone)]
pub struct SubmitService {
    inner: Arc<Inner>,
}

impl SubmitService {
    pub fn new(
        inserter: Arc<dyn TableInserter>,
        normalizer: Box<dyn Normalizer>,
        table: TableRef,
        max_body_bytes: usize,
    ) -> Self {
        SubmitService {
            inner: Arc::new(Inner {
                inserter,
                normalizer,
                table,
                max_body_bytes,
            }),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<HandlerBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();

        let mut response = match Route::of(req.method(), req.uri().path()) {
            Route::Preflight => make_empty_response(StatusCode::NO_CONTENT),
            Route::Submit => self.submit(req).await,
            Route::Health => make_text_response(StatusCode::OK, "ok\n"),
            Route::MethodNotAllowed => make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED),
            Route::NotFound => make_boxed_error_response(StatusCode::NOT_FOUND),
        };
        add_cors_headers(response.headers_mut());

        shared::histogram!(REQUEST_DURATION, "status" => response.status().as_u16().to_string())
            .record(started.elapsed().as_secs_f64());

        response
    }

    async fn submit<B>(&self, req: Request<B>) -> Response<HandlerBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        shared::counter!(SUBMISSIONS_RECEIVED).increment(1);

        let outcome = match read_json(req.into_body(), self.inner.max_body_bytes).await {
            Ok(payload) => {
                // Detached from the connection so a caller hanging up cannot cancel the insert.
                let service = self.clone();
                tokio::spawn(async move { service.store(payload).await })
                    .await
                    .unwrap_or_else(|err| Err(SubmitError::Task(err)))
            }
            Err(err) => {
                tracing::warn!(error = %err, "rejected submission");
                Err(err)
            }
        };

        match outcome {
            Ok(_) => make_text_response(StatusCode::OK, SUCCESS_BODY),
            Err(err) if err.status() == StatusCode::INTERNAL_SERVER_ERROR => {
                make_text_response(err.status(), FAILURE_BODY)
            }
            Err(err) => make_boxed_error_response(err.status()),
        }
    }

    /// Normalizes and inserts one parsed submission, logging the outcome.
    async fn store(&self, payload: serde_json::Value) -> Result<usize, SubmitError> {
        let table = &self.inner.table;
        let result = self.try_store(payload).await;

        match &result {
            Ok(rows) => {
                shared::counter!(ROWS_INSERTED).increment(*rows as u64);
                tracing::info!(rows = *rows, %table, "insert succeeded");
            }
            Err(err @ SubmitError::Insertion(InsertError::PartialFailure { .. })) => {
                tracing::error!(error = %err, %table, "partial insert failure")
            }
            Err(err) => tracing::error!(error = %err, %table, "submission failed"),
        }

        result
    }

    async fn try_store(&self, payload: serde_json::Value) -> Result<usize, SubmitError> {
        tracing::info!(%payload, normalizer = self.inner.normalizer.name(), "received submission");

        let rows = self.normalize(payload)?;
        tracing::debug!(rows = ?rows, "normalized submission");

        if let Err(err) = self.inner.inserter.insert(&self.inner.table, &rows).await {
            if let InsertError::PartialFailure { failures, .. } = &err {
                shared::counter!(ROWS_REJECTED).increment(failures.len() as u64);
                log_row_statuses(&rows, failures);
            }
            return Err(err.into());
        }

        Ok(rows.len())
    }

    fn normalize(&self, payload: serde_json::Value) -> Result<Vec<InsertRow>, NormalizeError> {
        self.inner
            .normalizer
            .normalize(payload, &mut rand::rng(), Utc::now())
    }
}

impl Service<Request<Incoming>> for SubmitService {
    type Response = Response<HandlerBody>;
    type Error = SubmitApiError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}

/// Reads the whole body, up to `limit` bytes, as JSON. An empty body counts as
/// an empty object.
async fn read_json<B>(body: B, limit: usize) -> Result<serde_json::Value, SubmitError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let bytes = Limited::new(body, limit)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                SubmitError::BodyTooLarge { limit }
            } else {
                SubmitError::RequestBody(e.to_string())
            }
        })?
        .to_bytes();

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Object(Default::default()));
    }

    serde_json::from_slice(&bytes).map_err(SubmitError::InvalidJson)
}

/// Logs the outcome of every row in a partially failed batch.
fn log_row_statuses(rows: &[InsertRow], failures: &[RowFailure]) {
    for (index, row) in rows.iter().enumerate() {
        match failures.iter().find(|f| f.index == index) {
            Some(failure) => {
                let reasons: Vec<String> = failure.errors.iter().map(describe_row_error).collect();
                tracing::error!(
                    index,
                    insert_id = %row.insert_id,
                    row = %row.json,
                    reasons = ?reasons,
                    "row rejected"
                );
            }
            None => tracing::info!(index, insert_id = %row.insert_id, "row accepted"),
        }
    }

    for failure in failures.iter().filter(|f| f.index >= rows.len()) {
        let reasons: Vec<String> = failure.errors.iter().map(describe_row_error).collect();
        tracing::error!(
            index = failure.index,
            batch_size = rows.len(),
            reasons = ?reasons,
            "rejection for row outside the batch"
        );
    }
}

fn describe_row_error(error: &RowError) -> String {
    format!("{}: {} ({})", error.reason, error.message, error.location)
}

fn add_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}
