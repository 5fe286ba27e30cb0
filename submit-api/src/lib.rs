pub mod bigquery;
pub mod config;
pub mod errors;
pub mod ident;
pub mod metrics_defs;
pub mod normalizer;
pub mod service;

#[cfg(test)]
mod testutils;

use bigquery::BigQueryClient;
use service::SubmitService;
use shared::http::run_http_service;
use std::sync::Arc;

/// Runs the submission endpoint until the listener fails.
pub async fn run(config: config::Config) -> errors::Result<()> {
    config.validate()?;
    let table = config.table.resolve()?;

    // One client for the life of the process, shared by every request
    let inserter = Arc::new(BigQueryClient::new(&config.bigquery)?);
    let normalizer = config.strategy.normalizer();

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        normalizer = normalizer.name(),
        %table,
        "starting submit api"
    );

    let service = SubmitService::new(inserter, normalizer, table, config.max_body_bytes);
    run_http_service(&config.listener.host, config.listener.port, service).await
}
