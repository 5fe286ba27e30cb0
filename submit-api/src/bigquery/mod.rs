//! Streaming inserts into an analytical table.
//!
//! [`TableInserter`] is the seam the request handler talks to. The production
//! implementation is [`BigQueryClient`], which calls the `tabledata.insertAll`
//! REST method once per request and never retries.

mod client;
mod credentials;

pub use client::BigQueryClient;
pub use credentials::Credentials;

use crate::normalizer::InsertRow;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Fully qualified destination table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// One reason the store gave for rejecting a row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct RowError {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub message: String,
}

/// A rejected row, identified by its position in the submitted batch.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RowFailure {
    pub index: usize,
    #[serde(default)]
    pub errors: Vec<RowError>,
}

#[derive(Error, Debug)]
pub enum InsertError {
    /// The call went through but some rows were rejected.
    #[error("{} of {total} rows rejected", .failures.len())]
    PartialFailure {
        total: usize,
        failures: Vec<RowFailure>,
    },

    #[error("insert request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("insert rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("could not obtain credentials: {0}")]
    Credentials(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

#[async_trait]
pub trait TableInserter: Send + Sync {
    /// Inserts `rows` into `table` in a single attempt.
    async fn insert(&self, table: &TableRef, rows: &[InsertRow]) -> Result<(), InsertError>;
}
