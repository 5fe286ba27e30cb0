use crate::bigquery::InsertError;
use crate::config::ValidationError;
use crate::normalizer::NormalizeError;
use hyper::StatusCode;
use thiserror::Error;

/// Result type alias for submit-api operations
pub type Result<T, E = SubmitApiError> = std::result::Result<T, E>;

/// Errors that stop the service from starting or serving
#[derive(Error, Debug)]
pub enum SubmitApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failures while handling a single submission
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Request body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] NormalizeError),

    #[error("Insert failed: {0}")]
    Insertion(#[from] InsertError),

    #[error("Insert task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SubmitError {
    /// Status the client sees. Transformation and insertion failures are all
    /// collapsed into one generic server error.
    pub fn status(&self) -> StatusCode {
        match self {
            SubmitError::RequestBody(_) | SubmitError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            SubmitError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SubmitError::Transformation(_) | SubmitError::Insertion(_) | SubmitError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
