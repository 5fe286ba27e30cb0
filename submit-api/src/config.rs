use crate::bigquery::TableRef;
use crate::normalizer::Strategy;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";
const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("No project configured, set table.project or GOOGLE_CLOUD_PROJECT")]
    MissingProject,

    #[error("Empty dataset name")]
    EmptyDataset,

    #[error("Empty table name")]
    EmptyTable,

    #[error("max_body_bytes cannot be 0")]
    InvalidBodyLimit,
}

/// Submit service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for client submissions
    #[serde(default)]
    pub listener: Listener,
    /// How submissions are turned into rows
    #[serde(default)]
    pub strategy: Strategy,
    /// Destination table
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub bigquery: BigQueryConfig,
    /// Largest accepted request body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            strategy: Strategy::default(),
            table: TableConfig::default(),
            bigquery: BigQueryConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Config {
    /// Applies deployment environment overrides.
    ///
    /// `PORT`, `BIGQUERY_DATASET` and `BIGQUERY_TABLE` replace configured
    /// values. `GOOGLE_CLOUD_PROJECT` only fills in a project that is not set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.listener.port = port
                .trim()
                .parse()
                .map_err(|_| ValidationError::InvalidEnv {
                    name: "PORT",
                    value: port.clone(),
                })?;
        }

        if self.table.project.is_none() {
            self.table.project = lookup("GOOGLE_CLOUD_PROJECT");
        }

        if let Some(dataset) = lookup("BIGQUERY_DATASET") {
            self.table.dataset = dataset;
        }

        if let Some(table) = lookup("BIGQUERY_TABLE") {
            self.table.table = table;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.table.resolve()?;

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TableConfig {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            project: None,
            dataset: default_dataset(),
            table: default_table(),
        }
    }
}

impl TableConfig {
    pub fn resolve(&self) -> Result<TableRef, ValidationError> {
        let project = match self.project.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => return Err(ValidationError::MissingProject),
        };
        if self.dataset.trim().is_empty() {
            return Err(ValidationError::EmptyDataset);
        }
        if self.table.trim().is_empty() {
            return Err(ValidationError::EmptyTable);
        }

        Ok(TableRef {
            project,
            dataset: self.dataset.trim().to_string(),
            table: self.table.trim().to_string(),
        })
    }
}

/// Analytical store client settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BigQueryConfig {
    /// API root, overridable for emulators
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Whole-request timeout. Unset leaves the HTTP client default (none).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub skip_invalid_rows: bool,
    #[serde(default)]
    pub ignore_unknown_values: bool,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        BigQueryConfig {
            endpoint: default_endpoint(),
            auth: AuthConfig::default(),
            timeout_secs: None,
            skip_invalid_rows: false,
            ignore_unknown_values: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    MetadataServer {
        #[serde(default = "default_metadata_url")]
        url: Url,
    },
    StaticToken {
        token: String,
    },
    None,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::MetadataServer {
            url: default_metadata_url(),
        }
    }
}

fn default_max_body_bytes() -> usize {
    100 * 1024
}

fn default_dataset() -> String {
    "meal_planner".into()
}

fn default_table() -> String {
    "Demo_Remake".into()
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL")
}

fn default_metadata_url() -> Url {
    Url::parse(DEFAULT_METADATA_TOKEN_URL).expect("default metadata URL is a valid URL")
}
