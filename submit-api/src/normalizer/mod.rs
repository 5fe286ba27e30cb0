//! Turns a loosely structured client submission into flat rows for the
//! analytical store.
//!
//! Two strategies exist and a deployment picks exactly one of them through
//! configuration:
//!
//! - [`PerGenderNormalizer`] expands the submitted lists into one row per
//!   entry in `genders`.
//! - [`SingleRecordNormalizer`] stores the whole submission as one row, with
//!   each field kept as its raw JSON text.

mod per_gender;
mod single_record;

pub use per_gender::{PerGenderNormalizer, PerGenderPayload, PerGenderRecord};
pub use single_record::{SingleRecord, SingleRecordNormalizer, SinglePayload};

use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("malformed submission: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("preferences[{index}] is missing")]
    MissingPreferences { index: usize },

    #[error("preferences[{index}] is not a list")]
    PreferencesNotAList { index: usize },

    #[error("submission produced no records")]
    EmptySubmission,

    #[error("could not encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

/// One record as handed to the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRow {
    /// Best-effort dedup key for the store; same value as the record's `user_id`.
    pub insert_id: String,
    pub json: serde_json::Value,
}

impl InsertRow {
    pub fn from_record<T: Serialize>(
        insert_id: &str,
        record: &T,
    ) -> Result<Self, NormalizeError> {
        Ok(InsertRow {
            insert_id: insert_id.to_string(),
            json: serde_json::to_value(record).map_err(NormalizeError::Encode)?,
        })
    }
}

pub trait Normalizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Builds every row for one submission. `now` is the processing instant
    /// and becomes `created_at` on each row.
    fn normalize(
        &self,
        payload: serde_json::Value,
        rng: &mut dyn RngCore,
        now: DateTime<Utc>,
    ) -> Result<Vec<InsertRow>, NormalizeError>;
}

/// Deployment-time choice of normalizer.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    PerGender,
    SingleRecord,
}

impl Strategy {
    pub fn normalizer(self) -> Box<dyn Normalizer> {
        match self {
            Strategy::PerGender => Box::new(PerGenderNormalizer),
            Strategy::SingleRecord => Box::new(SingleRecordNormalizer),
        }
    }
}

// RFC 3339, millisecond precision, `Z` suffix.
fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Treats an explicit JSON `null` the same as an absent list.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}
