use super::{InsertRow, NormalizeError, Normalizer, serialize_timestamp};
use crate::ident::generate_id;
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submission shape of the single-record deployment. Fields may hold any JSON.
#[derive(Debug, Default, Deserialize)]
pub struct SinglePayload {
    #[serde(default)]
    pub age: Option<Value>,
    #[serde(default)]
    pub gender: Option<Value>,
    #[serde(default)]
    pub preferences: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SingleRecord {
    pub user_id: String,
    pub name: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub dietary_style: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl SinglePayload {
    /// Keeps every field as its JSON text so nested or unexpected shapes
    /// survive unchanged.
    pub fn into_record<R: Rng + ?Sized>(self, rng: &mut R, now: DateTime<Utc>) -> SingleRecord {
        SingleRecord {
            user_id: generate_id(rng),
            name: None,
            age: self.age.map(|v| v.to_string()),
            gender: self.gender.map(|v| v.to_string()),
            dietary_style: self.preferences.map(|v| v.to_string()),
            created_at: now,
        }
    }
}

pub struct SingleRecordNormalizer;

impl Normalizer for SingleRecordNormalizer {
    fn name(&self) -> &'static str {
        "single_record"
    }

    fn normalize(
        &self,
        payload: Value,
        rng: &mut dyn RngCore,
        now: DateTime<Utc>,
    ) -> Result<Vec<InsertRow>, NormalizeError> {
        let payload: SinglePayload =
            serde_json::from_value(payload).map_err(NormalizeError::MalformedPayload)?;
        let record = payload.into_record(rng, now);

        Ok(vec![InsertRow::from_record(&record.user_id, &record)?])
    }
}
