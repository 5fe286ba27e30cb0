use super::{InsertRow, NormalizeError, Normalizer, null_as_empty, serialize_timestamp};
use crate::ident::generate_id;
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submission shape sent by the questionnaire screen: parallel lists with one
/// entry per household member, plus two answers that apply to the whole
/// household.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerGenderPayload {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ages: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub genders: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub preferences: Vec<Value>,
    #[serde(default)]
    pub selected_cooking_time: Option<Value>,
    #[serde(default)]
    pub today_feeling: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PerGenderRecord {
    pub user_id: String,
    /// Reserved column, never filled by current clients.
    pub name: Option<String>,
    pub age: Option<Value>,
    pub gender: Value,
    pub dietary_style: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: DateTime<Utc>,
    pub cooking_time: Option<Value>,
    pub feeling: Option<Value>,
}

impl PerGenderPayload {
    /// One record per entry in `genders`, in submission order.
    ///
    /// `ages` shorter than `genders` leaves the trailing ages null. Every index
    /// must have a list of tags in `preferences`.
    pub fn expand<R: Rng + ?Sized>(
        self,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Vec<PerGenderRecord>, NormalizeError> {
        let PerGenderPayload {
            ages,
            genders,
            preferences,
            selected_cooking_time,
            today_feeling,
        } = self;

        genders
            .into_iter()
            .enumerate()
            .map(|(index, gender)| {
                let dietary_style = match preferences.get(index) {
                    Some(Value::Array(tags)) => join_tags(tags),
                    Some(_) => return Err(NormalizeError::PreferencesNotAList { index }),
                    None => return Err(NormalizeError::MissingPreferences { index }),
                };

                Ok(PerGenderRecord {
                    user_id: generate_id(&mut *rng),
                    name: None,
                    age: ages.get(index).filter(|age| !age.is_null()).cloned(),
                    gender,
                    dietary_style,
                    created_at: now,
                    cooking_time: selected_cooking_time.clone(),
                    feeling: today_feeling.clone(),
                })
            })
            .collect()
    }
}

fn join_tags(tags: &[Value]) -> String {
    tags.iter()
        .map(|tag| match tag {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

pub struct PerGenderNormalizer;

impl Normalizer for PerGenderNormalizer {
    fn name(&self) -> &'static str {
        "per_gender"
    }

    fn normalize(
        &self,
        payload: Value,
        rng: &mut dyn RngCore,
        now: DateTime<Utc>,
    ) -> Result<Vec<InsertRow>, NormalizeError> {
        let payload: PerGenderPayload =
            serde_json::from_value(payload).map_err(NormalizeError::MalformedPayload)?;

        let records = payload.expand(rng, now)?;
        if records.is_empty() {
            return Err(NormalizeError::EmptySubmission);
        }

        records
            .iter()
            .map(|record| InsertRow::from_record(&record.user_id, record))
            .collect()
    }
}
