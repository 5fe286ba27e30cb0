use super::InsertError;
use crate::config::AuthConfig;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::fmt;
use url::Url;

const METADATA_FLAVOR: &str = "Metadata-Flavor";

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// Where the bearer token for each insert comes from.
#[derive(Clone)]
pub enum Credentials {
    /// Service account of the instance the process runs on. Looked up once
    /// per insert; the metadata server handles caching and refresh.
    MetadataServer { url: Url },
    StaticToken(String),
    /// No `Authorization` header, for local emulators.
    None,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::MetadataServer { url } => {
                f.debug_struct("MetadataServer").field("url", &url.as_str()).finish()
            }
            Credentials::StaticToken(_) => f.write_str("StaticToken(<redacted>)"),
            Credentials::None => f.write_str("None"),
        }
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(config: &AuthConfig) -> Self {
        match config {
            AuthConfig::MetadataServer { url } => Credentials::MetadataServer { url: url.clone() },
            AuthConfig::StaticToken { token } => Credentials::StaticToken(token.clone()),
            AuthConfig::None => Credentials::None,
        }
    }
}

impl Credentials {
    pub async fn bearer_token(
        &self,
        client: &reqwest::Client,
    ) -> Result<Option<String>, InsertError> {
        match self {
            Credentials::MetadataServer { url } => {
                let response = client
                    .get(url.clone())
                    .header(METADATA_FLAVOR, HeaderValue::from_static("Google"))
                    .send()
                    .await
                    .map_err(|e| InsertError::Credentials(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(InsertError::Credentials(format!(
                        "metadata server returned {}",
                        response.status()
                    )));
                }

                let token = response
                    .json::<MetadataToken>()
                    .await
                    .map_err(|e| InsertError::Credentials(e.to_string()))?;
                Ok(Some(token.access_token))
            }
            Credentials::StaticToken(token) => Ok(Some(token.clone())),
            Credentials::None => Ok(None),
        }
    }
}
