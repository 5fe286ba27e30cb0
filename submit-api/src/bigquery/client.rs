use super::{Credentials, InsertError, RowFailure, TableInserter, TableRef};
use crate::config::BigQueryConfig;
use crate::normalizer::InsertRow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllRequest<'a> {
    kind: &'static str,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
    rows: &'a [InsertRow],
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowFailure>,
}

// Google API error envelope: {"error": {"code": 403, "message": "..."}}
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// `tabledata.insertAll` over HTTP.
///
/// Built once at startup and shared across requests; holds no mutable state.
pub struct BigQueryClient {
    client: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
    skip_invalid_rows: bool,
    ignore_unknown_values: bool,
}

impl BigQueryClient {
    pub fn new(config: &BigQueryConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(BigQueryClient {
            client: builder.build()?,
            endpoint: config.endpoint.clone(),
            credentials: Credentials::from(&config.auth),
            skip_invalid_rows: config.skip_invalid_rows,
            ignore_unknown_values: config.ignore_unknown_values,
        })
    }

    fn insert_url(&self, table: &TableRef) -> Result<Url, InsertError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| InsertError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "bigquery",
                "v2",
                "projects",
                table.project.as_str(),
                "datasets",
                table.dataset.as_str(),
                "tables",
                table.table.as_str(),
                "insertAll",
            ]);
        Ok(url)
    }
}

#[async_trait]
impl TableInserter for BigQueryClient {
    async fn insert(&self, table: &TableRef, rows: &[InsertRow]) -> Result<(), InsertError> {
        let url = self.insert_url(table)?;
        let body = InsertAllRequest {
            kind: "bigquery#tableDataInsertAllRequest",
            skip_invalid_rows: self.skip_invalid_rows,
            ignore_unknown_values: self.ignore_unknown_values,
            rows,
        };

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = self.credentials.bearer_token(&self.client).await? {
            request = request.bearer_auth(token);
        }

        tracing::debug!(%table, rows = rows.len(), "sending insertAll");
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            return Err(InsertError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let result = response.json::<InsertAllResponse>().await?;
        if result.insert_errors.is_empty() {
            Ok(())
        } else {
            Err(InsertError::PartialFailure {
                total: rows.len(),
                failures: result.insert_errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::testutils::MockServer;
    use hyper::StatusCode;
    use serde_json::{Value, json};

    fn table() -> TableRef {
        TableRef {
            project: "test-project".into(),
            dataset: "meal_planner".into(),
            table: "Demo_Remake".into(),
        }
    }

    fn rows(n: usize) -> Vec<InsertRow> {
        (0..n)
            .map(|i| InsertRow {
                insert_id: format!("id{i}"),
                json: json!({"user_id": format!("id{i}"), "gender": "F"}),
            })
            .collect()
    }

    fn client_for(endpoint: &Url, auth: AuthConfig) -> BigQueryClient {
        let config = BigQueryConfig {
            endpoint: endpoint.clone(),
            auth,
            timeout_secs: Some(5),
            skip_invalid_rows: false,
            ignore_unknown_values: true,
        };
        BigQueryClient::new(&config).unwrap()
    }

    #[test]
    fn test_insert_url() {
        let endpoint = Url::parse("https://bigquery.googleapis.com").unwrap();
        let client = client_for(&endpoint, AuthConfig::None);
        assert_eq!(
            client.insert_url(&table()).unwrap().as_str(),
            "https://bigquery.googleapis.com/bigquery/v2/projects/test-project/datasets/meal_planner/tables/Demo_Remake/insertAll"
        );

        // A base path on the endpoint is kept
        let endpoint = Url::parse("http://localhost:9050/emulator/").unwrap();
        let client = client_for(&endpoint, AuthConfig::None);
        assert_eq!(
            client.insert_url(&table()).unwrap().as_str(),
            "http://localhost:9050/emulator/bigquery/v2/projects/test-project/datasets/meal_planner/tables/Demo_Remake/insertAll"
        );
    }

    #[tokio::test]
    async fn test_insert_success() {
        let server = MockServer::start(
            StatusCode::OK,
            json!({"kind": "bigquery#tableDataInsertAllResponse"}),
        )
        .await;
        let client = client_for(
            &server.url,
            AuthConfig::StaticToken {
                token: "tok".into(),
            },
        );

        client.insert(&table(), &rows(2)).await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, hyper::Method::POST);
        assert_eq!(
            request.path,
            "/bigquery/v2/projects/test-project/datasets/meal_planner/tables/Demo_Remake/insertAll"
        );
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer tok");

        let body: Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["kind"], json!("bigquery#tableDataInsertAllRequest"));
        assert_eq!(body["skipInvalidRows"], json!(false));
        assert_eq!(body["ignoreUnknownValues"], json!(true));
        assert_eq!(body["rows"].as_array().unwrap().len(), 2);
        assert_eq!(body["rows"][1]["insertId"], json!("id1"));
        assert_eq!(body["rows"][1]["json"]["user_id"], json!("id1"));
    }

    #[tokio::test]
    async fn test_insert_partial_failure() {
        let server = MockServer::start(
            StatusCode::OK,
            json!({
                "kind": "bigquery#tableDataInsertAllResponse",
                "insertErrors": [
                    {"index": 2, "errors": [{"reason": "invalid", "location": "age", "message": "Cannot convert value to integer."}]}
                ]
            }),
        )
        .await;
        let client = client_for(&server.url, AuthConfig::None);

        let err = client.insert(&table(), &rows(3)).await.unwrap_err();
        match err {
            InsertError::PartialFailure { total, failures } => {
                assert_eq!(total, 3);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 2);
                assert_eq!(failures[0].errors[0].reason, "invalid");
                assert_eq!(failures[0].errors[0].location, "age");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // No credentials configured, no header sent
        assert!(server.requests()[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_insert_rejected() {
        let server = MockServer::start(
            StatusCode::NOT_FOUND,
            json!({"error": {"code": 404, "message": "Not found: Table test-project:meal_planner.Demo_Remake", "status": "NOT_FOUND"}}),
        )
        .await;
        let client = client_for(&server.url, AuthConfig::None);

        let err = client.insert(&table(), &rows(1)).await.unwrap_err();
        match err {
            InsertError::Rejected { status, message } => {
                assert_eq!(status, 404);
                assert!(message.starts_with("Not found: Table"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_credentials_failure() {
        let metadata = MockServer::start(StatusCode::INTERNAL_SERVER_ERROR, json!({})).await;
        let bigquery = MockServer::start(StatusCode::OK, json!({})).await;
        let client = client_for(
            &bigquery.url,
            AuthConfig::MetadataServer {
                url: metadata.url.clone(),
            },
        );

        let err = client.insert(&table(), &rows(1)).await.unwrap_err();
        assert!(matches!(err, InsertError::Credentials(_)));
        assert!(bigquery.requests().is_empty());
    }

    #[tokio::test]
    async fn test_insert_unreachable() {
        // Nothing listens on the discard port
        let endpoint = Url::parse("http://127.0.0.1:9").unwrap();
        let client = client_for(&endpoint, AuthConfig::None);

        let err = client.insert(&table(), &rows(1)).await.unwrap_err();
        assert!(matches!(err, InsertError::Transport(_)));
    }
}
