use crate::bigquery::{InsertError, RowError, RowFailure, TableInserter, TableRef};
use crate::normalizer::InsertRow;
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HTTP server answering every request with the same JSON response and
/// recording what it received.
pub struct MockServer {
    pub url: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub async fn start(status: StatusCode, body: serde_json::Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let body = Bytes::from(serde_json::to_vec(&body).unwrap());

        let recorded = requests.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let recorded = recorded.clone();
                let body = body.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let recorded = recorded.clone();
                        let body = body.clone();
                        async move {
                            let (parts, incoming) = req.into_parts();
                            let received = incoming
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();

                            recorded.lock().unwrap().push(RecordedRequest {
                                method: parts.method,
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body: received,
                            });

                            let mut response = Response::new(Full::new(body));
                            *response.status_mut() = status;
                            response
                                .headers_mut()
                                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockServer {
            url: Url::parse(&format!("http://127.0.0.1:{port}")).unwrap(),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub enum MockOutcome {
    Success,
    /// Rejects the rows at these batch positions
    PartialFailure(Vec<usize>),
    TotalFailure,
}

/// In-memory inserter that records every call.
pub struct MockInserter {
    outcome: MockOutcome,
    calls: Mutex<Vec<(TableRef, Vec<InsertRow>)>>,
}

impl MockInserter {
    pub fn new(outcome: MockOutcome) -> Self {
        MockInserter {
            outcome,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(TableRef, Vec<InsertRow>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TableInserter for MockInserter {
    async fn insert(&self, table: &TableRef, rows: &[InsertRow]) -> Result<(), InsertError> {
        self.calls
            .lock()
            .unwrap()
            .push((table.clone(), rows.to_vec()));

        match &self.outcome {
            MockOutcome::Success => Ok(()),
            MockOutcome::PartialFailure(indexes) => Err(InsertError::PartialFailure {
                total: rows.len(),
                failures: indexes
                    .iter()
                    .map(|&index| RowFailure {
                        index,
                        errors: vec![RowError {
                            reason: "invalid".into(),
                            location: "gender".into(),
                            message: "mock rejection".into(),
                        }],
                    })
                    .collect(),
            }),
            MockOutcome::TotalFailure => Err(InsertError::Rejected {
                status: 503,
                message: "mock outage".into(),
            }),
        }
    }
}

/// Log lines written by the subscriber installed with [`capture_logs`].
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_owned)
            .collect()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Routes this thread's INFO and above events into a buffer until the guard
/// is dropped.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    (buffer, tracing::subscriber::set_default(subscriber))
}
