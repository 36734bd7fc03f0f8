//! Firestore REST client.
//!
//! Implements [`DocumentStore`] against the Firestore v1 REST API:
//! `GET documents/{path}`, `POST documents:runQuery` and
//! `POST documents:commit`. Every write goes through `commit`, so single
//! writes and batches share precondition handling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::value::{decode_fields, encode, encode_fields, field_path};
use crate::{
    CommitInfo, DocRef, Document, DocumentStore, Precondition, Predicate, Query,
    STORE_BATCH_LIMIT, StoreError, WriteBatch, WriteMode, WriteOp,
};

/// Public Firestore REST endpoint.
pub const DEFAULT_FIRESTORE_URL: &str = "https://firestore.googleapis.com/v1";

/// Where the Firestore database lives.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    /// REST root, e.g. [`DEFAULT_FIRESTORE_URL`] or an emulator's `http://localhost:8080/v1`.
    pub base_url: String,
    pub project_id: String,
    pub database: String,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Delay before the first retry; doubled for each later one.
    pub retry_backoff: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_FIRESTORE_URL.to_string(),
            project_id: project_id.into(),
            database: "(default)".to_string(),
            request_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Which failures a request may be re-sent after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryPolicy {
    /// Reads: any transient failure.
    Transient,
    /// Writes: only failures where the backend never applied the request.
    Unapplied,
}

impl RetryPolicy {
    fn allows(self, error: &StoreError) -> bool {
        match self {
            RetryPolicy::Transient => error.is_transient(),
            RetryPolicy::Unapplied => error.is_unapplied(),
        }
    }
}

/// A document as returned by the REST API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    name: String,
    #[serde(default)]
    fields: Option<Value>,
    #[serde(default)]
    update_time: Option<String>,
}

/// One element of a `runQuery` response stream.
#[derive(Debug, Deserialize)]
struct RunQueryItem {
    #[serde(default)]
    document: Option<RawDocument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    write_results: Vec<Value>,
    #[serde(default)]
    commit_time: Option<String>,
}

/// Error envelope returned by Google APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Client for a Firestore database.
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    token: Arc<RwLock<Option<String>>>,
}

impl FirestoreClient {
    /// Create a new client for the given database.
    pub fn new(config: FirestoreConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Authorize subsequent requests with a bearer token.
    ///
    /// Accepts either a user's ID token from the identity provider or a
    /// service OAuth access token.
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn database_path(&self) -> String {
        format!(
            "projects/{}/databases/{}",
            self.config.project_id, self.config.database
        )
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database_path())
    }

    fn document_name(&self, reference: &DocRef) -> String {
        format!(
            "{}/{}/{}",
            self.documents_root(),
            reference.collection,
            reference.id
        )
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.config.base_url, resource)
    }

    fn parse_document(&self, raw: RawDocument) -> Result<Document, StoreError> {
        let prefix = format!("{}/", self.documents_root());
        let path = raw.name.strip_prefix(&prefix).ok_or_else(|| {
            StoreError::InvalidResponse(format!("document outside database: {}", raw.name))
        })?;
        let reference =
            DocRef::parse(path).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        let fields = match raw.fields {
            Some(fields) => decode_fields(&fields)?,
            None => Default::default(),
        };

        Ok(Document {
            reference,
            fields,
            version: raw.update_time,
        })
    }

    fn encode_filter(predicate: &Predicate) -> Value {
        match predicate {
            Predicate::Eq { field, value } => json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(field) },
                    "op": "EQUAL",
                    "value": encode(value),
                }
            }),
            Predicate::In { field, values } => json!({
                "fieldFilter": {
                    "field": { "fieldPath": field_path(field) },
                    "op": "IN",
                    "value": encode(&Value::Array(values.clone())),
                }
            }),
        }
    }

    fn encode_query(query: &Query) -> Value {
        let mut structured = json!({
            "from": [{ "collectionId": query.collection }],
        });

        let filter = match query.predicates.as_slice() {
            [] => None,
            [single] => Some(Self::encode_filter(single)),
            many => Some(json!({
                "compositeFilter": {
                    "op": "AND",
                    "filters": many.iter().map(Self::encode_filter).collect::<Vec<_>>(),
                }
            })),
        };
        if let Some(filter) = filter {
            structured["where"] = filter;
        }

        json!({ "structuredQuery": structured })
    }

    fn encode_precondition(precondition: &Precondition) -> Option<Value> {
        match precondition {
            Precondition::None => None,
            Precondition::Missing => Some(json!({ "exists": false })),
            Precondition::Exists => Some(json!({ "exists": true })),
            Precondition::Version(update_time) => Some(json!({ "updateTime": update_time })),
        }
    }

    fn encode_write(&self, op: &WriteOp) -> Value {
        let (reference, fields, mask, precondition) = match op {
            WriteOp::Set {
                reference,
                fields,
                mode,
                precondition,
            } => (
                reference,
                fields,
                *mode == WriteMode::Merge,
                Self::encode_precondition(precondition),
            ),
            WriteOp::Update { reference, fields } => (
                reference,
                fields,
                true,
                Self::encode_precondition(&Precondition::Exists),
            ),
        };

        let mut write = json!({
            "update": {
                "name": self.document_name(reference),
                "fields": encode_fields(fields),
            }
        });
        if mask {
            let paths: Vec<String> = fields.keys().map(|k| field_path(k)).collect();
            write["updateMask"] = json!({ "fieldPaths": paths });
        }
        if let Some(precondition) = precondition {
            write["currentDocument"] = precondition;
        }
        write
    }

    /// Send a request, retrying the failures `policy` allows.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        policy: RetryPolicy,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, StoreError> {
        // Retry up to 4 times: initial + 3 retries with backoff
        let mut last_error = None;
        for attempt in 0..4 {
            let mut request = build();
            if let Some(token) = self.token.read().await.as_ref() {
                request = request.bearer_auth(token);
            }

            let result = match request.send().await {
                Ok(response) => Self::handle_response(response).await,
                Err(e) => Err(StoreError::Http(e)),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(e) if policy.allows(&e) && attempt < 3 => {
                    let backoff = self.config.retry_backoff * (1 << attempt); // 500ms, 1s, 2s by default
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        operation,
                        "transient store error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| StoreError::InvalidResponse("retry exhausted".into())))
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(StoreError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                StoreError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&text) {
                return Err(Self::classify(envelope.error));
            }

            return Err(StoreError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }

    fn classify(error: ErrorBody) -> StoreError {
        match error.status.as_str() {
            "FAILED_PRECONDITION" | "ALREADY_EXISTS" => StoreError::PreconditionFailed {
                path: String::new(),
                message: error.message,
            },
            "UNAUTHENTICATED" | "PERMISSION_DENIED" => StoreError::Unauthorized(error.message),
            "RESOURCE_EXHAUSTED" => StoreError::RateLimited {
                retry_after_secs: None,
            },
            _ => StoreError::Backend {
                status: error.status,
                message: error.message,
            },
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, reference: &DocRef) -> Result<Option<Document>, StoreError> {
        let url = self.url(&self.document_name(reference));

        match self
            .execute::<RawDocument>("get", RetryPolicy::Transient, || self.http.get(&url))
            .await
        {
            Ok(raw) => self.parse_document(raw).map(Some),
            Err(StoreError::Backend { status, .. }) if status == "NOT_FOUND" => {
                debug!(path = %reference, "document not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let url = self.url(&format!("{}:runQuery", self.documents_root()));
        let body = Self::encode_query(query);

        let items: Vec<RunQueryItem> = self
            .execute("query", RetryPolicy::Transient, || {
                self.http.post(&url).json(&body)
            })
            .await?;

        let mut documents = items
            .into_iter()
            .filter_map(|item| item.document)
            .map(|raw| self.parse_document(raw))
            .collect::<Result<Vec<_>, _>>()?;
        documents.sort_by(|a, b| a.reference.cmp(&b.reference));

        debug!(
            collection = %query.collection,
            count = documents.len(),
            "query complete"
        );
        Ok(documents)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitInfo, StoreError> {
        if batch.len() > STORE_BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                size: batch.len(),
                limit: STORE_BATCH_LIMIT,
            });
        }

        let url = self.url(&format!("{}:commit", self.documents_root()));
        let writes: Vec<Value> = batch.ops().iter().map(|op| self.encode_write(op)).collect();
        let body = json!({ "writes": writes });

        debug!(count = writes.len(), "committing batch");

        // A commit that timed out may have been applied; re-sending it would
        // then fail its own preconditions.
        let response: CommitResponse = self
            .execute("commit", RetryPolicy::Unapplied, || {
                self.http.post(&url).json(&body)
            })
            .await?;

        Ok(CommitInfo {
            writes: response.write_results.len(),
            commit_time: response.commit_time,
        })
    }

    async fn authorize(&self, token: &str) {
        self.set_token(token).await;
    }
}
