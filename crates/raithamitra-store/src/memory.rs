//! In-process document store.
//!
//! Implements the same atomicity and precondition rules as the hosted
//! backend. Used by tests (with fault injection and artificial latency) and
//! by the CLI to operate on JSON snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    CommitInfo, DocRef, Document, DocumentStore, Fields, Precondition, Query, STORE_BATCH_LIMIT,
    StoreError, WriteBatch, WriteMode, WriteOp,
};

/// Where an injected failure fires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// Reads of a single document in the collection.
    Get(String),
    /// Queries against the collection.
    Query(String),
    /// Every commit.
    Commit,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    fields: Fields,
    version: u64,
}

impl StoredDoc {
    fn to_document(&self, reference: &DocRef) -> Document {
        Document {
            reference: reference.clone(),
            fields: self.fields.clone(),
            version: Some(self.version.to_string()),
        }
    }
}

/// Thread-safe in-memory document store.
pub struct MemoryStore {
    docs: RwLock<BTreeMap<DocRef, StoredDoc>>,
    next_version: AtomicU64,
    faults: DashSet<FaultPoint>,
    batch_limit: usize,
    latency: Option<Duration>,
    commits: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            next_version: AtomicU64::new(1),
            faults: DashSet::new(),
            batch_limit: STORE_BATCH_LIMIT,
            latency: None,
            commits: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Override the per-commit operation limit.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Delay every operation, so concurrent callers interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make operations at `point` fail until cleared.
    pub fn inject_fault(&self, point: FaultPoint) {
        self.faults.insert(point);
    }

    pub fn clear_fault(&self, point: &FaultPoint) {
        self.faults.remove(point);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of operations applied by successful commits.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert or replace a document directly, bypassing faults and counters.
    pub async fn insert(&self, reference: DocRef, fields: Fields) {
        let version = self.bump_version();
        self.docs
            .write()
            .await
            .insert(reference, StoredDoc { fields, version });
    }

    /// All documents of a collection, ordered by id.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.docs
            .read()
            .await
            .iter()
            .filter(|(reference, _)| reference.collection == collection)
            .map(|(reference, doc)| doc.to_document(reference))
            .collect()
    }

    /// Build a store from a snapshot of the form `{collection: {id: fields}}`.
    pub async fn from_snapshot(snapshot: &Value) -> Result<Self, StoreError> {
        let store = Self::new();
        let collections = snapshot.as_object().ok_or_else(|| {
            StoreError::InvalidResponse("snapshot must be a JSON object".to_string())
        })?;

        for (collection, documents) in collections {
            let documents = documents.as_object().ok_or_else(|| {
                StoreError::InvalidResponse(format!("collection {} must be an object", collection))
            })?;
            for (id, fields) in documents {
                let fields = fields.as_object().cloned().ok_or_else(|| {
                    StoreError::InvalidResponse(format!(
                        "document {}/{} must be an object",
                        collection, id
                    ))
                })?;
                store.insert(DocRef::new(collection, id), fields).await;
            }
        }

        Ok(store)
    }

    /// Snapshot every document as `{collection: {id: fields}}`.
    pub async fn snapshot(&self) -> Value {
        let mut collections = serde_json::Map::new();
        for (reference, doc) in self.docs.read().await.iter() {
            let entry = collections
                .entry(reference.collection.clone())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Value::Object(documents) = entry {
                documents.insert(reference.id.clone(), Value::Object(doc.fields.clone()));
            }
        }
        Value::Object(collections)
    }

    /// Load a snapshot file.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let text = tokio::fs::read_to_string(path).await?;
        let snapshot: Value = serde_json::from_str(&text)?;
        Self::from_snapshot(&snapshot).await
    }

    /// Write a snapshot file.
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&self.snapshot().await)?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_fault(&self, point: FaultPoint) -> Result<(), StoreError> {
        if self.faults.contains(&point) {
            return Err(StoreError::Injected(format!("{:?}", point)));
        }
        Ok(())
    }
}

fn check_precondition(
    reference: &DocRef,
    current: Option<&StoredDoc>,
    precondition: &Precondition,
) -> Result<(), StoreError> {
    let failure = |message: &str| StoreError::PreconditionFailed {
        path: reference.path(),
        message: message.to_string(),
    };

    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::Missing, None) => Ok(()),
        (Precondition::Missing, Some(_)) => Err(failure("document already exists")),
        (Precondition::Exists, Some(_)) => Ok(()),
        (Precondition::Exists, None) => Err(failure("document does not exist")),
        (Precondition::Version(expected), Some(doc)) if doc.version.to_string() == *expected => {
            Ok(())
        }
        (Precondition::Version(_), Some(_)) => Err(failure("document changed since read")),
        (Precondition::Version(_), None) => Err(failure("document does not exist")),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, reference: &DocRef) -> Result<Option<Document>, StoreError> {
        self.simulate_latency().await;
        self.check_fault(FaultPoint::Get(reference.collection.clone()))?;

        Ok(self
            .docs
            .read()
            .await
            .get(reference)
            .map(|doc| doc.to_document(reference)))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.simulate_latency().await;
        self.check_fault(FaultPoint::Query(query.collection.clone()))?;

        Ok(self
            .docs
            .read()
            .await
            .iter()
            .filter(|(reference, doc)| {
                reference.collection == query.collection && query.matches(&doc.fields)
            })
            .map(|(reference, doc)| doc.to_document(reference))
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitInfo, StoreError> {
        self.simulate_latency().await;
        self.check_fault(FaultPoint::Commit)?;

        if batch.len() > self.batch_limit {
            return Err(StoreError::BatchTooLarge {
                size: batch.len(),
                limit: self.batch_limit,
            });
        }

        let mut docs = self.docs.write().await;

        // Stage every touched document so a failing op leaves the store untouched.
        let mut staged: HashMap<DocRef, StoredDoc> = HashMap::new();
        let ops = batch.into_ops();
        for op in &ops {
            let reference = op.reference().clone();
            let current = staged
                .get(&reference)
                .or_else(|| docs.get(&reference))
                .cloned();

            let next = match op {
                WriteOp::Set {
                    fields,
                    mode,
                    precondition,
                    ..
                } => {
                    check_precondition(&reference, current.as_ref(), precondition)?;
                    let mut merged = match (mode, current) {
                        (WriteMode::Merge, Some(doc)) => doc.fields,
                        _ => Fields::new(),
                    };
                    merged.extend(fields.clone());
                    merged
                }
                WriteOp::Update { fields, .. } => {
                    let Some(doc) = current else {
                        return Err(StoreError::NotFound {
                            collection: reference.collection.clone(),
                            id: reference.id.clone(),
                        });
                    };
                    let mut merged = doc.fields;
                    merged.extend(fields.clone());
                    merged
                }
            };

            staged.insert(
                reference,
                StoredDoc {
                    fields: next,
                    version: self.bump_version(),
                },
            );
        }

        docs.extend(staged);

        self.commits.fetch_add(1, Ordering::SeqCst);
        self.writes.fetch_add(ops.len() as u64, Ordering::SeqCst);
        debug!(writes = ops.len(), "committed batch to memory store");

        Ok(CommitInfo {
            writes: ops.len(),
            commit_time: Some(chrono::Utc::now().to_rfc3339()),
        })
    }
}
