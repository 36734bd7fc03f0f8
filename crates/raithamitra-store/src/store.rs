//! The document store interface and its batched-write primitive.

use async_trait::async_trait;

use crate::{DocRef, Document, Fields, Precondition, Query, StoreError, WriteMode};

/// Most operations the backend accepts in one atomic commit.
pub const STORE_BATCH_LIMIT: usize = 500;

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Write fields, creating the document if needed.
    Set {
        reference: DocRef,
        fields: Fields,
        mode: WriteMode,
        precondition: Precondition,
    },
    /// Replace the given top-level fields of an existing document.
    Update { reference: DocRef, fields: Fields },
}

impl WriteOp {
    pub fn reference(&self) -> &DocRef {
        match self {
            WriteOp::Set { reference, .. } | WriteOp::Update { reference, .. } => reference,
        }
    }
}

/// Bounded accumulator of writes applied atomically by [`DocumentStore::commit`].
///
/// Adding past the capacity is refused rather than failing the whole batch,
/// so callers can count what did not fit.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
    capacity: usize,
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBatch {
    /// A batch bounded by the backend's transaction limit.
    pub fn new() -> Self {
        Self::with_capacity(STORE_BATCH_LIMIT)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.ops.len() >= self.capacity
    }

    /// Queue a set. Returns false if the batch is full.
    pub fn set(
        &mut self,
        reference: DocRef,
        fields: Fields,
        mode: WriteMode,
        precondition: Precondition,
    ) -> bool {
        self.push(WriteOp::Set {
            reference,
            fields,
            mode,
            precondition,
        })
    }

    /// Queue an update of an existing document. Returns false if the batch is full.
    ///
    /// An update to a document already queued for update is folded into that
    /// operation and does not use capacity.
    pub fn update(&mut self, reference: DocRef, fields: Fields) -> bool {
        let queued = self.ops.iter_mut().find_map(|op| match op {
            WriteOp::Update {
                reference: existing,
                fields: existing_fields,
            } if *existing == reference => Some(existing_fields),
            _ => None,
        });

        if let Some(existing_fields) = queued {
            existing_fields.extend(fields);
            return true;
        }

        self.push(WriteOp::Update { reference, fields })
    }

    /// Whether an operation on this document is already queued.
    pub fn contains(&self, reference: &DocRef) -> bool {
        self.ops.iter().any(|op| op.reference() == reference)
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    fn push(&mut self, op: WriteOp) -> bool {
        if self.is_full() {
            return false;
        }
        self.ops.push(op);
        true
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Number of operations applied.
    pub writes: usize,
    /// Backend commit timestamp, when reported.
    pub commit_time: Option<String>,
}

/// A hosted document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document; `None` if it does not exist.
    async fn get(&self, reference: &DocRef) -> Result<Option<Document>, StoreError>;

    /// Run a collection query.
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Apply all writes of the batch atomically.
    ///
    /// Either every operation is applied or none is. Fails with
    /// [`StoreError::BatchTooLarge`] if the batch exceeds the backend's limit
    /// and with [`StoreError::PreconditionFailed`] if any precondition does
    /// not hold.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitInfo, StoreError>;

    /// Act as the identity holding `token` for subsequent requests.
    ///
    /// Stores without access control ignore it.
    async fn authorize(&self, _token: &str) {}

    /// Write one document.
    async fn set(
        &self,
        reference: &DocRef,
        fields: Fields,
        mode: WriteMode,
        precondition: Precondition,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::with_capacity(1);
        batch.set(reference.clone(), fields, mode, precondition);
        self.commit(batch).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_batch_refuses_past_capacity() {
        let mut batch = WriteBatch::with_capacity(2);
        assert!(batch.update(DocRef::new("orders", "o1"), fields(json!({"a": 1}))));
        assert!(batch.update(DocRef::new("orders", "o2"), fields(json!({"a": 1}))));
        assert!(!batch.update(DocRef::new("orders", "o3"), fields(json!({"a": 1}))));
        assert_eq!(batch.len(), 2);
        assert!(batch.is_full());
    }

    #[test]
    fn test_batch_folds_updates_to_same_document() {
        let mut batch = WriteBatch::with_capacity(1);
        assert!(batch.update(DocRef::new("orders", "o1"), fields(json!({"farmerId": "U2"}))));
        assert!(batch.update(DocRef::new("orders", "o1"), fields(json!({"customerId": "U2"}))));

        assert_eq!(batch.len(), 1);
        match &batch.ops()[0] {
            WriteOp::Update { fields, .. } => {
                assert_eq!(fields.get("farmerId"), Some(&json!("U2")));
                assert_eq!(fields.get("customerId"), Some(&json!("U2")));
            }
            other => panic!("unexpected op: {:?}", other),
        }
    }
}
