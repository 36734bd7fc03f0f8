//! Repointing owned records from one identity to another.

use raithamitra_store::{
    CUSTOMER_ID_FIELD, Document, DocumentStore, FARMER_ID_FIELD, FEEDBACKS_COLLECTION, Fields,
    Identity, ORDERS_COLLECTION, PAYMENTS_COLLECTION, PRODUCTS_COLLECTION, Query, Role,
    StoreError, USER_ID_FIELD, WriteBatch,
};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A field on a collection that holds the identity owning the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerReference {
    pub collection: &'static str,
    pub field: &'static str,
    /// Only remapped when recovering a farmer account.
    pub farmer_only: bool,
}

pub const PRODUCTS_BY_FARMER: OwnerReference = OwnerReference {
    collection: PRODUCTS_COLLECTION,
    field: FARMER_ID_FIELD,
    farmer_only: true,
};

pub const ORDERS_BY_FARMER: OwnerReference = OwnerReference {
    collection: ORDERS_COLLECTION,
    field: FARMER_ID_FIELD,
    farmer_only: false,
};

pub const ORDERS_BY_CUSTOMER: OwnerReference = OwnerReference {
    collection: ORDERS_COLLECTION,
    field: CUSTOMER_ID_FIELD,
    farmer_only: false,
};

pub const PAYMENTS_BY_USER: OwnerReference = OwnerReference {
    collection: PAYMENTS_COLLECTION,
    field: USER_ID_FIELD,
    farmer_only: false,
};

pub const FEEDBACKS_BY_CUSTOMER: OwnerReference = OwnerReference {
    collection: FEEDBACKS_COLLECTION,
    field: CUSTOMER_ID_FIELD,
    farmer_only: false,
};

/// Every owner reference, in the order a recovery remaps them.
pub const OWNER_REFERENCES: [OwnerReference; 5] = [
    PRODUCTS_BY_FARMER,
    ORDERS_BY_FARMER,
    ORDERS_BY_CUSTOMER,
    PAYMENTS_BY_USER,
    FEEDBACKS_BY_CUSTOMER,
];

impl OwnerReference {
    pub fn applies_to(&self, role: Role) -> bool {
        !self.farmer_only || role == Role::Farmer
    }

    /// Query for every record this reference ties to `owner`.
    pub fn query(&self, owner: &Identity) -> Query {
        Query::collection(self.collection).where_eq(self.field, owner.as_str())
    }
}

/// Records owned by an identity, grouped by owner reference.
pub type OwnedRecords = Vec<(OwnerReference, Vec<Document>)>;

/// Fetch every record that references `owner`, for the references that apply to `role`.
///
/// Orders are looked up by farmer and by customer concurrently.
pub async fn collect_owned(
    store: &dyn DocumentStore,
    owner: &Identity,
    role: Role,
) -> Result<OwnedRecords, StoreError> {
    let products = if PRODUCTS_BY_FARMER.applies_to(role) {
        store.query(&PRODUCTS_BY_FARMER.query(owner)).await?
    } else {
        Vec::new()
    };

    let by_farmer = ORDERS_BY_FARMER.query(owner);
    let by_customer = ORDERS_BY_CUSTOMER.query(owner);
    let (orders_as_farmer, orders_as_customer) =
        tokio::join!(store.query(&by_farmer), store.query(&by_customer));
    let (orders_as_farmer, orders_as_customer) = (orders_as_farmer?, orders_as_customer?);

    let payments = store.query(&PAYMENTS_BY_USER.query(owner)).await?;
    let feedbacks = store.query(&FEEDBACKS_BY_CUSTOMER.query(owner)).await?;

    let mut owned = vec![
        (ORDERS_BY_FARMER, orders_as_farmer),
        (ORDERS_BY_CUSTOMER, orders_as_customer),
        (PAYMENTS_BY_USER, payments),
        (FEEDBACKS_BY_CUSTOMER, feedbacks),
    ];
    if PRODUCTS_BY_FARMER.applies_to(role) {
        owned.insert(0, (PRODUCTS_BY_FARMER, products));
    }

    debug!(
        owner = %owner,
        records = owned.iter().map(|(_, docs)| docs.len()).sum::<usize>(),
        "collected owned records"
    );
    Ok(owned)
}

/// How many records of one owner reference were found and queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemapCount {
    pub collection: String,
    pub field: String,
    pub found: usize,
    pub queued: usize,
}

/// A bounded batch of owner-reference updates.
///
/// Records are queued in owner-reference order and, within a reference, by
/// document id, so what does not fit under the cap is always the same
/// records for the same data.
#[derive(Debug)]
pub struct RemapPlan {
    new_identity: Identity,
    batch: WriteBatch,
    counts: Vec<RemapCount>,
    left_unmigrated: usize,
}

impl RemapPlan {
    pub fn new(new_identity: &Identity, max_ops: usize) -> Self {
        Self {
            new_identity: new_identity.clone(),
            batch: WriteBatch::with_capacity(max_ops),
            counts: Vec::new(),
            left_unmigrated: 0,
        }
    }

    /// Plan remapping for everything in `owned`.
    pub fn build(new_identity: &Identity, max_ops: usize, owned: &OwnedRecords) -> Self {
        let mut plan = Self::new(new_identity, max_ops);
        for (reference, documents) in owned {
            plan.add(reference, documents);
        }
        plan
    }

    /// Queue updates pointing `reference` at the new identity on each document.
    pub fn add(&mut self, reference: &OwnerReference, documents: &[Document]) {
        let mut sorted: Vec<&Document> = documents.iter().collect();
        sorted.sort_by(|a, b| a.reference.cmp(&b.reference));

        let mut queued = 0;
        for document in sorted {
            let mut fields = Fields::new();
            fields.insert(
                reference.field.to_string(),
                Value::String(self.new_identity.to_string()),
            );
            if self.batch.update(document.reference.clone(), fields) {
                queued += 1;
            } else {
                self.left_unmigrated += 1;
            }
        }

        self.counts.push(RemapCount {
            collection: reference.collection.to_string(),
            field: reference.field.to_string(),
            found: documents.len(),
            queued,
        });
    }

    /// Field updates queued across all references.
    pub fn records_queued(&self) -> usize {
        self.counts.iter().map(|c| c.queued).sum()
    }

    /// Records that did not fit under the cap.
    pub fn left_unmigrated(&self) -> usize {
        self.left_unmigrated
    }

    /// Write operations in the batch; an order updated on both fields is one operation.
    pub fn operations(&self) -> usize {
        self.batch.len()
    }

    pub fn counts(&self) -> &[RemapCount] {
        &self.counts
    }

    pub fn into_parts(self) -> (WriteBatch, Vec<RemapCount>, usize) {
        (self.batch, self.counts, self.left_unmigrated)
    }
}
