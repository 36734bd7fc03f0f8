//! End-to-end reconciliation scenarios against the in-memory store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use raithamitra_recovery::{
    PhoneNumber, PlannedAction, ReconcileOutcome, Reconciler, RecoveryConfig, RecoveryError,
    TerminalState,
};
use raithamitra_store::{
    CommitInfo, DocRef, Document, DocumentStore, FaultPoint, Fields, Identity, MemoryStore,
    Query, Role, StoreError, WriteBatch,
};
use serde_json::{Value, json};

const PHONE: &str = "9876543210";

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

fn phone() -> PhoneNumber {
    PhoneNumber::parse_local(PHONE, &RecoveryConfig::default()).unwrap()
}

fn id(s: &str) -> Identity {
    Identity::from(s)
}

fn reconciler(store: &Arc<MemoryStore>) -> Reconciler {
    reconciler_with(store, RecoveryConfig::default())
}

fn reconciler_with(store: &Arc<MemoryStore>, config: RecoveryConfig) -> Reconciler {
    let store: Arc<dyn DocumentStore> = store.clone();
    Reconciler::new(store, config).unwrap()
}

async fn seed(store: &MemoryStore, collection: &str, id: &str, value: Value) {
    store.insert(DocRef::new(collection, id), fields(value)).await;
}

async fn fetch(store: &MemoryStore, collection: &str, id: &str) -> Fields {
    store
        .get(&DocRef::new(collection, id))
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("{}/{} missing", collection, id))
        .fields
}

async fn count_owned_by(store: &MemoryStore, collection: &str, field: &str, owner: &str) -> usize {
    store
        .documents(collection)
        .await
        .iter()
        .filter(|d| d.str_field(field) == Some(owner))
        .count()
}

/// A farmer's orphaned profile U1 with one record in every owned collection.
async fn seed_orphaned_farmer(store: &MemoryStore) {
    seed(
        store,
        "users",
        "U1",
        json!({"phone": PHONE, "role": "Farmer", "name": "Ravi", "village": "Mandya"}),
    )
    .await;
    seed(store, "products", "p1", json!({"farmerId": "U1", "name": "Ragi"})).await;
    seed(store, "products", "p2", json!({"farmerId": "U1", "name": "Jowar"})).await;
    seed(store, "products", "p3", json!({"farmerId": "U7", "name": "Rice"})).await;
    seed(store, "orders", "o1", json!({"farmerId": "U1", "customerId": "C9"})).await;
    seed(store, "payments", "pay1", json!({"userId": "U1", "amount": 250})).await;
    seed(store, "feedbacks", "f1", json!({"customerId": "U1", "rating": 5})).await;
}

#[tokio::test]
async fn test_new_user_is_provisioned() {
    let store = Arc::new(MemoryStore::new());
    let outcome = reconciler(&store)
        .reconcile_identity(&id("U1"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Provisioned);
    assert_eq!(outcome.terminal_state(), TerminalState::Done);

    let profile = fetch(&store, "users", "U1").await;
    assert_eq!(profile["phone"], json!(PHONE));
    assert_eq!(profile["role"], json!("Farmer"));
    assert_eq!(profile["isNewUser"], json!(true));
    assert!(profile["createdAt"].is_string());
}

#[tokio::test]
async fn test_orphaned_farmer_is_recovered() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.from, id("U1"));
    assert_eq!(report.to, id("U2"));
    assert_eq!(report.records_remapped, 5);
    assert_eq!(report.operations, 5);
    assert_eq!(report.left_unmigrated, 0);
    assert_eq!(report.failure, None);
    assert_eq!(outcome.terminal_state(), TerminalState::Done);
    assert!(outcome.user_message().contains("transferred 5 records"));

    let profile = fetch(&store, "users", "U2").await;
    assert_eq!(profile["name"], json!("Ravi"));
    assert_eq!(profile["village"], json!("Mandya"));
    assert_eq!(profile["uid"], json!("U2"));
    assert_eq!(profile["migratedFrom"], json!("U1"));
    assert!(profile["recoveredAt"].is_string());
    assert!(!profile.contains_key("migratedTo"));

    let orphan = fetch(&store, "users", "U1").await;
    assert_eq!(orphan["migratedTo"], json!("U2"));
    assert_eq!(orphan["name"], json!("Ravi"));

    assert_eq!(count_owned_by(&store, "products", "farmerId", "U2").await, 2);
    assert_eq!(fetch(&store, "products", "p3").await["farmerId"], json!("U7"));
    let order = fetch(&store, "orders", "o1").await;
    assert_eq!(order["farmerId"], json!("U2"));
    assert_eq!(order["customerId"], json!("C9"));
    assert_eq!(fetch(&store, "payments", "pay1").await["userId"], json!("U2"));
    assert_eq!(fetch(&store, "payments", "pay1").await["amount"], json!(250));
    assert_eq!(fetch(&store, "feedbacks", "f1").await["customerId"], json!("U2"));
}

#[tokio::test]
async fn test_second_run_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    let reconciler = reconciler(&store);

    reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();
    let writes = store.write_count();
    let snapshot = store.snapshot().await;

    let outcome = reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::AlreadyMigrated {
            from: Some(id("U1"))
        }
    );
    assert_eq!(store.write_count(), writes);
    assert_eq!(store.snapshot().await, snapshot);
}

#[tokio::test]
async fn test_existing_profile_without_orphan_is_untouched() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Farmer"})).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U1"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::ExistingProfile);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_orphan_with_other_role_is_ignored() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Customer"})).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Provisioned);
    assert!(!fetch(&store, "users", "U1").await.contains_key("migratedTo"));
}

#[tokio::test]
async fn test_orphan_with_qualified_phone_is_found() {
    let store = Arc::new(MemoryStore::new());
    seed(
        &store,
        "users",
        "U1",
        json!({"phone": "+919876543210", "role": "Farmer"}),
    )
    .await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Recovered(_)));
}

#[tokio::test]
async fn test_merge_keeps_fields_of_new_profile() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    seed(
        &store,
        "users",
        "U2",
        json!({"phone": PHONE, "role": "Farmer", "language": "kn", "name": "New"}),
    )
    .await;

    reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let profile = fetch(&store, "users", "U2").await;
    assert_eq!(profile["language"], json!("kn"));
    assert_eq!(profile["name"], json!("Ravi"));
    assert_eq!(profile["village"], json!("Mandya"));
}

#[tokio::test]
async fn test_ambiguous_match_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Farmer"})).await;
    seed(
        &store,
        "users",
        "U3",
        json!({"phone": "+919876543210", "role": "Farmer"}),
    )
    .await;

    let err = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap_err();

    match err {
        RecoveryError::AmbiguousMatch {
            phone,
            role,
            candidates,
        } => {
            assert_eq!(phone, "+919876543210");
            assert_eq!(role, Role::Farmer);
            assert_eq!(candidates, vec![id("U1"), id("U3")]);
        }
        other => panic!("expected ambiguous match, got {:?}", other),
    }
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_query_failure_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    store.inject_fault(FaultPoint::Query("users".to_string()));

    let err = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap_err();

    assert!(matches!(err, RecoveryError::QueryFailed(_)));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_profile_fetch_failure_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.inject_fault(FaultPoint::Get("users".to_string()));

    let err = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap_err();

    assert!(matches!(err, RecoveryError::QueryFailed(_)));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_profile_write_failure_is_an_error() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    store.inject_fault(FaultPoint::Commit);

    let err = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap_err();

    assert!(matches!(err, RecoveryError::ProfileWriteFailed(_)));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_failed_remap_read_keeps_recovered_profile() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    store.inject_fault(FaultPoint::Query("payments".to_string()));

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert!(report.failure.is_some());
    assert_eq!(report.records_remapped, 0);
    assert_eq!(outcome.terminal_state(), TerminalState::DoneWithWarning);
    assert!(outcome.user_message().contains("contact support"));

    assert_eq!(fetch(&store, "users", "U2").await["migratedFrom"], json!("U1"));
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U1").await, 2);
}

#[tokio::test]
async fn test_failed_remap_commit_leaves_records_untouched() {
    // Room for the two-write profile merge but not the five record updates.
    let store = Arc::new(MemoryStore::new().with_batch_limit(2));
    seed_orphaned_farmer(&store).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert!(report.failure.is_some());
    assert_eq!(report.records_remapped, 0);
    assert_eq!(report.operations, 0);

    assert_eq!(fetch(&store, "users", "U2").await["name"], json!("Ravi"));
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U1").await, 2);
    assert_eq!(fetch(&store, "orders", "o1").await["farmerId"], json!("U1"));
    assert_eq!(fetch(&store, "payments", "pay1").await["userId"], json!("U1"));
}

#[tokio::test]
async fn test_truncated_recovery_then_resume() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Farmer"})).await;
    for i in 0..500 {
        seed(&store, "products", &format!("p{:03}", i), json!({"farmerId": "U1"})).await;
    }
    let reconciler = reconciler(&store);

    let outcome = reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.records_remapped, 490);
    assert_eq!(report.left_unmigrated, 10);
    assert_eq!(report.failure, None);
    assert_eq!(outcome.terminal_state(), TerminalState::DoneWithWarning);
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U2").await, 490);

    // Remainder is the highest document ids.
    assert_eq!(fetch(&store, "products", "p489").await["farmerId"], json!("U2"));
    assert_eq!(fetch(&store, "products", "p490").await["farmerId"], json!("U1"));

    let resumed = reconciler
        .resume_remap(&id("U1"), &id("U2"), Role::Farmer)
        .await
        .unwrap();
    assert_eq!(resumed.records_remapped, 10);
    assert_eq!(resumed.left_unmigrated, 0);
    assert!(resumed.is_complete());
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U2").await, 500);

    let again = reconciler
        .resume_remap(&id("U1"), &id("U2"), Role::Farmer)
        .await
        .unwrap();
    assert_eq!(again.records_remapped, 0);
    assert_eq!(again.operations, 0);
}

#[tokio::test]
async fn test_resume_follows_recovery_chain() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Farmer"})).await;
    for p in ["p1", "p2", "p3"] {
        seed(&store, "products", p, json!({"farmerId": "U1"})).await;
    }
    let reconciler = reconciler_with(&store, RecoveryConfig::default().with_max_remap_ops(2));

    let first = reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();
    let ReconcileOutcome::Recovered(report) = &first else {
        panic!("expected recovery, got {:?}", first);
    };
    assert_eq!(report.left_unmigrated, 1);

    reconciler
        .reconcile_identity(&id("U3"), &phone(), Role::Farmer)
        .await
        .unwrap();
    assert_eq!(fetch(&store, "products", "p3").await["farmerId"], json!("U1"));

    let resumed = reconciler
        .resume_remap(&id("U1"), &id("U3"), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(resumed.records_remapped, 1);
    assert!(resumed.is_complete());
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U3").await, 3);
}

#[tokio::test]
async fn test_resume_rejects_unrelated_identity() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    seed(&store, "users", "U9", json!({"phone": "9000000000", "role": "Farmer"})).await;
    let reconciler = reconciler(&store);

    reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let err = reconciler
        .resume_remap(&id("U9"), &id("U2"), Role::Farmer)
        .await
        .unwrap_err();

    assert!(matches!(err, RecoveryError::NotRecovered { .. }));
}

#[tokio::test]
async fn test_resume_requires_recovered_profile() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U2", json!({"phone": PHONE, "role": "Farmer"})).await;

    let err = reconciler(&store)
        .resume_remap(&id("U1"), &id("U2"), Role::Farmer)
        .await
        .unwrap_err();

    assert!(matches!(err, RecoveryError::NotRecovered { .. }));
}

#[tokio::test]
async fn test_customer_recovery_skips_products() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Customer"})).await;
    seed(&store, "products", "p1", json!({"farmerId": "U1"})).await;
    seed(&store, "orders", "o1", json!({"farmerId": "F1", "customerId": "U1"})).await;
    seed(&store, "feedbacks", "f1", json!({"customerId": "U1"})).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Customer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.records_remapped, 2);
    assert!(report.counts.iter().all(|c| c.collection != "products"));
    assert_eq!(fetch(&store, "products", "p1").await["farmerId"], json!("U1"));
    assert_eq!(fetch(&store, "orders", "o1").await["customerId"], json!("U2"));
    assert_eq!(fetch(&store, "orders", "o1").await["farmerId"], json!("F1"));
}

#[tokio::test]
async fn test_order_owned_on_both_sides_is_one_write() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, "users", "U1", json!({"phone": PHONE, "role": "Farmer"})).await;
    seed(&store, "orders", "o1", json!({"farmerId": "U1", "customerId": "U1"})).await;

    let outcome = reconciler(&store)
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.records_remapped, 2);
    assert_eq!(report.operations, 1);

    let order = fetch(&store, "orders", "o1").await;
    assert_eq!(order["farmerId"], json!("U2"));
    assert_eq!(order["customerId"], json!("U2"));
}

#[tokio::test]
async fn test_chained_recovery() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    let reconciler = reconciler(&store);

    reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();
    let outcome = reconciler
        .reconcile_identity(&id("U3"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.from, id("U2"));
    assert_eq!(report.records_remapped, 5);

    let profile = fetch(&store, "users", "U3").await;
    assert_eq!(profile["migratedFrom"], json!("U2"));
    assert_eq!(profile["name"], json!("Ravi"));
    assert_eq!(fetch(&store, "users", "U2").await["migratedTo"], json!("U3"));
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U3").await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_racing_recoveries_have_one_winner() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
    seed_orphaned_farmer(&store).await;
    let reconciler = reconciler(&store);
    let phone = phone();
    let (u2, u3) = (id("U2"), id("U3"));

    let (first, second) = tokio::join!(
        reconciler.reconcile_identity(&u2, &phone, Role::Farmer),
        reconciler.reconcile_identity(&u3, &phone, Role::Farmer),
    );

    let results = [first, second];
    let winners: Vec<_> = results
        .iter()
        .filter(|r| matches!(r, Ok(ReconcileOutcome::Recovered(_))))
        .collect();
    let losers: Vec<_> = results
        .iter()
        .filter(|r| matches!(r, Err(RecoveryError::ConcurrentMigration { .. })))
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);

    let claimed_by = fetch(&store, "users", "U1").await["migratedTo"].clone();
    let winner = claimed_by.as_str().unwrap();
    assert_eq!(count_owned_by(&store, "products", "farmerId", winner).await, 2);

    let loser = if winner == "U2" { "U3" } else { "U2" };
    let missing = store.get(&DocRef::new("users", loser)).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_double_submit_for_same_identity() {
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(20)));
    seed_orphaned_farmer(&store).await;
    let reconciler = reconciler(&store);
    let phone = phone();
    let u2 = id("U2");

    let (first, second) = tokio::join!(
        reconciler.reconcile_identity(&u2, &phone, Role::Farmer),
        reconciler.reconcile_identity(&u2, &phone, Role::Farmer),
    );

    let recovered = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Ok(ReconcileOutcome::Recovered(_))))
        .count();
    assert_eq!(recovered, 1);
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U2").await, 2);
}

#[tokio::test]
async fn test_preview_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    let reconciler = reconciler_with(&store, RecoveryConfig::default().with_max_remap_ops(3));

    let preview = reconciler
        .preview(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(preview.action, PlannedAction::Recover { from: id("U1") });
    assert_eq!(preview.operations, 3);
    assert_eq!(preview.left_unmigrated, 2);
    assert!(
        preview
            .changes()
            .iter()
            .any(|c| c.contains("exceed the batch cap"))
    );
    assert_eq!(store.write_count(), 0);
    assert!(store.get(&DocRef::new("users", "U2")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_preview_for_new_user() {
    let store = Arc::new(MemoryStore::new());

    let preview = reconciler(&store)
        .preview(&id("U1"), &phone(), Role::Farmer)
        .await
        .unwrap();

    assert_eq!(preview.action, PlannedAction::Provision);
    assert_eq!(preview.changes(), vec!["Create new profile users/U1".to_string()]);
}

#[test]
fn test_oversized_cap_is_rejected() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let result = Reconciler::new(store, RecoveryConfig::default().with_max_remap_ops(500));
    assert!(matches!(result, Err(RecoveryError::Config(_))));
}

/// Applies the first commit but reports a precondition failure, as when a
/// commit lands after the client stopped waiting and a resend conflicts.
struct LostAcknowledgement {
    inner: Arc<MemoryStore>,
    dropped: AtomicBool,
}

#[async_trait]
impl DocumentStore for LostAcknowledgement {
    async fn get(&self, reference: &DocRef) -> Result<Option<Document>, StoreError> {
        self.inner.get(reference).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitInfo, StoreError> {
        let info = self.inner.commit(batch).await?;
        if self.dropped.swap(true, Ordering::SeqCst) {
            return Ok(info);
        }
        Err(StoreError::PreconditionFailed {
            path: "users/U2".into(),
            message: "stored version does not match".into(),
        })
    }
}

#[tokio::test]
async fn test_merge_applied_without_acknowledgement_still_remaps() {
    let store = Arc::new(MemoryStore::new());
    seed_orphaned_farmer(&store).await;
    let flaky: Arc<dyn DocumentStore> = Arc::new(LostAcknowledgement {
        inner: store.clone(),
        dropped: AtomicBool::new(false),
    });
    let reconciler = Reconciler::new(flaky, RecoveryConfig::default()).unwrap();

    let outcome = reconciler
        .reconcile_identity(&id("U2"), &phone(), Role::Farmer)
        .await
        .unwrap();

    let ReconcileOutcome::Recovered(report) = &outcome else {
        panic!("expected recovery, got {:?}", outcome);
    };
    assert_eq!(report.records_remapped, 5);
    assert!(report.is_complete());
    assert_eq!(fetch(&store, "users", "U2").await["migratedFrom"], json!("U1"));
    assert_eq!(count_owned_by(&store, "products", "farmerId", "U2").await, 2);
}
