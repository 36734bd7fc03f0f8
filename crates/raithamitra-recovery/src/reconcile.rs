//! Identity reconciliation: detect an orphaned profile and migrate it.

use std::sync::Arc;

use chrono::Utc;
use raithamitra_store::{
    CREATED_AT_FIELD, DocumentStore, Fields, IS_NEW_USER_FIELD, Identity, MIGRATED_AT_FIELD,
    MIGRATED_FROM_FIELD, MIGRATED_TO_FIELD, PHONE_FIELD, Precondition, Query, RECOVERED_AT_FIELD,
    ROLE_FIELD, Role, UID_FIELD, USERS_COLLECTION, WriteBatch, WriteMode,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::outcome::PlannedAction;
use crate::remap::{RemapPlan, collect_owned};
use crate::{
    MigrationReport, PhoneNumber, Profile, ReconcileOutcome, ReconcilePreview, RecoveryConfig,
    RecoveryError,
};

/// Most `migratedFrom` links followed when resuming a remap.
const MAX_RECOVERY_CHAIN: usize = 16;

/// Reconciles freshly signed-in identities with orphaned profiles.
pub struct Reconciler {
    store: Arc<dyn DocumentStore>,
    config: RecoveryConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn DocumentStore>, config: RecoveryConfig) -> Result<Self, RecoveryError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Reconcile `new_identity` after a passcode sign-in.
    ///
    /// Running this again for an identity that was already recovered writes
    /// nothing. Errors are only returned before any write; a failure while
    /// repointing records is reported on the `Recovered` outcome instead.
    #[tracing::instrument(skip(self, new_identity, phone), fields(identity = %new_identity, phone = %phone))]
    pub async fn reconcile_identity(
        &self,
        new_identity: &Identity,
        phone: &PhoneNumber,
        role: Role,
    ) -> Result<ReconcileOutcome, RecoveryError> {
        let new_profile = self.fetch_profile(new_identity).await?;

        if let Some(profile) = &new_profile
            && profile.is_recovered()
        {
            info!(from = ?profile.migrated_from(), "identity already reconciled, skipping");
            return Ok(ReconcileOutcome::AlreadyMigrated {
                from: profile.migrated_from(),
            });
        }

        let Some(orphan) = self.find_orphan(new_identity, phone, role).await? else {
            return self
                .provision(new_identity, phone, role, new_profile.as_ref())
                .await;
        };

        let old_identity = orphan.identity();
        info!(from = %old_identity, "found orphaned profile, recovering");

        self.merge_profile(new_identity, &orphan, new_profile.as_ref())
            .await?;
        let report = self.remap_records(&old_identity, new_identity, role).await;

        if report.is_complete() {
            info!(
                records = report.records_remapped,
                operations = report.operations,
                "recovery complete"
            );
        } else {
            warn!(
                records = report.records_remapped,
                left_unmigrated = report.left_unmigrated,
                failure = ?report.failure,
                "partial recovery: profile restored, some records still point at the old identity"
            );
        }

        Ok(ReconcileOutcome::Recovered(report))
    }

    /// Repoint records still owned by `old_identity` after an earlier recovery.
    ///
    /// Used to finish a recovery whose remap batch failed or was capped.
    /// Repeated runs pick up where the last left off, since remapped records
    /// no longer match the old identity.
    ///
    /// `old_identity` may be any earlier link of a recovery chain ending at
    /// `new_identity` (U1 -> U2 -> U3): records left behind on U1 go straight
    /// to U3.
    #[tracing::instrument(skip(self, old_identity, new_identity), fields(from = %old_identity, to = %new_identity))]
    pub async fn resume_remap(
        &self,
        old_identity: &Identity,
        new_identity: &Identity,
        role: Role,
    ) -> Result<MigrationReport, RecoveryError> {
        if !self.recovered_from(new_identity, old_identity).await? {
            return Err(RecoveryError::NotRecovered {
                old: old_identity.clone(),
                new: new_identity.clone(),
            });
        }

        let report = self.remap_records(old_identity, new_identity, role).await;
        info!(
            records = report.records_remapped,
            left_unmigrated = report.left_unmigrated,
            failure = ?report.failure,
            "resumed remap finished"
        );
        Ok(report)
    }

    /// Work out what [`Self::reconcile_identity`] would do, without writing.
    pub async fn preview(
        &self,
        new_identity: &Identity,
        phone: &PhoneNumber,
        role: Role,
    ) -> Result<ReconcilePreview, RecoveryError> {
        let mut preview = ReconcilePreview {
            identity: new_identity.clone(),
            action: PlannedAction::KeepExisting,
            counts: Vec::new(),
            operations: 0,
            left_unmigrated: 0,
        };

        let new_profile = self.fetch_profile(new_identity).await?;
        if new_profile.as_ref().is_some_and(Profile::is_recovered) {
            preview.action = PlannedAction::SkipAlreadyMigrated;
            return Ok(preview);
        }

        let Some(orphan) = self.find_orphan(new_identity, phone, role).await? else {
            if new_profile.is_none() {
                preview.action = PlannedAction::Provision;
            }
            return Ok(preview);
        };

        let old_identity = orphan.identity();
        let owned = collect_owned(self.store.as_ref(), &old_identity, role)
            .await
            .map_err(RecoveryError::QueryFailed)?;
        let plan = RemapPlan::build(new_identity, self.config.max_remap_ops, &owned);

        preview.operations = plan.operations();
        preview.left_unmigrated = plan.left_unmigrated();
        preview.counts = plan.counts().to_vec();
        preview.action = PlannedAction::Recover { from: old_identity };
        Ok(preview)
    }

    /// Walk `migratedFrom` links back from `new_identity` looking for `old_identity`.
    async fn recovered_from(
        &self,
        new_identity: &Identity,
        old_identity: &Identity,
    ) -> Result<bool, RecoveryError> {
        let mut current = new_identity.clone();
        for _ in 0..MAX_RECOVERY_CHAIN {
            let Some(from) = self
                .fetch_profile(&current)
                .await?
                .and_then(|p| p.migrated_from())
            else {
                return Ok(false);
            };
            if from == *old_identity {
                return Ok(true);
            }
            if from == *new_identity {
                return Ok(false);
            }
            debug!(via = %from, "following recovery chain");
            current = from;
        }
        Ok(false)
    }

    async fn fetch_profile(&self, identity: &Identity) -> Result<Option<Profile>, RecoveryError> {
        self.store
            .get(&Profile::reference(identity))
            .await
            .map(|doc| doc.map(Profile::from))
            .map_err(RecoveryError::QueryFailed)
    }

    /// Find the single unclaimed profile with this phone and role under another identity.
    async fn find_orphan(
        &self,
        new_identity: &Identity,
        phone: &PhoneNumber,
        role: Role,
    ) -> Result<Option<Profile>, RecoveryError> {
        let query = Query::collection(USERS_COLLECTION)
            .where_in(PHONE_FIELD, phone.stored_forms())
            .where_eq(ROLE_FIELD, role.as_str());

        let mut candidates: Vec<Profile> = self
            .store
            .query(&query)
            .await
            .map_err(RecoveryError::QueryFailed)?
            .into_iter()
            .map(Profile::from)
            .filter(|p| p.identity() != *new_identity && !p.is_claimed())
            .collect();

        match candidates.len() {
            0 => {
                debug!("no orphaned profile found");
                Ok(None)
            }
            1 => Ok(candidates.pop()),
            _ => {
                let identities: Vec<Identity> = candidates.iter().map(Profile::identity).collect();
                warn!(
                    candidates = ?identities,
                    "multiple orphaned profiles match, refusing to merge"
                );
                Err(RecoveryError::AmbiguousMatch {
                    phone: phone.full().to_string(),
                    role,
                    candidates: identities,
                })
            }
        }
    }

    async fn provision(
        &self,
        new_identity: &Identity,
        phone: &PhoneNumber,
        role: Role,
        existing: Option<&Profile>,
    ) -> Result<ReconcileOutcome, RecoveryError> {
        if existing.is_some() {
            debug!("profile exists and no orphan matches, nothing to do");
            return Ok(ReconcileOutcome::ExistingProfile);
        }

        let mut fields = Fields::new();
        fields.insert(PHONE_FIELD.into(), Value::String(phone.local().to_string()));
        fields.insert(ROLE_FIELD.into(), Value::String(role.as_str().to_string()));
        fields.insert(CREATED_AT_FIELD.into(), Value::String(Utc::now().to_rfc3339()));
        fields.insert(IS_NEW_USER_FIELD.into(), Value::Bool(true));

        match self
            .store
            .set(
                &Profile::reference(new_identity),
                fields,
                WriteMode::Overwrite,
                Precondition::Missing,
            )
            .await
        {
            Ok(()) => {
                info!("provisioned new profile");
                Ok(ReconcileOutcome::Provisioned)
            }
            Err(e) if e.is_precondition_failure() => {
                info!("profile was created concurrently, keeping it");
                Ok(ReconcileOutcome::ExistingProfile)
            }
            Err(e) => Err(RecoveryError::ProfileWriteFailed(e)),
        }
    }

    /// Copy the orphan's fields onto the new profile and claim the orphan, atomically.
    ///
    /// Both writes are conditional on the versions read earlier, so a racing
    /// recovery of either profile fails here instead of merging twice.
    async fn merge_profile(
        &self,
        new_identity: &Identity,
        orphan: &Profile,
        new_profile: Option<&Profile>,
    ) -> Result<(), RecoveryError> {
        let old_identity = orphan.identity();
        let now = Value::String(Utc::now().to_rfc3339());

        let mut merged = orphan.fields().clone();
        merged.remove(MIGRATED_TO_FIELD);
        merged.remove(MIGRATED_AT_FIELD);
        merged.insert(UID_FIELD.into(), Value::String(new_identity.to_string()));
        merged.insert(
            MIGRATED_FROM_FIELD.into(),
            Value::String(old_identity.to_string()),
        );
        merged.insert(RECOVERED_AT_FIELD.into(), now.clone());

        let mut claim = Fields::new();
        claim.insert(
            MIGRATED_TO_FIELD.into(),
            Value::String(new_identity.to_string()),
        );
        claim.insert(MIGRATED_AT_FIELD.into(), now);

        let mut batch = WriteBatch::with_capacity(2);
        batch.set(
            Profile::reference(new_identity),
            merged,
            WriteMode::Merge,
            Precondition::unchanged_since(new_profile.map(Profile::document)),
        );
        batch.set(
            Profile::reference(&old_identity),
            claim,
            WriteMode::Merge,
            Precondition::unchanged_since(Some(orphan.document())),
        );

        match self.store.commit(batch).await {
            Ok(_) => {
                info!(from = %old_identity, "profile merged");
                Ok(())
            }
            Err(e) if e.is_precondition_failure() => {
                // The store may report a conflict with our own commit when an
                // earlier attempt was applied without an acknowledgement.
                let current = self.fetch_profile(new_identity).await?;
                if current.and_then(|p| p.migrated_from()).as_ref() == Some(&old_identity) {
                    info!(from = %old_identity, "profile merge already applied");
                    return Ok(());
                }
                warn!(error = %e, "profile changed during recovery");
                Err(RecoveryError::ConcurrentMigration {
                    identity: new_identity.clone(),
                })
            }
            Err(e) => Err(RecoveryError::ProfileWriteFailed(e)),
        }
    }

    /// Repoint every record owned by `old_identity`, in one capped batch.
    async fn remap_records(
        &self,
        old_identity: &Identity,
        new_identity: &Identity,
        role: Role,
    ) -> MigrationReport {
        let mut report = MigrationReport {
            from: old_identity.clone(),
            to: new_identity.clone(),
            counts: Vec::new(),
            records_remapped: 0,
            operations: 0,
            left_unmigrated: 0,
            failure: None,
        };

        let owned = match collect_owned(self.store.as_ref(), old_identity, role).await {
            Ok(owned) => owned,
            Err(e) => {
                warn!(error = %e, "failed to read owned records");
                report.failure = Some(e.to_string());
                return report;
            }
        };

        let plan = RemapPlan::build(new_identity, self.config.max_remap_ops, &owned);
        let records = plan.records_queued();
        let (batch, counts, left_unmigrated) = plan.into_parts();
        report.counts = counts;
        report.left_unmigrated = left_unmigrated;

        if left_unmigrated > 0 {
            warn!(
                left_unmigrated,
                cap = self.config.max_remap_ops,
                "batch cap reached, records left unmigrated"
            );
        }

        if batch.is_empty() {
            return report;
        }

        let operations = batch.len();
        match self.store.commit(batch).await {
            Ok(_) => {
                report.records_remapped = records;
                report.operations = operations;
            }
            Err(e) => {
                warn!(error = %e, operations, "remap batch failed");
                report.failure = Some(e.to_string());
            }
        }
        report
    }
}
