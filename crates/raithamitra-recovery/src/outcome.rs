//! Results of a reconciliation attempt.

use raithamitra_store::Identity;
use serde::Serialize;

use crate::RemapCount;

/// How a reconciliation attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalState {
    Done,
    /// Profile recovered but some owned records still point at the old identity.
    DoneWithWarning,
}

/// What happened during a recovery that found an orphan profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from: Identity,
    pub to: Identity,
    /// Per owner reference: records found and queued.
    pub counts: Vec<RemapCount>,
    /// Owner-reference fields repointed by the committed batch.
    pub records_remapped: usize,
    /// Write operations in the committed batch.
    pub operations: usize,
    /// Records beyond the batch cap, still pointing at `from`.
    pub left_unmigrated: usize,
    /// Why the remap batch was not committed, if it failed.
    pub failure: Option<String>,
}

impl MigrationReport {
    /// Whether every owned record now points at the new identity.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none() && self.left_unmigrated == 0
    }
}

/// Result of [`crate::Reconciler::reconcile_identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReconcileOutcome {
    /// This identity was reconciled before; nothing was written.
    AlreadyMigrated { from: Option<Identity> },
    /// No orphan and no profile: a fresh profile was created.
    Provisioned,
    /// No orphan and the profile already exists; nothing was written.
    ExistingProfile,
    /// An orphan profile was merged onto this identity.
    Recovered(MigrationReport),
}

impl ReconcileOutcome {
    pub fn terminal_state(&self) -> TerminalState {
        match self {
            ReconcileOutcome::Recovered(report) if !report.is_complete() => {
                TerminalState::DoneWithWarning
            }
            _ => TerminalState::Done,
        }
    }

    /// Message to show the person who just signed in.
    pub fn user_message(&self) -> String {
        match self {
            ReconcileOutcome::AlreadyMigrated { .. } | ReconcileOutcome::ExistingProfile => {
                "Signed in.".to_string()
            }
            ReconcileOutcome::Provisioned => "Welcome! Your account has been created.".to_string(),
            ReconcileOutcome::Recovered(report) if report.failure.is_some() => {
                "Profile restored. Some items might need manual transfer; please contact support."
                    .to_string()
            }
            ReconcileOutcome::Recovered(report) if report.left_unmigrated > 0 => format!(
                "Welcome back! We transferred {} records to your new login, but {} more need \
                 manual transfer; please contact support.",
                report.records_remapped, report.left_unmigrated
            ),
            ReconcileOutcome::Recovered(report) if report.records_remapped > 0 => format!(
                "Welcome back! We found your old account and transferred {} records \
                 (Products, Orders, etc.) to your new login.",
                report.records_remapped
            ),
            ReconcileOutcome::Recovered(_) => "Your profile details have been recovered.".to_string(),
        }
    }
}

/// What [`crate::Reconciler::reconcile_identity`] would do, computed without writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PlannedAction {
    SkipAlreadyMigrated,
    Provision,
    KeepExisting,
    Recover { from: Identity },
}

/// Dry-run result of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcilePreview {
    pub identity: Identity,
    pub action: PlannedAction,
    pub counts: Vec<RemapCount>,
    pub operations: usize,
    pub left_unmigrated: usize,
}

impl ReconcilePreview {
    /// Human-readable descriptions of the changes.
    pub fn changes(&self) -> Vec<String> {
        let mut changes = Vec::new();
        match &self.action {
            PlannedAction::SkipAlreadyMigrated => {}
            PlannedAction::KeepExisting => {}
            PlannedAction::Provision => {
                changes.push(format!("Create new profile users/{}", self.identity));
            }
            PlannedAction::Recover { from } => {
                changes.push(format!(
                    "Merge profile users/{} into users/{}",
                    from, self.identity
                ));
                changes.push(format!("Mark users/{} as claimed by {}", from, self.identity));
                for count in self.counts.iter().filter(|c| c.found > 0) {
                    changes.push(format!(
                        "Repoint {} of {} {} record(s) by {}",
                        count.queued, count.found, count.collection, count.field
                    ));
                }
                if self.left_unmigrated > 0 {
                    changes.push(format!(
                        "{} record(s) exceed the batch cap and would stay unmigrated",
                        self.left_unmigrated
                    ));
                }
            }
        }
        changes
    }
}
