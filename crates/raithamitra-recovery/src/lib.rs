//! Account recovery for RaithaMitra.
//!
//! After a phone passcode sign-in, [`Reconciler::reconcile_identity`] decides
//! whether the signed-in identity is new or a reconnection to an orphaned
//! profile with the same phone number and role. In the latter case it merges
//! the orphan's profile onto the new identity and repoints every product,
//! order, payment and feedback record that referenced the old identity.

mod config;
mod error;
mod login;
mod outcome;
mod phone;
mod profile;
mod reconcile;
pub mod remap;

pub use config::{DEFAULT_COUNTRY_CODE, DEFAULT_MAX_REMAP_OPS, RecoveryConfig};
pub use error::RecoveryError;
pub use login::{PasscodeLogin, SignedIn};
pub use outcome::{MigrationReport, PlannedAction, ReconcileOutcome, ReconcilePreview, TerminalState};
pub use phone::{PhoneError, PhoneNumber};
pub use profile::Profile;
pub use reconcile::Reconciler;
pub use remap::{OWNER_REFERENCES, OwnerReference, RemapCount, RemapPlan};
