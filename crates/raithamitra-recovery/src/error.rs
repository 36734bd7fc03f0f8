//! Error types for account recovery.

use raithamitra_store::{AuthError, Identity, Role, StoreError};
use thiserror::Error;

use crate::PhoneError;

/// Errors that stop a recovery before any data was changed.
///
/// Failures after the profile merge are not errors: they are reported on the
/// [`crate::MigrationReport`] of a `Recovered` outcome.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The identity provider refused the passcode flow.
    #[error("identity verification failed: {0}")]
    IdentityVerificationFailed(#[from] AuthError),

    /// The profile lookup or orphan search failed.
    #[error("could not check for an existing account: {0}")]
    QueryFailed(#[source] StoreError),

    /// More than one orphan profile matches the phone number and role.
    #[error("{} profiles match phone {phone} as {role}: {}", candidates.len(), format_identities(candidates))]
    AmbiguousMatch {
        phone: String,
        role: Role,
        candidates: Vec<Identity>,
    },

    /// Another recovery changed one of the profiles between read and write.
    #[error("concurrent recovery detected for {identity}; sign in again to retry")]
    ConcurrentMigration { identity: Identity },

    /// The profile merge or provisioning write failed.
    #[error("could not write profile: {0}")]
    ProfileWriteFailed(#[source] StoreError),

    /// Remapping was requested for a profile not recovered from the given identity.
    #[error("{new} was not recovered from {old}")]
    NotRecovered { old: Identity, new: Identity },

    /// The phone number could not be parsed.
    #[error(transparent)]
    InvalidPhone(#[from] PhoneError),

    /// Passcode sign-in is not offered for this role.
    #[error("{0} accounts must sign in with email")]
    PhoneLoginUnsupported(Role),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

fn format_identities(identities: &[Identity]) -> String {
    identities
        .iter()
        .map(Identity::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
