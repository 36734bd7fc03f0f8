//! Phone passcode sign-in followed by reconciliation.

use std::sync::Arc;

use raithamitra_store::{IdentityProvider, Role, VerificationSession, VerifiedIdentity};
use tracing::info;

use crate::{PhoneNumber, ReconcileOutcome, Reconciler, RecoveryError};

/// Drives the sign-in screen: request a passcode, then verify and reconcile.
pub struct PasscodeLogin {
    provider: Arc<dyn IdentityProvider>,
    reconciler: Reconciler,
}

/// A verified sign-in and what reconciliation did with it.
#[derive(Debug)]
pub struct SignedIn {
    pub verified: VerifiedIdentity,
    pub outcome: ReconcileOutcome,
}

impl PasscodeLogin {
    pub fn new(provider: Arc<dyn IdentityProvider>, reconciler: Reconciler) -> Self {
        Self {
            provider,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Send a passcode to the local number typed on the sign-in form.
    pub async fn request_passcode(
        &self,
        input: &str,
        role: Role,
    ) -> Result<(VerificationSession, PhoneNumber), RecoveryError> {
        let config = self.reconciler.config();
        if !config.phone_login_allowed(role) {
            return Err(RecoveryError::PhoneLoginUnsupported(role));
        }

        let phone = PhoneNumber::parse_local(input, config)?;
        let session = self.provider.send_passcode(phone.full()).await?;

        info!(phone = %phone, role = %role, "passcode sent");
        Ok((session, phone))
    }

    /// Verify the passcode and reconcile the identity it signs in.
    ///
    /// The phone number used for reconciliation is the one the provider
    /// verified, not what was typed.
    pub async fn verify_and_reconcile(
        &self,
        session: &VerificationSession,
        code: &str,
        role: Role,
    ) -> Result<SignedIn, RecoveryError> {
        let verified = self.provider.verify_passcode(session, code.trim()).await?;
        let phone = PhoneNumber::parse(&verified.phone_number, self.reconciler.config())?;

        info!(identity = %verified.identity, is_new = verified.is_new, "passcode verified");

        self.reconciler.store().authorize(&verified.id_token).await;
        let outcome = self
            .reconciler
            .reconcile_identity(&verified.identity, &phone, role)
            .await?;

        Ok(SignedIn { verified, outcome })
    }
}
