//! Recovery configuration.

use raithamitra_store::{Role, STORE_BATCH_LIMIT};

use crate::RecoveryError;

/// Country code prefixed to local phone numbers.
pub const DEFAULT_COUNTRY_CODE: &str = "+91";

/// Most record updates a single recovery commits.
///
/// Stays below [`STORE_BATCH_LIMIT`] so the batch never hits the backend limit.
pub const DEFAULT_MAX_REMAP_OPS: usize = 490;

/// Settings for [`crate::Reconciler`] and [`crate::PasscodeLogin`].
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Prefix turning a local number into a fully qualified one.
    pub country_code: String,
    /// Number of digits in a local phone number.
    pub local_digits: usize,
    /// Cap on remap operations per commit.
    pub max_remap_ops: usize,
    /// Whether customers may sign in with a phone passcode.
    pub allow_customer_phone_login: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            country_code: DEFAULT_COUNTRY_CODE.to_string(),
            local_digits: 10,
            max_remap_ops: DEFAULT_MAX_REMAP_OPS,
            allow_customer_phone_login: false,
        }
    }
}

impl RecoveryConfig {
    pub fn with_max_remap_ops(mut self, max: usize) -> Self {
        self.max_remap_ops = max;
        self
    }

    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.country_code = code.into();
        self
    }

    pub fn with_customer_phone_login(mut self, allow: bool) -> Self {
        self.allow_customer_phone_login = allow;
        self
    }

    /// Whether passcode sign-in is offered for the role.
    pub fn phone_login_allowed(&self, role: Role) -> bool {
        match role {
            Role::Farmer => true,
            Role::Customer => self.allow_customer_phone_login,
        }
    }

    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.max_remap_ops == 0 || self.max_remap_ops >= STORE_BATCH_LIMIT {
            return Err(RecoveryError::Config(format!(
                "max_remap_ops must be between 1 and {}, got {}",
                STORE_BATCH_LIMIT - 1,
                self.max_remap_ops
            )));
        }

        let digits = self.country_code.strip_prefix('+').unwrap_or_default();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(RecoveryError::Config(format!(
                "country code must look like +91, got {:?}",
                self.country_code
            )));
        }

        if self.local_digits == 0 {
            return Err(RecoveryError::Config("local_digits must be positive".into()));
        }

        Ok(())
    }
}
