//! Phone number normalization.
//!
//! Profiles may store a phone number either as the bare local number
//! (`9876543210`) or fully qualified (`+919876543210`), so lookups search
//! for both forms.

use std::fmt;

use thiserror::Error;

use crate::RecoveryConfig;

/// Error when parsing a phone number.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,

    #[error("phone number contains invalid characters: {0}")]
    InvalidCharacters(String),

    #[error("expected a {expected}-digit phone number, got {got} digits")]
    WrongLength { expected: usize, got: usize },

    #[error("phone number {number} is not under country code {expected}")]
    ForeignCountryCode { number: String, expected: String },
}

/// A phone number in both its local and fully qualified forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber {
    local: String,
    full: String,
}

impl PhoneNumber {
    /// Parse a local or fully qualified number.
    ///
    /// Spaces, dashes and parentheses are ignored. A number starting with `+`
    /// must carry the configured country code; a bare number may be either
    /// the local digits or the country digits followed by the local digits.
    ///
    /// # Example
    ///
    /// ```
    /// use raithamitra_recovery::{PhoneNumber, RecoveryConfig};
    ///
    /// let config = RecoveryConfig::default();
    /// let phone = PhoneNumber::parse("+91 98765 43210", &config).unwrap();
    /// assert_eq!(phone.local(), "9876543210");
    /// assert_eq!(phone.full(), "+919876543210");
    /// ```
    pub fn parse(input: &str, config: &RecoveryConfig) -> Result<Self, PhoneError> {
        let cleaned: String = input
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
            .collect();
        if cleaned.is_empty() {
            return Err(PhoneError::Empty);
        }

        let (qualified, digits) = match cleaned.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhoneError::InvalidCharacters(input.to_string()));
        }

        let country_digits = config.country_code.trim_start_matches('+');
        let local = if qualified {
            digits
                .strip_prefix(country_digits)
                .ok_or_else(|| PhoneError::ForeignCountryCode {
                    number: cleaned.clone(),
                    expected: config.country_code.clone(),
                })?
        } else if digits.len() == country_digits.len() + config.local_digits {
            digits.strip_prefix(country_digits).unwrap_or(digits)
        } else {
            digits
        };

        if local.len() != config.local_digits {
            return Err(PhoneError::WrongLength {
                expected: config.local_digits,
                got: local.len(),
            });
        }

        Ok(Self::from_local(local, config))
    }

    /// Parse input that must be exactly the local digits, as typed on the sign-in form.
    pub fn parse_local(input: &str, config: &RecoveryConfig) -> Result<Self, PhoneError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PhoneError::Empty);
        }
        if !trimmed.chars().all(|c| c.is_ascii_digit()) {
            return Err(PhoneError::InvalidCharacters(input.to_string()));
        }
        if trimmed.len() != config.local_digits {
            return Err(PhoneError::WrongLength {
                expected: config.local_digits,
                got: trimmed.len(),
            });
        }
        Ok(Self::from_local(trimmed, config))
    }

    fn from_local(local: &str, config: &RecoveryConfig) -> Self {
        Self {
            local: local.to_string(),
            full: format!("{}{}", config.country_code, local),
        }
    }

    /// The bare local number, e.g. `9876543210`.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// The fully qualified number, e.g. `+919876543210`.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// Every form a stored profile may use for this number.
    pub fn stored_forms(&self) -> [&str; 2] {
        [&self.local, &self.full]
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
