//! Phone one-time-passcode identity provider.
//!
//! [`PhoneAuthClient`] talks to the Identity Toolkit REST API
//! (`accounts:sendVerificationCode` and `accounts:signInWithPhoneNumber`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::Identity;

/// Public Identity Toolkit endpoint.
pub const DEFAULT_IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Errors from the identity provider.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The passcode did not match.
    #[error("invalid passcode")]
    InvalidCode,

    /// Too many passcode requests or attempts from this client.
    #[error("too many passcode requests, try again later")]
    RateLimited,

    /// The verification session is no longer valid.
    #[error("verification session expired")]
    SessionExpired,

    /// The provider rejected the phone number.
    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    /// Any other provider-side rejection.
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Handle for a passcode that has been sent and not yet verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSession(pub String);

/// Result of a successful passcode verification.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub identity: Identity,
    /// Fully qualified phone number, e.g. `+919876543210`.
    pub phone_number: String,
    /// Token that authorizes document store access as this identity.
    pub id_token: String,
    /// Whether the provider created the identity during this sign-in.
    pub is_new: bool,
}

/// Issues and verifies one-time passcodes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Send a passcode to a fully qualified phone number.
    async fn send_passcode(&self, phone_number: &str) -> Result<VerificationSession, AuthError>;

    /// Verify a passcode, returning the identity it signs in.
    async fn verify_passcode(
        &self,
        session: &VerificationSession,
        code: &str,
    ) -> Result<VerifiedIdentity, AuthError>;
}

/// Configuration for [`PhoneAuthClient`].
#[derive(Debug, Clone)]
pub struct PhoneAuthConfig {
    pub base_url: String,
    pub api_key: String,
    /// Token from an app verification challenge, required by the hosted API.
    pub recaptcha_token: Option<String>,
}

impl PhoneAuthConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_IDENTITY_URL.to_string(),
            api_key: api_key.into(),
            recaptcha_token: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_recaptcha_token(mut self, token: impl Into<String>) -> Self {
        self.recaptcha_token = Some(token.into());
        self
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    session_info: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    local_id: String,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    is_new_user: bool,
}

/// REST client for phone passcode sign-in.
pub struct PhoneAuthClient {
    http: Client,
    config: PhoneAuthConfig,
}

impl PhoneAuthClient {
    pub fn new(config: PhoneAuthConfig) -> Result<Self, AuthError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, config })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/accounts:{}", self.config.base_url, method)
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .post(self.url(method))
            .query(&[("key", &self.config.api_key)])
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                AuthError::InvalidResponse(format!(
                    "{} failed ({}): failed to read response: {}",
                    method, status, e
                ))
            })?;

            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&text) {
                return Err(classify(&envelope.error.message));
            }
            return Err(AuthError::InvalidResponse(format!(
                "{} failed ({}): {}",
                method, status, text
            )));
        }

        Ok(response.json().await?)
    }
}

/// Map an Identity Toolkit error code to an [`AuthError`].
///
/// Codes may carry a trailing explanation (`"TOO_MANY_ATTEMPTS_TRY_LATER : ..."`).
fn classify(message: &str) -> AuthError {
    let code = message.split([' ', ':']).next().unwrap_or(message);
    match code {
        "INVALID_CODE" | "MISSING_CODE" => AuthError::InvalidCode,
        "TOO_MANY_ATTEMPTS_TRY_LATER" | "QUOTA_EXCEEDED" => AuthError::RateLimited,
        "SESSION_EXPIRED" | "INVALID_SESSION_INFO" | "CODE_EXPIRED" => AuthError::SessionExpired,
        "INVALID_PHONE_NUMBER" | "MISSING_PHONE_NUMBER" => {
            AuthError::InvalidPhoneNumber(message.to_string())
        }
        _ => AuthError::Rejected(message.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for PhoneAuthClient {
    async fn send_passcode(&self, phone_number: &str) -> Result<VerificationSession, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SendCodeRequest<'a> {
            phone_number: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            recaptcha_token: Option<&'a str>,
        }

        let response: SendCodeResponse = self
            .post(
                "sendVerificationCode",
                &SendCodeRequest {
                    phone_number,
                    recaptcha_token: self.config.recaptcha_token.as_deref(),
                },
            )
            .await?;

        debug!(phone = %phone_number, "passcode sent");
        Ok(VerificationSession(response.session_info))
    }

    async fn verify_passcode(
        &self,
        session: &VerificationSession,
        code: &str,
    ) -> Result<VerifiedIdentity, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct SignInRequest<'a> {
            session_info: &'a str,
            code: &'a str,
        }

        let response: SignInResponse = self
            .post(
                "signInWithPhoneNumber",
                &SignInRequest {
                    session_info: &session.0,
                    code,
                },
            )
            .await?;

        let phone_number = response.phone_number.ok_or_else(|| {
            AuthError::InvalidResponse("sign-in response has no phone number".to_string())
        })?;

        debug!(identity = %response.local_id, is_new = response.is_new_user, "passcode verified");
        Ok(VerifiedIdentity {
            identity: Identity(response.local_id),
            phone_number,
            id_token: response.id_token,
            is_new: response.is_new_user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PhoneAuthClient {
        PhoneAuthClient::new(
            PhoneAuthConfig::new("test-key").with_base_url(format!("{}/v1", server.uri())),
        )
        .unwrap()
    }

    #[test]
    fn test_classify_error_codes() {
        assert!(matches!(classify("INVALID_CODE"), AuthError::InvalidCode));
        assert!(matches!(
            classify("TOO_MANY_ATTEMPTS_TRY_LATER : Try again later."),
            AuthError::RateLimited
        ));
        assert!(matches!(classify("SESSION_EXPIRED"), AuthError::SessionExpired));
        assert!(matches!(
            classify("INVALID_PHONE_NUMBER : Invalid format."),
            AuthError::InvalidPhoneNumber(_)
        ));
        assert!(matches!(classify("OPERATION_NOT_ALLOWED"), AuthError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_send_passcode() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendVerificationCode"))
            .and(query_param("key", "test-key"))
            .and(body_json(json!({"phoneNumber": "+919876543210"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"sessionInfo": "session-abc"})),
            )
            .mount(&server)
            .await;

        let session = client(&server).send_passcode("+919876543210").await.unwrap();
        assert_eq!(session, VerificationSession("session-abc".to_string()));
    }

    #[tokio::test]
    async fn test_verify_passcode() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPhoneNumber"))
            .and(body_json(json!({"sessionInfo": "session-abc", "code": "123456"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "idToken": "id-token",
                "refreshToken": "refresh-token",
                "expiresIn": "3600",
                "localId": "U2",
                "phoneNumber": "+919876543210",
                "isNewUser": true
            })))
            .mount(&server)
            .await;

        let verified = client(&server)
            .verify_passcode(&VerificationSession("session-abc".to_string()), "123456")
            .await
            .unwrap();

        assert_eq!(verified.identity, Identity::from("U2"));
        assert_eq!(verified.phone_number, "+919876543210");
        assert_eq!(verified.id_token, "id-token");
        assert!(verified.is_new);
    }

    #[tokio::test]
    async fn test_verify_invalid_code() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/accounts:signInWithPhoneNumber"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "INVALID_CODE", "errors": []}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .verify_passcode(&VerificationSession("session-abc".to_string()), "000000")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
    }

    #[tokio::test]
    async fn test_send_passcode_rate_limited() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/accounts:sendVerificationCode"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "TOO_MANY_ATTEMPTS_TRY_LATER"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).send_passcode("+919876543210").await.unwrap_err();
        assert!(matches!(err, AuthError::RateLimited));
    }
}
