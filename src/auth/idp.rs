//! Identity provider adapter.
//!
//! Wraps sign-in, sign-out, and claim retrieval against an external
//! identity service. The [`IdentityProvider`] trait is the seam consumed by
//! the claims synchronizer; [`HttpIdentityProvider`] implements it against
//! a Firebase-style REST surface (password sign-in plus a secure-token
//! refresh endpoint).
//!
//! Claims are decoded from the credential's payload segment rather than
//! signature-verified: the token was issued to this client by the provider
//! itself over TLS, and the backend independently verifies it during the
//! token exchange.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{error::AuthError, roles::RolesClaim};
use crate::config::IdpConfig;

/// A live identity-provider credential.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Bearer token carrying the claim set.
    pub id_token: String,
    /// Opaque token used to force-refresh the credential.
    pub refresh_token: String,
    /// Provider-issued unique id for the account.
    pub provider_id: String,
    pub email: String,
    /// When the id token expires, if the provider said.
    pub expires_at: Option<DateTime<Utc>>,
}

/// The decoded claim set carried by a credential.
///
/// `roles` keeps the provider's ambiguous shape (string, array, or absent);
/// it is normalized by the synchronizer immediately on ingestion and never
/// travels further in this form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClaimSet {
    #[serde(default)]
    pub roles: Option<RolesClaim>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Result of a claims fetch. `refreshed` carries the rotated credential
/// when the fetch forced a provider round-trip.
#[derive(Debug, Clone)]
pub struct ClaimsFetch {
    pub claims: ClaimSet,
    pub refreshed: Option<Credential>,
}

/// Abstract contract over the external identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError>;

    /// Decode the claim set for `credential`.
    ///
    /// With `force_refresh` the provider is asked for a fresh token first;
    /// without it, claims come from the token already in hand, which may
    /// predate an administrative role change (claims are cached client-side
    /// for the life of a token).
    async fn fetch_claims(
        &self,
        credential: &Credential,
        force_refresh: bool,
    ) -> Result<ClaimsFetch, AuthError>;

    /// Invalidate the credential on the provider side, where supported.
    async fn sign_out(&self, credential: &Credential) -> Result<(), AuthError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    email: String,
    #[serde(default)]
    expires_in: Option<String>,
}

// The refresh endpoint answers in snake_case, unlike the identity endpoints.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// HTTP implementation of [`IdentityProvider`].
pub struct HttpIdentityProvider {
    config: IdpConfig,
    http: reqwest::Client,
}

impl HttpIdentityProvider {
    pub fn new(config: IdpConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(config: IdpConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn sign_in_url(&self) -> String {
        format!(
            "{}/v1/accounts:signInWithPassword",
            self.config.identity_url.as_str().trim_end_matches('/')
        )
    }

    fn refresh_url(&self) -> String {
        format!(
            "{}/v1/token",
            self.config.token_url.as_str().trim_end_matches('/')
        )
    }

    async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, AuthError> {
        tracing::debug!("Forcing identity-provider credential refresh");
        let response = self
            .http
            .post(self.refresh_url())
            .query(&[("key", self.config.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = check_provider_status(response).await?;
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("unreadable refresh response: {e}")))?;

        Ok(Credential {
            id_token: body.id_token,
            refresh_token: body.refresh_token,
            provider_id: body.user_id.unwrap_or_else(|| credential.provider_id.clone()),
            email: credential.email.clone(),
            expires_at: expiry_from(body.expires_in.as_deref()),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(self.sign_in_url())
            .query(&[("key", self.config.api_key.as_str())])
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true,
            }))
            .send()
            .await
            .map_err(map_transport_error)?;

        let response = check_provider_status(response).await?;
        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Provider(format!("unreadable sign-in response: {e}")))?;

        tracing::debug!(provider_id = %body.local_id, "Identity provider sign-in succeeded");

        Ok(Credential {
            id_token: body.id_token,
            refresh_token: body.refresh_token,
            provider_id: body.local_id,
            email: body.email,
            expires_at: expiry_from(body.expires_in.as_deref()),
        })
    }

    async fn fetch_claims(
        &self,
        credential: &Credential,
        force_refresh: bool,
    ) -> Result<ClaimsFetch, AuthError> {
        if force_refresh {
            let refreshed = self.refresh_credential(credential).await?;
            let claims = decode_claims(&refreshed.id_token)?;
            Ok(ClaimsFetch {
                claims,
                refreshed: Some(refreshed),
            })
        } else {
            let claims = decode_claims(&credential.id_token)?;
            Ok(ClaimsFetch {
                claims,
                refreshed: None,
            })
        }
    }

    async fn sign_out(&self, credential: &Credential) -> Result<(), AuthError> {
        // Password sessions have no client-reachable revocation endpoint;
        // discarding the tokens is the invalidation.
        tracing::debug!(provider_id = %credential.provider_id, "Discarding identity-provider credential");
        Ok(())
    }
}

/// Decode the claim set from a credential's payload segment.
pub(crate) fn decode_claims(id_token: &str) -> Result<ClaimSet, AuthError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::MalformedClaims("credential is not a three-part token".into()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedClaims(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedClaims(format!("payload is not a claims object: {e}")))
}

fn expiry_from(expires_in: Option<&str>) -> Option<DateTime<Utc>> {
    let seconds: i64 = expires_in?.parse().ok()?;
    Some(Utc::now() + Duration::seconds(seconds))
}

fn map_transport_error(err: reqwest::Error) -> AuthError {
    tracing::error!(error = %err, "Identity provider request failed");
    AuthError::Network(err.to_string())
}

/// Map a non-success provider response onto the error taxonomy.
async fn check_provider_status(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = match response.json::<ProviderErrorBody>().await {
        Ok(body) => body.error.message,
        Err(_) => status.to_string(),
    };
    tracing::debug!(status = %status, code = %message, "Identity provider rejected the request");
    Err(map_provider_code(&message))
}

fn map_provider_code(message: &str) -> AuthError {
    // Codes sometimes arrive with a trailing explanation ("CODE : detail").
    let code = message.split(&[' ', ':'][..]).next().unwrap_or(message);
    match code {
        "EMAIL_NOT_FOUND" => AuthError::UserNotFound,
        "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" => {
            AuthError::InvalidCredential
        }
        "TOO_MANY_ATTEMPTS_TRY_LATER" => AuthError::TooManyAttempts,
        "USER_DISABLED" => AuthError::AccountDisabled,
        _ => AuthError::Provider(message.to_string()),
    }
}
