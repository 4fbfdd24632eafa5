//! HTTP client for the backend user directory.
//!
//! The directory is a remote REST collaborator: source of truth for user
//! profile and role *definitions*, best-effort mirror for role
//! *membership*. The client attaches the current session's bearer token
//! when it has an [`AuthState`] handle; callers translate `Unauthorized`
//! results through the synchronizer's interceptor hook.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::{
    error::DirectoryError,
    types::{
        CreateRole, CreateUser, LoginResponse, PermissionRecord, RoleRecord, UpdateRole,
        UpdateUser, UpsertUser, UserRecord,
    },
};
use crate::{auth::AuthState, config::DirectoryConfig};

pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: Url,
    /// Source of the bearer token for authorized calls. `None` means every
    /// request goes out anonymous (token exchange, username lookup).
    state: Option<AuthState>,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Self {
        Self::with_state_opt(config, None)
    }

    /// A client that signs requests with the current session's token.
    pub fn with_state(config: &DirectoryConfig, state: AuthState) -> Self {
        Self::with_state_opt(config, Some(state))
    }

    fn with_state_opt(config: &DirectoryConfig, state: Option<AuthState>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: config.base_url.clone(),
            state,
        }
    }

    pub fn with_client(http: reqwest::Client, base_url: Url, state: Option<AuthState>) -> Self {
        Self {
            http,
            base_url,
            state,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut request = self.http.request(method, url);
        if let Some(token) = self.state.as_ref().and_then(AuthState::bearer_token) {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, DirectoryError> {
        let response = check_status(request.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    /// Deployments differ on list responses: some return a raw array, some
    /// wrap it in a `{ "data": ... }` envelope. Accept both.
    async fn send_list<T: DeserializeOwned>(
        request: RequestBuilder,
    ) -> Result<Vec<T>, DirectoryError> {
        let value: serde_json::Value = Self::send_json(request).await?;
        unwrap_list(value)
    }

    // ── Authentication surface ───────────────────────────────────────────

    /// `GET /users/by-username/{username}`: the email behind a username.
    pub async fn email_for_username(&self, username: &str) -> Result<String, DirectoryError> {
        #[derive(serde::Deserialize)]
        struct EmailLookup {
            email: String,
        }
        let lookup: EmailLookup = Self::send_json(
            self.request(Method::GET, &format!("users/by-username/{username}")),
        )
        .await?;
        Ok(lookup.email)
    }

    /// `POST /auth/login/firebase-token`: exchange an identity-provider
    /// credential for a backend session token plus the backend's profile
    /// view of the user.
    pub async fn exchange_token(&self, id_token: &str) -> Result<LoginResponse, DirectoryError> {
        Self::send_json(
            self.request(Method::POST, "auth/login/firebase-token")
                .json(&serde_json::json!({ "idToken": id_token })),
        )
        .await
    }

    // ── Provider-id keyed records ────────────────────────────────────────

    /// `GET /users/by-firebase-uid/{uid}`: the record linked to a
    /// provider id.
    pub async fn user_by_provider_id(&self, provider_id: &str) -> Result<UserRecord, DirectoryError> {
        Self::send_json(self.request(Method::GET, &format!("users/by-firebase-uid/{provider_id}")))
            .await
    }

    /// `PUT /users/by-firebase-uid/{uid}`: mirror write keyed by provider
    /// id. A `NotFound` result means the record does not exist yet and the
    /// caller should fall back to [`create_user`](Self::create_user).
    pub async fn upsert_by_provider_id(
        &self,
        provider_id: &str,
        update: &UpsertUser,
    ) -> Result<UserRecord, DirectoryError> {
        Self::send_json(
            self.request(Method::PUT, &format!("users/by-firebase-uid/{provider_id}"))
                .json(update),
        )
        .await
    }

    /// `POST /users/by-firebase-uid/{uid}/sync-roles`: ask the backend to
    /// pull current provider claims into the directory record. The repair
    /// mechanism for a mirror that has lagged behind claims.
    pub async fn sync_roles(&self, provider_id: &str) -> Result<UserRecord, DirectoryError> {
        Self::send_json(self.request(
            Method::POST,
            &format!("users/by-firebase-uid/{provider_id}/sync-roles"),
        ))
        .await
    }

    // ── User administration ──────────────────────────────────────────────

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, DirectoryError> {
        Self::send_list(self.request(Method::GET, "users")).await
    }

    pub async fn create_user(&self, user: &CreateUser) -> Result<UserRecord, DirectoryError> {
        Self::send_json(self.request(Method::POST, "users").json(user)).await
    }

    pub async fn update_user(
        &self,
        id: &str,
        update: &UpdateUser,
    ) -> Result<UserRecord, DirectoryError> {
        Self::send_json(self.request(Method::PUT, &format!("users/{id}")).json(update)).await
    }

    /// `PUT /users/{id}/roles`: replace the directory's role assignment.
    /// This changes the mirror only; the user's effective roles follow
    /// their provider claims.
    pub async fn set_user_roles(
        &self,
        id: &str,
        roles: &[String],
    ) -> Result<UserRecord, DirectoryError> {
        Self::send_json(
            self.request(Method::PUT, &format!("users/{id}/roles"))
                .json(&serde_json::json!({ "roles": roles })),
        )
        .await
    }

    /// `PATCH /users/{id}/deactivate`: soft delete: marks the record
    /// inactive without removing the row.
    pub async fn deactivate_user(&self, id: &str) -> Result<UserRecord, DirectoryError> {
        Self::send_json(self.request(Method::PATCH, &format!("users/{id}/deactivate"))).await
    }

    // ── Role and permission directories ──────────────────────────────────

    pub async fn list_roles(&self) -> Result<Vec<RoleRecord>, DirectoryError> {
        Self::send_list(self.request(Method::GET, "roles")).await
    }

    pub async fn get_role(&self, role_id: i64) -> Result<RoleRecord, DirectoryError> {
        Self::send_json(self.request(Method::GET, &format!("roles/{role_id}"))).await
    }

    pub async fn create_role(&self, role: &CreateRole) -> Result<RoleRecord, DirectoryError> {
        Self::send_json(self.request(Method::POST, "roles").json(role)).await
    }

    pub async fn update_role(
        &self,
        role_id: i64,
        update: &UpdateRole,
    ) -> Result<RoleRecord, DirectoryError> {
        Self::send_json(
            self.request(Method::PUT, &format!("roles/{role_id}"))
                .json(update),
        )
        .await
    }

    pub async fn delete_role(&self, role_id: i64) -> Result<(), DirectoryError> {
        let response = self
            .request(Method::DELETE, &format!("roles/{role_id}"))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    pub async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, DirectoryError> {
        Self::send_list(self.request(Method::GET, "permissions")).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    let status = response.status();
    match status {
        StatusCode::NOT_FOUND => Err(DirectoryError::NotFound),
        StatusCode::UNAUTHORIZED => Err(DirectoryError::Unauthorized),
        status if !status.is_success() => {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!(status = %status, "Directory API error");
            Err(DirectoryError::Api {
                status: status.as_u16(),
                message: truncate(message, 256),
            })
        }
        _ => Ok(response),
    }
}

fn truncate(mut message: String, max_len: usize) -> String {
    if message.len() > max_len {
        let mut end = max_len;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

fn unwrap_list<T: DeserializeOwned>(value: serde_json::Value) -> Result<Vec<T>, DirectoryError> {
    let items = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(array @ serde_json::Value::Array(_)) => array,
            Some(single @ serde_json::Value::Object(_)) => serde_json::Value::Array(vec![single]),
            _ => {
                return Err(DirectoryError::Decode(
                    "expected a list or a data envelope".to_string(),
                ));
            }
        },
        _ => {
            return Err(DirectoryError::Decode(
                "expected a list or a data envelope".to_string(),
            ));
        }
    };
    serde_json::from_value(items).map_err(|e| DirectoryError::Decode(e.to_string()))
}
