//! Claims synchronization.
//!
//! Role membership is always ultimately derived from the identity
//! provider's claim set, never from the backend directory. The directory is
//! a best-effort mirror kept warm for administration screens; it supplies
//! roles only on the provider-outage fallback path, and those are
//! provisional until the next successful claims fetch.
//!
//! This is the only component that writes `AuthState`. The three state
//! copies it reconciles (provider claims, directory record, local cache)
//! are independently writable with no transactional guarantee, so every
//! flow here is ordered: mandatory steps run strictly sequentially and
//! abort cleanly, mirror writes are fire-and-forget.

use std::{future::Future, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use super::{
    error::AuthError,
    idp::{Credential, HttpIdentityProvider, IdentityProvider},
    principal::Principal,
    roles,
    session::{FileSessionStore, MemorySessionStore, SessionSnapshot, SharedSessionStore},
    state::{ActiveSession, AuthState, SessionState},
};
use crate::{
    config::ClaimgateConfig,
    directory::{CreateUser, DirectoryClient, DirectoryError, UpsertUser, UserRecord},
};

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"));

/// Reconciles identity-provider claims, the backend directory, and the
/// local session cache into one observable [`Principal`].
pub struct ClaimsSynchronizer {
    idp: Arc<dyn IdentityProvider>,
    directory: Arc<DirectoryClient>,
    store: SharedSessionStore,
    state: AuthState,
    /// Live provider credential for the current session. Not persisted; a
    /// cold restore re-validates through [`revalidate`](Self::revalidate)
    /// instead.
    credential: Mutex<Option<Credential>>,
}

impl ClaimsSynchronizer {
    pub fn new(
        idp: Arc<dyn IdentityProvider>,
        directory: Arc<DirectoryClient>,
        store: SharedSessionStore,
        state: AuthState,
    ) -> Self {
        Self {
            idp,
            directory,
            store,
            state,
            credential: Mutex::new(None),
        }
    }

    /// Assemble the full stack from configuration: HTTP identity provider,
    /// state-signed directory client, and a file-backed session cache when
    /// a cache path is configured (memory-only otherwise).
    pub fn from_config(config: &ClaimgateConfig) -> Self {
        let state = AuthState::new();
        let idp = Arc::new(HttpIdentityProvider::new(config.idp.clone()));
        let directory = Arc::new(DirectoryClient::with_state(&config.directory, state.clone()));
        let store: SharedSessionStore = match &config.session.cache_path {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::new()),
        };
        Self::new(idp, directory, store, state)
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    /// Sign in with a username or an email address.
    ///
    /// A username is resolved to its email through the directory first; if
    /// the directory does not know it, sign-in fails without ever calling
    /// the identity provider. Any failure after the provider sign-in signs
    /// the provider session back out, so no partial session is ever cached.
    pub async fn sign_in(
        &self,
        username_or_email: &str,
        password: &str,
    ) -> Result<Arc<ActiveSession>, AuthError> {
        let email = self.resolve_login_identifier(username_or_email).await?;
        let credential = self.idp.sign_in(&email, password).await?;
        match self.complete_sign_in(credential.clone()).await {
            Ok(session) => Ok(session),
            Err(err) => {
                if let Err(out_err) = self.idp.sign_out(&credential).await {
                    tracing::debug!(error = %out_err, "Provider sign-out after aborted sign-in failed");
                }
                Err(err)
            }
        }
    }

    async fn resolve_login_identifier(&self, input: &str) -> Result<String, AuthError> {
        let input = input.trim();
        if EMAIL_PATTERN.is_match(input) {
            return Ok(input.to_string());
        }
        tracing::debug!(username = input, "Resolving username through the directory");
        match self.directory.email_for_username(input).await {
            Ok(email) => Ok(email),
            Err(DirectoryError::NotFound) => Err(AuthError::UserNotFound),
            Err(DirectoryError::Network(e)) => Err(AuthError::Network(e)),
            Err(err) => Err(err.into()),
        }
    }

    async fn complete_sign_in(
        &self,
        credential: Credential,
    ) -> Result<Arc<ActiveSession>, AuthError> {
        // The forced refresh is mandatory: a token cached from before an
        // administrative role change would carry the old roles.
        let fetch = self.idp.fetch_claims(&credential, true).await?;
        let credential = fetch.refreshed.unwrap_or(credential);
        let claim_roles = roles::roles_from_claim(fetch.claims.roles);

        let login = self
            .directory
            .exchange_token(&credential.id_token)
            .await
            .map_err(|err| match err {
                DirectoryError::Unauthorized => AuthError::TokenExchange,
                DirectoryError::Network(e) => AuthError::Network(e),
                other => other.into(),
            })?;

        // Profile fields from the backend response; roles exclusively from
        // the claim set just fetched. The backend's own role field, if
        // present, is discarded.
        let email = login
            .user
            .email
            .unwrap_or_else(|| credential.email.clone());
        let name = login
            .user
            .full_name
            .or(fetch.claims.name)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let principal = Principal {
            id: Some(login.user.id),
            provider_id: login
                .user
                .provider_id
                .unwrap_or_else(|| credential.provider_id.clone()),
            username: login.user.user_name,
            name,
            email,
            roles: claim_roles,
            active: login.user.is_active.unwrap_or(true),
            created_at: login.user.created_at,
        };

        let session = self
            .publish_session(principal, login.token, true)
            .await?;
        *self.credential.lock().await = Some(credential);
        self.spawn_mirror_upsert(session.principal.clone());

        tracing::info!(
            provider_id = %session.principal.provider_id,
            roles = ?session.principal.roles,
            "Sign-in complete"
        );
        Ok(session)
    }

    /// Restore a cached session at process start.
    ///
    /// Publishes [`SessionState::Restoring`] immediately, with no network
    /// round-trip, so the UI does not flash a signed-out frame; the
    /// directory mirror is warmed in the background. Idempotent: re-running
    /// with a session already populated is a no-op apart from the harmless
    /// repeated background upsert.
    pub async fn restore(&self) -> Result<bool, AuthError> {
        if let Some(session) = self.state.current().session() {
            self.spawn_mirror_upsert(session.principal.clone());
            return Ok(true);
        }
        let Some(snapshot) = self.store.load().await? else {
            self.state.set(SessionState::Unauthenticated);
            return Ok(false);
        };
        let session = Arc::new(ActiveSession {
            principal: snapshot.principal,
            token: snapshot.token,
        });
        self.state.set(SessionState::Restoring(session.clone()));
        self.spawn_mirror_upsert(session.principal.clone());
        tracing::debug!(provider_id = %session.principal.provider_id, "Restored cached session");
        Ok(true)
    }

    /// Re-fetch claims with a forced credential refresh and replace the
    /// principal's role set in place. No other principal field changes and
    /// no re-authentication happens. Invoked after any action that changes
    /// the current user's own roles.
    pub async fn refresh_claims(&self) -> Result<Arc<ActiveSession>, AuthError> {
        let current = self.state.current();
        let Some(active) = current.session() else {
            return Err(AuthError::NotSignedIn);
        };

        let mut guard = self.credential.lock().await;
        let Some(credential) = guard.as_ref() else {
            return Err(AuthError::NotSignedIn);
        };
        let fetch = self.idp.fetch_claims(credential, true).await?;
        if let Some(rotated) = fetch.refreshed {
            *guard = Some(rotated);
        }
        drop(guard);

        let refreshed_roles = roles::roles_from_claim(fetch.claims.roles);
        let principal = active.principal.clone().with_roles(refreshed_roles);
        self.publish_session(principal, active.token.clone(), true)
            .await
    }

    /// Promote a restored session to confirmed through the claims path.
    ///
    /// When the identity provider is unreachable (or no in-memory
    /// credential exists after a cold restore), fall back to the directory
    /// record for the provider id; a missing record synthesizes a minimal
    /// default principal and mirrors it out. Roles obtained from the
    /// directory are provisional: the session stays tagged `Restoring` and
    /// is replaced at the next successful claims fetch.
    pub async fn revalidate(&self) -> Result<Arc<ActiveSession>, AuthError> {
        match self.refresh_claims().await {
            Ok(session) => Ok(session),
            Err(AuthError::NotSignedIn) if self.state.current().session().is_none() => {
                Err(AuthError::NotSignedIn)
            }
            Err(AuthError::NotSignedIn) | Err(AuthError::Network(_)) => {
                self.restore_from_directory().await
            }
            Err(other) => Err(other),
        }
    }

    async fn restore_from_directory(&self) -> Result<Arc<ActiveSession>, AuthError> {
        let current = self.state.current();
        let Some(active) = current.session() else {
            return Err(AuthError::NotSignedIn);
        };
        let provider_id = active.principal.provider_id.clone();
        tracing::warn!(
            provider_id = %provider_id,
            "Claims unavailable, restoring roles from the directory record"
        );

        match self.directory.user_by_provider_id(&provider_id).await {
            Ok(record) => self.apply_directory_record(active, record).await,
            Err(DirectoryError::NotFound) => {
                let principal = Principal::default_for(provider_id, active.principal.email.clone());
                let session = self
                    .publish_session(principal.clone(), active.token.clone(), false)
                    .await?;
                mirror_principal(self.directory.clone(), principal).await;
                Ok(session)
            }
            Err(DirectoryError::Unauthorized) => {
                self.handle_unauthorized().await;
                Err(AuthError::TokenExchange)
            }
            Err(DirectoryError::Network(e)) => Err(AuthError::Network(e)),
            Err(err) => Err(err.into()),
        }
    }

    /// Build a provisional principal from a directory record and publish
    /// it. Roles from the record are normalized; the session stays tagged
    /// as restored until the next successful claims fetch.
    async fn apply_directory_record(
        &self,
        active: &ActiveSession,
        record: UserRecord,
    ) -> Result<Arc<ActiveSession>, AuthError> {
        let directory_roles = roles::normalize_roles(record.roles.unwrap_or_default());
        let principal = Principal {
            id: Some(record.id),
            provider_id: record
                .provider_id
                .unwrap_or_else(|| active.principal.provider_id.clone()),
            username: record.user_name,
            name: record
                .full_name
                .unwrap_or_else(|| active.principal.name.clone()),
            email: record
                .email
                .unwrap_or_else(|| active.principal.email.clone()),
            roles: directory_roles,
            active: record.is_active.unwrap_or(true),
            created_at: record.created_at,
        };
        self.publish_session(principal, active.token.clone(), false)
            .await
    }

    /// Sign out: discard the provider credential and clear the cached pair
    /// and the state together.
    pub async fn sign_out(&self) {
        if let Some(credential) = self.credential.lock().await.take() {
            if let Err(err) = self.idp.sign_out(&credential).await {
                tracing::debug!(error = %err, "Provider sign-out failed, clearing local session anyway");
            }
        }
        self.clear_local_session().await;
    }

    /// Authorization-rejected hook: the backend refused the cached bearer
    /// token on an authenticated request. Clears the session exactly like
    /// sign-out, except it is a no-op when already signed out so repeated
    /// rejections cannot loop.
    pub async fn handle_unauthorized(&self) {
        if self.state.current().session().is_none() {
            return;
        }
        tracing::info!("Backend rejected the session token, clearing cached session");
        let _ = self.credential.lock().await.take();
        self.clear_local_session().await;
    }

    /// Run an authorized directory call against the current session. A
    /// `401` clears the cached session (the global-interceptor behavior);
    /// every other error passes through untouched.
    pub async fn with_session<T, F, Fut>(&self, call: F) -> Result<T, AuthError>
    where
        F: FnOnce(Arc<ActiveSession>) -> Fut,
        Fut: Future<Output = Result<T, DirectoryError>>,
    {
        let current = self.state.current();
        let Some(session) = current.session().cloned() else {
            return Err(AuthError::NotSignedIn);
        };
        match call(session).await {
            Ok(value) => Ok(value),
            Err(DirectoryError::Unauthorized) => {
                self.handle_unauthorized().await;
                Err(AuthError::TokenExchange)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ask the backend to pull the current user's provider claims into the
    /// directory record, then refresh the in-memory role set. The explicit
    /// repair mechanism for a mirror that has lagged.
    ///
    /// With a live provider credential the refreshed claims win, as
    /// everywhere else. After a cold restore no credential exists and the
    /// claims path cannot run, so the repaired record itself supplies the
    /// roles, provisionally.
    pub async fn resync_directory(&self) -> Result<Arc<ActiveSession>, AuthError> {
        let current = self.state.current();
        let Some(active) = current.session() else {
            return Err(AuthError::NotSignedIn);
        };
        let record = self
            .directory
            .sync_roles(&active.principal.provider_id)
            .await?;
        match self.refresh_claims().await {
            Err(AuthError::NotSignedIn) => self.apply_directory_record(active, record).await,
            other => other,
        }
    }

    async fn clear_local_session(&self) {
        if let Err(err) = self.store.clear().await {
            tracing::warn!(error = %err, "Failed to clear the session cache");
        }
        self.state.set(SessionState::Unauthenticated);
    }

    /// Persist the pair and publish the new state, in that order: a crash
    /// between the two leaves a cache the next start can restore, never a
    /// live state with no cache behind it.
    async fn publish_session(
        &self,
        principal: Principal,
        token: String,
        confirmed: bool,
    ) -> Result<Arc<ActiveSession>, AuthError> {
        let snapshot = SessionSnapshot {
            token: token.clone(),
            principal: principal.clone(),
        };
        self.store.store(&snapshot).await?;
        let session = Arc::new(ActiveSession { principal, token });
        self.state.set(if confirmed {
            SessionState::Authenticated(session.clone())
        } else {
            SessionState::Restoring(session.clone())
        });
        Ok(session)
    }

    fn spawn_mirror_upsert(&self, principal: Principal) {
        let directory = self.directory.clone();
        tokio::spawn(async move {
            mirror_principal(directory, principal).await;
        });
    }
}

/// Best-effort mirror write so administration listings reflect current
/// claims. A missing record is created instead of updated. Failures are
/// logged and swallowed; the active session is never affected.
async fn mirror_principal(directory: Arc<DirectoryClient>, principal: Principal) {
    let upsert = UpsertUser {
        name: principal.name.clone(),
        email: principal.email.clone(),
        roles: Some(principal.roles.clone()),
    };
    let result = match directory
        .upsert_by_provider_id(&principal.provider_id, &upsert)
        .await
    {
        Err(DirectoryError::NotFound) => directory
            .create_user(&CreateUser {
                provider_id: principal.provider_id.clone(),
                name: principal.name.clone(),
                email: principal.email.clone(),
                roles: principal.roles.clone(),
            })
            .await
            .map(|_| ()),
        other => other.map(|_| ()),
    };
    if let Err(err) = result {
        tracing::warn!(
            error = %err,
            provider_id = %principal.provider_id,
            "Directory mirror upsert failed"
        );
    }
}
