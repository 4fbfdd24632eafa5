//! Observable authorization state.
//!
//! One process-wide "current user" value. Consumers read it synchronously
//! (guards, view gates) or subscribe for changes; every mutation flows
//! through the claims synchronizer, which is the only module with access to
//! the crate-private writer.

use std::sync::Arc;

use tokio::sync::watch;

use super::principal::Principal;

/// An authenticated (or provisionally restored) session: the principal and
/// the backend bearer token, always held as a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub principal: Principal,
    pub token: String,
}

/// The authorization state machine.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    /// No principal, no cached credential.
    #[default]
    Unauthenticated,

    /// A cached session was restored at process start and has not yet been
    /// re-validated against the identity provider. Read-only UI may treat
    /// this as authenticated to avoid a signed-out flash; privileged
    /// writes should wait for [`SessionState::Authenticated`].
    Restoring(Arc<ActiveSession>),

    /// Principal populated and confirmed through the claims path.
    Authenticated(Arc<ActiveSession>),
}

impl SessionState {
    pub fn session(&self) -> Option<&Arc<ActiveSession>> {
        match self {
            SessionState::Unauthenticated => None,
            SessionState::Restoring(session) | SessionState::Authenticated(session) => {
                Some(session)
            }
        }
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.session().map(|s| &s.principal)
    }

    /// True iff a principal is held and the cached token is non-empty.
    pub fn is_authenticated(&self) -> bool {
        self.session().is_some_and(|s| !s.token.is_empty())
    }

    /// True only once the session has been confirmed through the claims
    /// path, as opposed to optimistically restored from cache.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }
}

/// Cloneable handle to the process-wide authorization state.
///
/// All handles observe the same underlying value. Consumers must re-read on
/// every decision rather than caching a snapshot: the state can change
/// asynchronously at any time (sign-out, token rejection, role refresh).
#[derive(Clone)]
pub struct AuthState {
    tx: Arc<watch::Sender<SessionState>>,
}

impl AuthState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Unauthenticated);
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn principal(&self) -> Option<Principal> {
        self.current().principal().cloned()
    }

    /// The bearer token attached to backend requests, if a session exists.
    pub fn bearer_token(&self) -> Option<String> {
        self.current().session().map(|s| s.token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_authenticated()
    }

    /// AND semantics: true iff a principal exists and holds every required
    /// role.
    pub fn has_role<I, S>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.current().principal() {
            Some(principal) => principal.has_all_roles(required),
            None => false,
        }
    }

    /// OR semantics: true iff a principal exists and holds at least one of
    /// the candidate roles.
    pub fn has_any_role<I, S>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.current().principal() {
            Some(principal) => principal.has_any_role(candidates),
            None => false,
        }
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.tx.send_replace(state);
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(roles: &[&str], token: &str) -> Arc<ActiveSession> {
        Arc::new(ActiveSession {
            principal: Principal::default_for("uid-1", "jdoe@example.com")
                .with_roles(roles.iter().map(|r| r.to_string()).collect()),
            token: token.to_string(),
        })
    }

    #[test]
    fn starts_unauthenticated() {
        let state = AuthState::new();
        assert!(!state.is_authenticated());
        assert!(state.principal().is_none());
        assert!(!state.has_role(["User"]));
        assert!(!state.has_any_role(["User"]));
    }

    #[test]
    fn authenticated_requires_a_non_empty_token() {
        let state = AuthState::new();
        state.set(SessionState::Authenticated(session(&["User"], "tok-1")));
        assert!(state.is_authenticated());

        // Principal held but the token is gone: not authenticated.
        state.set(SessionState::Authenticated(session(&["User"], "")));
        assert!(!state.is_authenticated());
    }

    #[test]
    fn restoring_counts_as_authenticated_but_not_confirmed() {
        let state = AuthState::new();
        state.set(SessionState::Restoring(session(&["User"], "tok-1")));
        assert!(state.is_authenticated());
        assert!(!state.current().is_confirmed());

        state.set(SessionState::Authenticated(session(&["User"], "tok-1")));
        assert!(state.current().is_confirmed());
    }

    #[test]
    fn role_predicates_follow_and_or_semantics() {
        let state = AuthState::new();
        state.set(SessionState::Authenticated(session(
            &["Administrator", "Manager"],
            "tok-1",
        )));
        assert!(state.has_role(["Administrator", "Manager"]));
        assert!(!state.has_role(["Administrator", "Guest"]));
        assert!(state.has_any_role(["Guest", "Manager"]));
        assert!(!state.has_any_role(["Guest"]));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let state = AuthState::new();
        let mut rx = state.subscribe();
        state.set(SessionState::Authenticated(session(&["User"], "tok-1")));
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_authenticated());
    }

    #[test]
    fn cloned_handles_share_the_value() {
        let state = AuthState::new();
        let other = state.clone();
        state.set(SessionState::Authenticated(session(&["User"], "tok-1")));
        assert!(other.is_authenticated());
    }
}
