//! Route-level access decisions.

use serde::{Deserialize, Serialize};

use crate::auth::AuthState;

/// Declarative access requirement attached to a route.
///
/// `roles` uses AND semantics, `any_of` uses OR semantics; when both are
/// present both must pass. Empty lists impose nothing, so an all-default
/// requirement only checks that a session exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteRequirement {
    /// Every listed role must be held.
    pub roles: Vec<String>,

    /// At least one listed role must be held.
    pub any_of: Vec<String>,

    /// Where a signed-in but under-privileged user is sent. Unauthenticated
    /// users always go to the guard's fallback instead.
    pub redirect_to: Option<String>,
}

impl RouteRequirement {
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn all_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn any_of<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            any_of: roles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }
}

/// The outcome of a guard check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Evaluates [`RouteRequirement`]s against the live session state.
///
/// Stateless apart from the state handle; every check re-reads the current
/// session, so a decision is never stale.
#[derive(Clone)]
pub struct RouteGuard {
    state: AuthState,
    fallback: String,
}

impl RouteGuard {
    /// Default fallback target is the application root.
    pub fn new(state: AuthState) -> Self {
        Self::with_fallback(state, "/")
    }

    pub fn with_fallback(state: AuthState, fallback: impl Into<String>) -> Self {
        Self {
            state,
            fallback: fallback.into(),
        }
    }

    /// Decide access for one navigation.
    ///
    /// Unauthenticated users are sent to the fallback regardless of any
    /// `redirect_to` on the requirement; that field only applies to users
    /// who are signed in but lack the roles.
    pub fn check(&self, requirement: &RouteRequirement) -> GuardDecision {
        let current = self.state.current();
        let principal = match current.principal() {
            Some(principal) if current.is_authenticated() => principal,
            _ => {
                tracing::debug!("Route denied, no session");
                return GuardDecision::Redirect(self.fallback.clone());
            }
        };

        let all_ok = requirement.roles.is_empty() || principal.has_all_roles(&requirement.roles);
        let any_ok = requirement.any_of.is_empty() || principal.has_any_role(&requirement.any_of);
        if all_ok && any_ok {
            return GuardDecision::Allow;
        }

        tracing::debug!(
            roles = ?principal.roles,
            required = ?requirement.roles,
            any_of = ?requirement.any_of,
            "Route denied, missing roles"
        );
        GuardDecision::Redirect(
            requirement
                .redirect_to
                .clone()
                .unwrap_or_else(|| self.fallback.clone()),
        )
    }
}
