//! Conditional-rendering gate bound to the session state.

use tokio::sync::watch;

use super::guard::RouteRequirement;
use crate::auth::{AuthState, SessionState};

/// Visibility gate for a piece of UI tied to a role requirement.
///
/// Holds a subscription instead of a cached decision: [`visible`] is
/// recomputed from the live state on every call, so a role refresh or
/// sign-out flips the answer without any re-wiring. [`changed`] lets a
/// renderer await the next state transition and re-query.
///
/// [`visible`]: RoleGate::visible
/// [`changed`]: RoleGate::changed
pub struct RoleGate {
    rx: watch::Receiver<SessionState>,
    requirement: RouteRequirement,
}

impl RoleGate {
    pub fn new(state: &AuthState, requirement: RouteRequirement) -> Self {
        Self {
            rx: state.subscribe(),
            requirement,
        }
    }

    /// Whether the gated content should currently render.
    ///
    /// An empty requirement admits any signed-in principal; without a
    /// session the gate is always closed.
    pub fn visible(&self) -> bool {
        let current = self.rx.borrow();
        let Some(principal) = current.principal() else {
            return false;
        };
        if !current.is_authenticated() {
            return false;
        }
        let all_ok = self.requirement.roles.is_empty()
            || principal.has_all_roles(&self.requirement.roles);
        let any_ok = self.requirement.any_of.is_empty()
            || principal.has_any_role(&self.requirement.any_of);
        all_ok && any_ok
    }

    /// Wait for the next session-state transition. Returns `false` once the
    /// state publisher is gone and no further change can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
