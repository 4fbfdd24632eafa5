//! Authorization surfaces: route guarding and view gating.
//!
//! Both consume the session state published by the claims synchronizer and
//! never cache a decision.

mod gate;
mod guard;

pub use gate::RoleGate;
pub use guard::{GuardDecision, RouteGuard, RouteRequirement};
