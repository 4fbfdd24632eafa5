//! Role vocabulary and normalization.
//!
//! Role names arrive from two independently-writable sources (identity
//! provider custom claims and the backend directory) with inconsistent
//! casing and one known synonym. Every name is normalized here as it
//! crosses into the crate; nothing past this module sees the raw external
//! shapes.

use serde::{Deserialize, Serialize};

/// Canonical role names.
pub const ADMINISTRATOR: &str = "Administrator";
pub const MANAGER: &str = "Manager";
pub const USER: &str = "User";
pub const GUEST: &str = "Guest";

/// The role granted when a claim set carries no `roles` entry at all.
pub const BASE_ROLE: &str = USER;

/// The historical fixed vocabulary. The directory is the ultimate source of
/// role definitions and may contain more; names outside this list are
/// passed through rather than dropped.
pub const CANONICAL_ROLES: [&str; 4] = [ADMINISTRATOR, MANAGER, USER, GUEST];

/// The `roles` claim as the identity provider issues it: a single string or
/// an array of strings. Absence is modelled as `Option<RolesClaim>` at the
/// claim-set level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RolesClaim {
    One(String),
    Many(Vec<String>),
}

impl RolesClaim {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            RolesClaim::One(role) => vec![role],
            RolesClaim::Many(roles) => roles,
        }
    }
}

/// Normalize a single role name.
///
/// Matching against the canonical vocabulary is case-insensitive, and the
/// historical `Admin` synonym maps to `Administrator`. A name outside the
/// vocabulary is a legitimate directory-defined role and is returned
/// unchanged (trimmed), with a warning so vocabulary drift shows up in the
/// logs.
pub fn normalize_role(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("admin") {
        return ADMINISTRATOR.to_string();
    }
    for canonical in CANONICAL_ROLES {
        if trimmed.eq_ignore_ascii_case(canonical) {
            return canonical.to_string();
        }
    }
    tracing::warn!(
        role = trimmed,
        "Role name outside the known vocabulary, passing through unchanged"
    );
    trimmed.to_string()
}

/// Normalize a collection of role names, dropping empty entries and
/// duplicates while keeping first-occurrence order.
pub fn normalize_roles<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in raw {
        let normalized = normalize_role(name.as_ref());
        if normalized.is_empty() {
            continue;
        }
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

/// Normalize the raw `roles` claim. An absent claim grants the base role;
/// an explicitly empty array stays empty.
pub fn roles_from_claim(claim: Option<RolesClaim>) -> Vec<String> {
    match claim {
        Some(claim) => normalize_roles(claim.into_vec()),
        None => vec![BASE_ROLE.to_string()],
    }
}
