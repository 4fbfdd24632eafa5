//! The authenticated user's in-memory representation.
//!
//! A `Principal` is "who is signed in" for every authorization decision.
//! Profile fields come from the backend directory; the role list always
//! comes from identity-provider claims (see the claims synchronizer, the
//! only component allowed to construct or mutate one).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::roles;

/// The authenticated identity as known to the application.
///
/// The role list is always present, even when empty; `#[serde(default)]`
/// keeps that invariant across deserialization of older cached snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Directory record id, when the backend knows this user.
    #[serde(default)]
    pub id: Option<String>,

    /// Identity-provider unique id.
    pub provider_id: String,

    /// Login username, when distinct from the email.
    #[serde(default)]
    pub username: Option<String>,

    /// Display name.
    pub name: String,

    pub email: String,

    /// Normalized role names.
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Principal {
    /// Minimal principal synthesized when neither claims nor a directory
    /// record are available: base role, display name derived from the
    /// email local-part.
    pub fn default_for(provider_id: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        let local_part = email.split('@').next().unwrap_or_default();
        let name = if local_part.is_empty() {
            roles::BASE_ROLE.to_string()
        } else {
            local_part.to_string()
        };
        Self {
            id: None,
            provider_id: provider_id.into(),
            username: None,
            name,
            email,
            roles: vec![roles::BASE_ROLE.to_string()],
            active: true,
            created_at: None,
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// AND semantics: true iff every required role is present.
    pub fn has_all_roles<I, S>(&self, required: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        required.into_iter().all(|r| self.has_role(r.as_ref()))
    }

    /// OR semantics: true iff at least one candidate role is present.
    pub fn has_any_role<I, S>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        candidates.into_iter().any(|r| self.has_role(r.as_ref()))
    }

    /// Replace the role list, leaving identity and profile fields alone.
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            id: Some("42".to_string()),
            provider_id: "uid-1".to_string(),
            username: Some("jdoe".to_string()),
            name: "Jane Doe".to_string(),
            email: "jdoe@example.com".to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            active: true,
            created_at: None,
        }
    }

    #[test]
    fn has_all_roles_requires_every_name() {
        let p = principal(&["Administrator", "Manager"]);
        assert!(p.has_all_roles(["Administrator", "Manager"]));
        assert!(p.has_all_roles(["Manager"]));
        assert!(!p.has_all_roles(["Administrator", "Guest"]));
    }

    #[test]
    fn has_any_role_requires_at_least_one() {
        let p = principal(&["Manager"]);
        assert!(p.has_any_role(["Administrator", "Manager"]));
        assert!(!p.has_any_role(["Administrator", "Guest"]));
    }

    #[test]
    fn default_principal_derives_name_from_email_local_part() {
        let p = Principal::default_for("uid-9", "nguyen.a@example.com");
        assert_eq!(p.name, "nguyen.a");
        assert_eq!(p.roles, vec!["User"]);
        assert!(p.active);
        assert!(p.id.is_none());
    }

    #[test]
    fn with_roles_only_touches_the_role_list() {
        let p = principal(&["User"]);
        let updated = p.clone().with_roles(vec!["Administrator".to_string()]);
        assert_eq!(updated.roles, vec!["Administrator"]);
        assert_eq!(updated.id, p.id);
        assert_eq!(updated.name, p.name);
        assert_eq!(updated.email, p.email);
        assert_eq!(updated.provider_id, p.provider_id);
    }

    #[test]
    fn deserialization_defaults_missing_roles_to_empty() {
        let p: Principal = serde_json::from_value(serde_json::json!({
            "providerId": "uid-1",
            "name": "Jane",
            "email": "jane@example.com",
        }))
        .unwrap();
        assert!(p.roles.is_empty());
        assert!(p.active);
    }
}
