//! Wire types for the backend user directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user record as the directory returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,

    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Identity-provider uid, when the record is linked to one.
    #[serde(default, alias = "firebaseUid")]
    pub provider_id: Option<String>,

    /// The directory's view of the user's roles. Advisory only: role
    /// decisions always come from provider claims.
    #[serde(default)]
    pub roles: Option<Vec<String>>,

    #[serde(default)]
    pub is_active: Option<bool>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Response of the identity-token login exchange: a backend-issued bearer
/// token plus the backend's view of the user profile.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: UserRecord,
}

/// Body of the upsert-by-provider-uid mirror write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUser {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Body of the create-user fallback when the upsert target does not exist.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    #[serde(rename = "firebaseUid")]
    pub provider_id: String,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
}

/// Partial profile update for an existing record.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A role definition from the role directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub role_id: i64,
    pub role_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRole {
    pub role_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRole {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A permission definition from the permission directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub permission_id: i64,
    pub permission_name: String,
    #[serde(default)]
    pub description: Option<String>,
}
