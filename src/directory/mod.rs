//! Backend user directory: REST client and wire types.
//!
//! The directory owns user profile records, role definitions, and
//! permission definitions, and mirrors role membership for administration
//! screens. It is never authoritative for role decisions; those always
//! derive from identity-provider claims.

mod client;
mod error;
mod types;

pub use client::DirectoryClient;
pub use error::DirectoryError;
pub use types::{
    CreateRole, CreateUser, LoginResponse, PermissionRecord, RoleRecord, UpdateRole, UpdateUser,
    UpsertUser, UserRecord,
};
