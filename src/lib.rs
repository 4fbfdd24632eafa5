//! Claims synchronization and role-based authorization core.
//!
//! Reconciles three copies of "who is signed in and what may they do":
//! identity-provider custom claims (authoritative for roles), a backend
//! user directory (profile data and administration), and a local session
//! cache (instant restore across restarts). The result is one observable
//! [`auth::Principal`] that route guards and view gates consume without
//! ever caching a decision.
//!
//! Claims flow one way. Sign-in and every explicit refresh force a fresh
//! provider token so administrative role changes are picked up, the
//! directory mirror is updated best-effort in the background, and a token
//! rejection anywhere tears the whole session down at once.

pub mod auth;
pub mod authz;
pub mod config;
pub mod directory;

#[cfg(test)]
mod tests;
