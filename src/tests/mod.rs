//! Cross-module flow tests.
//!
//! Exercises the full sign-in, restore, refresh, and teardown paths with
//! both remote collaborators mocked.

mod session_flows;
