use thiserror::Error;

use super::session::SessionError;
use crate::directory::DirectoryError;

/// Errors surfaced by the authentication flows.
///
/// Mandatory-path errors (sign-in, forced claims fetch, token exchange)
/// propagate to the caller and terminate the flow. Best-effort paths
/// (directory mirror writes) catch, log, and never produce one of these.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong password or otherwise rejected credential.
    #[error("invalid credential")]
    InvalidCredential,

    /// The login identifier does not correspond to any account.
    #[error("user not found")]
    UserNotFound,

    /// The identity provider rate-limited the account.
    #[error("too many sign-in attempts")]
    TooManyAttempts,

    /// The account exists but has been disabled.
    #[error("account disabled")]
    AccountDisabled,

    /// The identity provider or backend could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The backend rejected the identity credential during token exchange,
    /// or rejected the cached session token on a later request.
    #[error("credential rejected by backend")]
    TokenExchange,

    /// Unexpected identity-provider error code.
    #[error("identity provider error: {0}")]
    Provider(String),

    /// The credential or its claims payload could not be decoded.
    #[error("malformed claims payload: {0}")]
    MalformedClaims(String),

    /// An operation that needs an active session was called without one.
    #[error("no active session")]
    NotSignedIn,

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("session cache error: {0}")]
    Session(#[from] SessionError),
}

impl AuthError {
    /// User-facing notification text: one specific message per mapped
    /// code, a generic fallback for everything else.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredential => "Incorrect email or password.",
            AuthError::UserNotFound => "Username or email not found.",
            AuthError::TooManyAttempts => "Too many attempts. Please try again later.",
            AuthError::AccountDisabled => "This account has been disabled.",
            AuthError::TokenExchange => "Sign-in was rejected by the server.",
            AuthError::Network(_) | AuthError::Directory(DirectoryError::Network(_)) => {
                "Cannot reach the server. Check your connection and try again."
            }
            _ => "Sign-in failed. Please try again.",
        }
    }
}
