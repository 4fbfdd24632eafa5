use thiserror::Error;

/// Errors from the backend user directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// 404: no such record. Callers use this to trigger create-on-demand.
    #[error("record not found")]
    NotFound,

    /// 401: the backend rejected the bearer credential.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success API status.
    #[error("directory API error: {status} {message}")]
    Api { status: u16, message: String },

    /// The directory could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape.
    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DirectoryError::Decode(err.to_string())
        } else {
            DirectoryError::Network(err.to_string())
        }
    }
}
