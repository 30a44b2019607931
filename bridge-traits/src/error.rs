use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Remote object not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),
}

impl BridgeError {
    /// Whether this error means the stored credentials were missing or
    /// rejected, as opposed to a transient transport failure.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            BridgeError::Unauthorized(_) | BridgeError::Http { status: 401, .. }
        )
    }

    /// Whether the remote reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound(_) | BridgeError::Http { status: 404, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
