use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Not authorized")]
    Unauthorized,

    #[error("Sync core not initialized")]
    NotInitialized,

    #[error("No sync service selected")]
    NoCurrentService,

    #[error("Unknown sync service: {0}")]
    UnknownService(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sync finished with {} error(s): {}", .errors.len(), .errors.join("; "))]
    Aggregate { errors: Vec<String> },
}

impl SyncError {
    /// Whether this failure should land the service in the `unauthorized`
    /// auth state rather than `error`.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncError::Unauthorized => true,
            SyncError::Bridge(err) => err.is_unauthorized(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
