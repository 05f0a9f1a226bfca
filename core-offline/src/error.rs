use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OfflineError {
    // ========================================================================
    // Admission Errors
    // ========================================================================
    #[error("Insufficient storage: {required} bytes required, {available} available")]
    InsufficientStorage { required: u64, available: u64 },

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Download requires an unmetered connection")]
    RequiresUnmetered,

    // ========================================================================
    // Transfer Errors
    // ========================================================================
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Transfer cancelled")]
    Cancelled,

    // ========================================================================
    // Cache & Registry Errors
    // ========================================================================
    #[error("Cache full: {required} bytes cannot fit in {capacity} bytes")]
    CacheFull { required: u64, capacity: u64 },

    #[error("Registry corruption: {0}")]
    RegistryCorruption(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ========================================================================
    // Platform Errors
    // ========================================================================
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // General Errors
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OfflineError {
    /// Whether a transfer that failed with this error may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            OfflineError::TransferFailed(_)
            | OfflineError::NetworkUnavailable
            | OfflineError::Io(_) => true,
            OfflineError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OfflineError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, OfflineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(OfflineError::TransferFailed("reset".into()).is_transient());
        assert!(OfflineError::Bridge(BridgeError::OperationFailed("HTTP 503".into())).is_transient());
        assert!(!OfflineError::Bridge(BridgeError::NotAvailable("http".into())).is_transient());
        assert!(!OfflineError::CacheFull {
            required: 10,
            capacity: 5
        }
        .is_transient());
        assert!(!OfflineError::InsufficientStorage {
            required: 10,
            available: 5
        }
        .is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = OfflineError::NotFound("m1".into());
        assert_eq!(err.to_string(), "Not found: m1");
        assert!(err.is_not_found());
    }
}
