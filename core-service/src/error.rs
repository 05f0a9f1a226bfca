use bridge_traits::BridgeError;
use core_offline::OfflineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Offline error: {0}")]
    Offline(#[from] OfflineError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(err: core_runtime::Error) -> Self {
        match err {
            core_runtime::Error::CapabilityMissing {
                capability,
                message,
            } => CoreError::CapabilityMissing {
                capability,
                message,
            },
            other => CoreError::InitializationFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_capability_errors_keep_their_shape() {
        let err: CoreError = core_runtime::Error::CapabilityMissing {
            capability: "NetworkMonitor".to_string(),
            message: "inject one".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::CapabilityMissing { ref capability, .. } if capability == "NetworkMonitor"));

        let err: CoreError = core_runtime::Error::Config("bad".to_string()).into();
        assert!(matches!(err, CoreError::InitializationFailed(_)));
    }
}
