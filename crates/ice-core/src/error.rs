//! Error taxonomy for the orchestration core.

use ice_state::{Domain, StorageError};

/// ICE core errors.
///
/// Per-node failures never surface here — they are captured into the
/// node's `AgentResult`. Only infrastructure and configuration problems
/// propagate to callers.
#[derive(Debug, thiserror::Error)]
pub enum IceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no agent registered for domain: {0}")]
    MissingAgent(Domain),

    #[error("investigation cancelled: {0}")]
    Cancelled(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for ICE core operations.
pub type Result<T> = std::result::Result<T, IceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_wraps_with_context() {
        let err: IceError = StorageError::NotFound {
            investigation_id: "inv-1".into(),
        }
        .into();
        assert!(err.to_string().contains("inv-1"));
    }

    #[test]
    fn missing_agent_names_domain() {
        let err = IceError::MissingAgent(Domain::Device);
        assert!(err.to_string().contains("device"));
    }
}
