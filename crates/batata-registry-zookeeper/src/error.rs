//! Error types for the hierarchical node store

use batata_registry_api::RegistryError;

/// Error returned by [`ZkClient`](crate::client::ZkClient) operations
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ZkError {
    #[error("node does not exist: {0}")]
    NoNode(String),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node has children: {0}")]
    NotEmpty(String),

    #[error("ephemeral node cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    #[error("invalid path: {0}")]
    BadArguments(String),

    #[error("session closed")]
    SessionClosed,

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<ZkError> for RegistryError {
    fn from(value: ZkError) -> Self {
        RegistryError::Backend(value.to_string())
    }
}

pub type ZkResult<T> = std::result::Result<T, ZkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ZkError::NoNode("/a".to_string()).to_string(),
            "node does not exist: /a"
        );
        assert_eq!(ZkError::SessionClosed.to_string(), "session closed");
    }

    #[test]
    fn test_into_registry_error() {
        let err: RegistryError = ZkError::NotEmpty("/a".to_string()).into();
        assert!(matches!(err, RegistryError::Backend(msg) if msg == "node has children: /a"));
    }
}
