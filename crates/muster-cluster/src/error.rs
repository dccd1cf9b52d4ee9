//! Cluster error types
//!
//! TigerStyle: Explicit error variants with context.

use muster_registry::RegistryError;
use thiserror::Error;

/// Replication errors
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Peer could not be reached (connect failure, timeout, partition)
    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// Peer answered with a non-success status
    #[error("peer {peer} rejected event with status {status}")]
    PeerRejected { peer: String, status: u16 },

    /// Outbound queue for a peer is full
    #[error("replication queue for {peer} is full")]
    QueueFull { peer: String },

    /// Event could not be encoded or a reply decoded
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// Gossiper not started
    #[error("replication not started")]
    NotStarted,

    /// Gossiper already started
    #[error("replication already started")]
    AlreadyStarted,

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ClusterError {
    pub fn peer_unreachable(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PeerUnreachable {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    pub fn peer_rejected(peer: impl Into<String>, status: u16) -> Self {
        Self::PeerRejected {
            peer: peer.into(),
            status,
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Whether a later attempt may succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::PeerUnreachable { .. } => true,
            Self::PeerRejected { status, .. } => *status >= 500 || *status == 429,
            Self::Registry(e) => e.is_retriable(),
            Self::QueueFull { .. }
            | Self::Serialization { .. }
            | Self::NotStarted
            | Self::AlreadyStarted => false,
        }
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type for cluster operations
pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClusterError::peer_unreachable("http://10.0.0.2:8761", "connection refused");
        assert_eq!(
            err.to_string(),
            "peer http://10.0.0.2:8761 unreachable: connection refused"
        );
    }

    #[test]
    fn test_error_retriable() {
        assert!(ClusterError::peer_unreachable("p", "timeout").is_retriable());
        assert!(ClusterError::peer_rejected("p", 503).is_retriable());
        assert!(!ClusterError::peer_rejected("p", 400).is_retriable());
        assert!(!ClusterError::QueueFull { peer: "p".into() }.is_retriable());
        assert!(!ClusterError::serialization("bad json").is_retriable());
    }
}
