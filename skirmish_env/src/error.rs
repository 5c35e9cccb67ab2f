//! Error types for the Skirmish environment abstraction.

use thiserror::Error;

use crate::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// The transport itself failed (router gone, socket closed)
    #[error("network error: {0}")]
    Network(String),

    /// Peer is dead, partitioned away or was never known
    #[error("peer {0} unreachable")]
    Unreachable(PeerId),

    #[error("timed out after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn unreachable(peer: &PeerId) -> Self {
        Self::Unreachable(peer.clone())
    }

    /// True if the peer may come back and a retry could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let peer = PeerId::new("peer-01");
        assert!(EnvError::unreachable(&peer).is_transient());
        assert!(EnvError::Timeout(20).is_transient());
        assert!(!EnvError::network("router closed").is_transient());
        assert_eq!(EnvError::Timeout(20).to_string(), "timed out after 20ms");
    }
}
