//! Common types for the Skirmish environment abstraction.

use serde::{Deserialize, Serialize};

/// Unique identifier for a peer in a match.
///
/// Ordering is lexicographic on the string form. Host election relies on
/// it: every peer sorts the same ids the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show at most 8 chars for readability
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        write!(f, "{}", &self.0[..end])
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Envelope for packets transmitted between peers.
///
/// The payload is opaque bytes; the game layer owns the message schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketEnvelope {
    /// The encoded message bytes
    pub payload: Vec<u8>,

    /// Timestamp when the packet was created (sender's clock)
    pub timestamp_ms: u64,
}

impl PacketEnvelope {
    /// Creates a new envelope from payload bytes.
    pub fn new(payload: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    /// Returns the payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Something the transport observed about a remote peer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A packet arrived from the peer.
    Message(PacketEnvelope),

    /// The peer opened a connection to us (or we to it).
    Connected,

    /// The peer's connection dropped.
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_ordering_is_lexicographic() {
        let mut ids = vec![PeerId::new("C"), PeerId::new("A"), PeerId::new("B")];
        ids.sort();
        assert_eq!(ids, vec![PeerId::new("A"), PeerId::new("B"), PeerId::new("C")]);
    }

    #[test]
    fn test_peer_id_display_truncates() {
        let id = PeerId::new("0123456789abcdef");
        assert_eq!(id.to_string(), "01234567");
        assert_eq!(PeerId::new("A").to_string(), "A");
    }
}
