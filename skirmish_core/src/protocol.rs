//! Wire messages exchanged between peers.
//!
//! Messages are JSON with a `type` tag, carried as the payload of a
//! [`PacketEnvelope`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use skirmish_env::{PacketEnvelope, PeerId};

use crate::action::Action;
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// A player command, broadcast by its issuer
    Action { action: Action },
    /// Periodic or resync snapshot from the host
    FullState { snapshot: Snapshot },
    /// Ask the host for a full state
    Request { what: RequestKind },
    /// Host's reply to a `Request`
    Response { snapshot: Snapshot },
    Heartbeat { tick: u64, version: u64 },
    /// Sent by a freshly promoted host
    NewHost { host: PeerId },
    LobbyUpdate { peers: Vec<PeerId> },
    StartGame {
        host: PeerId,
        peers: Vec<PeerId>,
        snapshot: Snapshot,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    FullState,
}

impl PeerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Action { .. } => "ACTION",
            PeerMessage::FullState { .. } => "FULL_STATE",
            PeerMessage::Request { .. } => "REQUEST",
            PeerMessage::Response { .. } => "RESPONSE",
            PeerMessage::Heartbeat { .. } => "HEARTBEAT",
            PeerMessage::NewHost { .. } => "NEW_HOST",
            PeerMessage::LobbyUpdate { .. } => "LOBBY_UPDATE",
            PeerMessage::StartGame { .. } => "START_GAME",
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed packet ({size} bytes): {source}")]
    Decode {
        size: usize,
        #[source]
        source: serde_json::Error,
    },
}

pub fn encode(message: &PeerMessage, timestamp_ms: u64) -> Result<PacketEnvelope, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(|source| ProtocolError::Encode {
        kind: message.kind(),
        source,
    })?;
    Ok(PacketEnvelope::new(payload, timestamp_ms))
}

pub fn decode(packet: &PacketEnvelope) -> Result<PeerMessage, ProtocolError> {
    serde_json::from_slice(&packet.payload).map_err(|source| ProtocolError::Decode {
        size: packet.size(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionFactory, ActionKind};
    use crate::model::{GeoPoint, TargetRef, WorldState};

    #[test]
    fn test_action_message_survives_the_wire() {
        let mut factory = ActionFactory::new("peer-01");
        let action = factory.create(
            ActionKind::Attack {
                unit_ids: vec!["u1".into()],
                target: TargetRef::Poi("c1".into()),
            },
            1234,
        );
        let msg = PeerMessage::Action { action };
        let packet = encode(&msg, 99).unwrap();
        assert_eq!(packet.timestamp_ms, 99);
        assert_eq!(decode(&packet).unwrap(), msg);
    }

    #[test]
    fn test_tag_is_screaming_snake_case() {
        let packet = encode(&PeerMessage::NewHost { host: PeerId::new("A") }, 0).unwrap();
        let text = String::from_utf8(packet.payload).unwrap();
        assert!(text.contains("\"type\":\"NEW_HOST\""));

        let heartbeat: PeerMessage = serde_json::from_str(r#"{"type":"HEARTBEAT","tick":7,"version":2}"#).unwrap();
        assert_eq!(heartbeat, PeerMessage::Heartbeat { tick: 7, version: 2 });
    }

    #[test]
    fn test_full_state_carries_snapshot() {
        let mut state = WorldState::default();
        state.version = 3;
        state.pois.insert(
            "c".into(),
            crate::model::Poi::new("c", crate::model::PoiKind::City, GeoPoint::new(1.0, 1.0), 2),
        );
        let msg = PeerMessage::FullState {
            snapshot: Snapshot::capture(&state),
        };
        let decoded = decode(&encode(&msg, 0).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let packet = PacketEnvelope::new(b"{not json".to_vec(), 0);
        let err = decode(&packet).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode { size: 9, .. }));
    }
}
