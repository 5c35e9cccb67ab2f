//! Peer transport abstraction for Skirmish.

use crate::error::EnvError;
use crate::types::{PacketEnvelope, PeerId, TransportEvent};
use async_trait::async_trait;

/// Reliable-ordered, peer-addressable message delivery.
///
/// # Implementations
///
/// - **Production**: wraps a WebRTC/TCP mesh
/// - **Simulation**: channel-based with partitions and peer kills
///
/// # Packet Flow
///
/// ```text
/// Peer A                     Transport                    Peer B
///   |                           |                          |
///   |-- send(B, packet) ------->|                          |
///   |                           |-- [in order, per link] ->|
///   |                           |                          |-- try_recv() -> Message
/// ```
///
/// Connect/disconnect callbacks surface as [`TransportEvent::Connected`] and
/// [`TransportEvent::Disconnected`] in the same queue as messages, so the
/// peer's tick loop observes them in arrival order.
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    /// Sends a packet to one peer.
    ///
    /// # Returns
    /// * `Ok(())` - Packet queued for delivery
    /// * `Err(EnvError::Network)` - Immediate send failure
    async fn send(&self, target: &PeerId, packet: PacketEnvelope) -> Result<(), EnvError>;

    /// Broadcasts a packet to every connected peer except the sender.
    ///
    /// Returns the number of peers the packet was queued for.
    async fn broadcast(&self, packet: PacketEnvelope) -> usize;

    /// Pops the next inbound event without waiting.
    ///
    /// The tick loop drains this at the start of every tick and must never
    /// block on the network.
    fn try_recv(&self) -> Option<(PeerId, TransportEvent)>;

    /// Opens a connection to `target`.
    ///
    /// This is the only transport operation a peer awaits; callers bound it
    /// with a timeout.
    async fn connect(&self, target: &PeerId) -> Result<(), EnvError>;

    /// Returns this peer's ID.
    fn local_id(&self) -> PeerId;
}

/// Fault-injection controls for simulated transports.
pub trait NetworkController: Send + Sync {
    /// Creates a network partition between two peer sets.
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]);

    /// Heals all partitions.
    fn heal_all(&self);

    /// Permanently removes a peer (crash / tab closed).
    fn kill(&self, peer: &PeerId);

    /// Returns true if the peer has been killed.
    fn is_dead(&self, peer: &PeerId) -> bool;
}
