//! Simulated network transport with fault injection.

use async_trait::async_trait;
use skirmish_env::{EnvError, NetworkController, PacketEnvelope, PeerId, PeerTransport, TransportEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::context::lock;

/// Internal message to the central router.
#[derive(Debug)]
pub enum NetworkMessage {
    Packet {
        from: PeerId,
        to: PeerId,
        packet: PacketEnvelope,
    },
    Connect {
        from: PeerId,
        to: PeerId,
    },
}

/// Simulated network interface for one peer.
pub struct SimNetwork {
    local_id: PeerId,

    /// Every peer in the simulation; broadcasts fan out to all of them
    directory: Vec<PeerId>,

    controller: Arc<SimNetworkController>,

    /// Sender to the central router
    tx: mpsc::UnboundedSender<NetworkMessage>,

    /// Events delivered by the router
    rx: Mutex<mpsc::UnboundedReceiver<(PeerId, TransportEvent)>>,
}

impl SimNetwork {
    pub fn new(
        local_id: PeerId,
        directory: Vec<PeerId>,
        controller: Arc<SimNetworkController>,
        tx: mpsc::UnboundedSender<NetworkMessage>,
        rx: mpsc::UnboundedReceiver<(PeerId, TransportEvent)>,
    ) -> Self {
        Self {
            local_id,
            directory,
            controller,
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn route(&self, message: NetworkMessage) -> Result<(), EnvError> {
        self.tx.send(message).map_err(|_| EnvError::network("router closed"))
    }
}

#[async_trait]
impl PeerTransport for SimNetwork {
    async fn send(&self, target: &PeerId, packet: PacketEnvelope) -> Result<(), EnvError> {
        self.route(NetworkMessage::Packet {
            from: self.local_id.clone(),
            to: target.clone(),
            packet,
        })
    }

    async fn broadcast(&self, packet: PacketEnvelope) -> usize {
        let mut queued = 0;
        for peer in self.directory.iter().filter(|p| **p != self.local_id) {
            let message = NetworkMessage::Packet {
                from: self.local_id.clone(),
                to: peer.clone(),
                packet: packet.clone(),
            };
            if self.route(message).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    fn try_recv(&self) -> Option<(PeerId, TransportEvent)> {
        lock(&self.rx).try_recv().ok()
    }

    async fn connect(&self, target: &PeerId) -> Result<(), EnvError> {
        if !self.directory.contains(target) || !self.controller.can_communicate(&self.local_id, target) {
            return Err(EnvError::unreachable(target));
        }
        self.route(NetworkMessage::Connect {
            from: self.local_id.clone(),
            to: target.clone(),
        })
    }

    fn local_id(&self) -> PeerId {
        self.local_id.clone()
    }
}

/// Network controller for fault injection.
#[derive(Default)]
pub struct SimNetworkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(PeerId, PeerId), u64>>,

    /// Active partitions (groups that cannot communicate)
    partitions: Mutex<Vec<(Vec<PeerId>, Vec<PeerId>)>>,

    dead: Mutex<BTreeSet<PeerId>>,
}

impl SimNetworkController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets latency for one direction of a link.
    pub fn set_latency(&self, from: &PeerId, to: &PeerId, latency_ms: u64) {
        lock(&self.link_latency).insert((from.clone(), to.clone()), latency_ms);
    }

    pub fn get_latency(&self, from: &PeerId, to: &PeerId) -> u64 {
        lock(&self.link_latency)
            .get(&(from.clone(), to.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// True if neither end is dead and no partition separates them.
    pub fn can_communicate(&self, from: &PeerId, to: &PeerId) -> bool {
        let dead = lock(&self.dead);
        if dead.contains(from) || dead.contains(to) {
            return false;
        }
        let partitions = lock(&self.partitions);
        !partitions.iter().any(|(a, b)| {
            (a.contains(from) && b.contains(to)) || (b.contains(from) && a.contains(to))
        })
    }

    pub fn partition_count(&self) -> usize {
        lock(&self.partitions).len()
    }
}

impl NetworkController for SimNetworkController {
    fn partition(&self, group_a: &[PeerId], group_b: &[PeerId]) {
        lock(&self.partitions).push((group_a.to_vec(), group_b.to_vec()));
    }

    fn heal_all(&self) {
        lock(&self.partitions).clear();
    }

    fn kill(&self, peer: &PeerId) {
        lock(&self.dead).insert(peer.clone());
    }

    fn is_dead(&self, peer: &PeerId) -> bool {
        lock(&self.dead).contains(peer)
    }
}
