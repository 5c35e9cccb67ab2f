//! SimWorld - the simulation harness container.

use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use skirmish_core::{
    skirmish_map, skirmish_map_placed, skirmish_terrain, Action, ActionKind, MatchConfig, MatchPeer, PeerRuntime,
    SessionError, SetupError, Terrain, WorldState,
};
use skirmish_env::{MatchContext, NetworkController, PeerId, TransportEvent};

use crate::context::SimContext;
use crate::network::{NetworkMessage, SimNetwork, SimNetworkController};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("world setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("peer {peer} could not join: {source}")]
    Join {
        peer: PeerId,
        #[source]
        source: SessionError,
    },

    #[error("a match needs at least one peer")]
    NoPeers,
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of peers; the first hosts
    pub num_peers: usize,

    /// Bot factions added to the stock map
    pub num_bots: usize,

    /// Whether each peer plays its own faction
    pub human_players: bool,

    pub tick_rate_hz: u32,

    /// Maximum simulation duration in seconds
    pub max_duration_secs: f64,

    pub host_timeout: Duration,

    pub heartbeat_interval: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_peers: 3,
            num_bots: 2,
            human_players: true,
            tick_rate_hz: 25,
            max_duration_secs: 10.0,
            host_timeout: Duration::from_secs(1),
            heartbeat_interval: Duration::from_millis(250),
        }
    }
}

impl SimConfig {
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig::default()
            .with_tick_rate(self.tick_rate_hz)
            .with_host_timeout(self.host_timeout)
            .with_heartbeat_interval(self.heartbeat_interval)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }

    pub fn total_ticks(&self) -> u64 {
        (self.max_duration_secs * f64::from(self.tick_rate_hz)) as u64
    }
}

/// Stable id of the `index`-th simulated peer.
pub fn peer_id(index: usize) -> PeerId {
    PeerId::new(format!("peer-{:02}", index))
}

/// Bot faction ids, `bot-0`, `bot-1`...
pub fn bot_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("bot-{}", i)).collect()
}

/// Traffic counters kept by the router.
#[derive(Debug, Clone, Default)]
pub struct NetworkMetrics {
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub packets_dropped: u64,
}

struct SimPeer {
    runtime: PeerRuntime<SimContext, SimNetwork>,
    inbox: mpsc::UnboundedSender<(PeerId, TransportEvent)>,
}

struct Delivery {
    from: PeerId,
    to: PeerId,
    event: TransportEvent,
}

/// The SimWorld - N peers on a virtual network under one clock.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Network controller for fault injection
    pub controller: Arc<SimNetworkController>,

    pub metrics: NetworkMetrics,

    peers: BTreeMap<PeerId, SimPeer>,

    router_rx: mpsc::UnboundedReceiver<NetworkMessage>,

    /// Packets on the wire, keyed by (delivery time ms, sequence)
    in_flight: BTreeMap<(u64, u64), Delivery>,

    next_seq: u64,

    tick_count: u64,
}

impl SimWorld {
    /// Builds the stock map with one faction per peer plus bots.
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        let ids: Vec<String> = (0..config.num_peers).map(|i| peer_id(i).as_str().to_string()).collect();
        let humans: Vec<&str> = if config.human_players {
            ids.iter().map(String::as_str).collect()
        } else {
            Vec::new()
        };
        let bots = bot_ids(config.num_bots);
        let bots: Vec<&str> = bots.iter().map(String::as_str).collect();

        let world = if humans.is_empty() {
            skirmish_map(&[], &bots).build()?
        } else {
            skirmish_map_placed(&humans, &bots).build()?
        };
        Self::with_world(config, world, Arc::new(skirmish_terrain()))
    }

    /// Runs `world` on `terrain`, hosted by the first peer.
    pub fn with_world(config: SimConfig, world: WorldState, terrain: Arc<dyn Terrain>) -> Result<Self, SimError> {
        if config.num_peers == 0 {
            return Err(SimError::NoPeers);
        }
        let context = SimContext::shared(config.seed);
        let controller = Arc::new(SimNetworkController::new());
        let (router_tx, router_rx) = mpsc::unbounded_channel();

        let directory: Vec<PeerId> = (0..config.num_peers).map(peer_id).collect();
        let host = directory[0].clone();
        let match_config = config.match_config();

        let mut peers = BTreeMap::new();
        for (i, id) in directory.iter().enumerate() {
            let (inbox, inbox_rx) = mpsc::unbounded_channel();
            let network = Arc::new(SimNetwork::new(
                id.clone(),
                directory.clone(),
                controller.clone(),
                router_tx.clone(),
                inbox_rx,
            ));
            let ai_seed = context.derive_rng(i as u64).next_u64();
            let peer = if *id == host {
                MatchPeer::host(id.clone(), match_config.clone(), terrain.clone(), world.clone(), ai_seed, context.now())
            } else {
                MatchPeer::client(id.clone(), match_config.clone(), terrain.clone(), host.clone(), ai_seed, context.now())
            };
            let runtime = PeerRuntime::new(context.clone(), network, peer);
            peers.insert(id.clone(), SimPeer { runtime, inbox });
        }

        Ok(Self {
            config,
            context,
            controller,
            metrics: NetworkMetrics::default(),
            peers,
            router_rx,
            in_flight: BTreeMap::new(),
            next_seq: 0,
            tick_count: 0,
        })
    }

    /// Connects every client to the host and starts the match.
    pub async fn start(&mut self) -> Result<(), SimError> {
        let host = peer_id(0);
        let clients: Vec<PeerId> = self.peers.keys().filter(|id| **id != host).cloned().collect();
        for id in clients {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.runtime
                    .connect_to_host(&host)
                    .await
                    .map_err(|source| SimError::Join { peer: id.clone(), source })?;
            }
        }
        self.route();
        self.deliver_due();

        // Host learns about everyone before starting
        if let Some(peer) = self.peers.get_mut(&host) {
            peer.runtime.step().await;
            peer.runtime.peer_mut().start_match();
        }
        self.route();
        self.tick().await;
        info!(peers = self.peers.len(), "match started");
        Ok(())
    }

    /// Advances simulation by one tick: deliver, step every live peer, route.
    pub async fn tick(&mut self) {
        self.context.advance_time(self.config.tick_interval());
        self.deliver_due();
        for (id, peer) in self.peers.iter_mut() {
            if self.controller.is_dead(id) {
                continue;
            }
            peer.runtime.step().await;
        }
        self.route();
        self.tick_count += 1;
    }

    fn now_ms(&self) -> u64 {
        self.context.now().as_millis() as u64
    }

    /// Moves packets from the router into flight, dropping what cannot pass.
    fn route(&mut self) {
        let now = self.now_ms();
        while let Ok(message) = self.router_rx.try_recv() {
            match message {
                NetworkMessage::Packet { from, to, packet } => {
                    self.metrics.packets_sent += 1;
                    if !self.controller.can_communicate(&from, &to) {
                        self.metrics.packets_dropped += 1;
                        continue;
                    }
                    let at = now + self.controller.get_latency(&from, &to);
                    self.enqueue(at, from, to, TransportEvent::Message(packet));
                }
                NetworkMessage::Connect { from, to } => {
                    if self.controller.can_communicate(&from, &to) {
                        self.enqueue(now, to.clone(), from.clone(), TransportEvent::Connected);
                        self.enqueue(now, from, to, TransportEvent::Connected);
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, at: u64, from: PeerId, to: PeerId, event: TransportEvent) {
        self.in_flight.insert((at, self.next_seq), Delivery { from, to, event });
        self.next_seq += 1;
    }

    fn deliver_due(&mut self) {
        let now = self.now_ms();
        let later = self.in_flight.split_off(&(now + 1, 0));
        let due = std::mem::replace(&mut self.in_flight, later);
        for (_, delivery) in due {
            // A partition may have opened while the packet was in flight
            if !self.controller.can_communicate(&delivery.from, &delivery.to) {
                self.metrics.packets_dropped += 1;
                continue;
            }
            if let Some(peer) = self.peers.get(&delivery.to) {
                if peer.inbox.send((delivery.from, delivery.event)).is_ok() {
                    self.metrics.packets_delivered += 1;
                }
            }
        }
    }

    /// Injects a transport event as if the link itself changed.
    fn notify(&self, to: &PeerId, from: &PeerId, event: TransportEvent) {
        if let Some(peer) = self.peers.get(to) {
            let _ = peer.inbox.send((from.clone(), event));
        }
    }

    /// Crashes a peer. Survivors see its connection drop.
    pub fn kill(&mut self, id: &PeerId) {
        info!(peer = %id, "killing peer");
        self.controller.kill(id);
        for other in self.live_ids() {
            self.notify(&other, id, TransportEvent::Disconnected);
        }
    }

    /// Splits the network into two groups.
    pub fn partition(&mut self, group_a: &[PeerId], group_b: &[PeerId]) {
        info!(a = group_a.len(), b = group_b.len(), "partitioning network");
        self.controller.partition(group_a, group_b);
        for a in group_a {
            for b in group_b {
                self.notify(a, b, TransportEvent::Disconnected);
                self.notify(b, a, TransportEvent::Disconnected);
            }
        }
    }

    /// Heals every partition; reconnected pairs see a fresh connection.
    pub fn heal(&mut self) {
        let live = self.live_ids();
        let mut severed = Vec::new();
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                if !self.controller.can_communicate(a, b) {
                    severed.push((a.clone(), b.clone()));
                }
            }
        }
        self.controller.heal_all();
        info!(links = severed.len(), "healing network");
        for (a, b) in severed {
            self.notify(&a, &b, TransportEvent::Connected);
            self.notify(&b, &a, TransportEvent::Connected);
        }
    }

    /// Issues an action from `id`, if that peer is alive.
    pub fn issue(&mut self, id: &PeerId, kind: ActionKind) -> Option<Action> {
        if self.controller.is_dead(id) {
            return None;
        }
        let action = self.peers.get_mut(id)?.runtime.peer_mut().issue(kind);
        debug!(peer = %id, action = %action.id, kind = action.kind.name(), "issued");
        Some(action)
    }

    /// Ticks until every live client holds the host's latest version.
    pub async fn settle(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if self.in_sync() {
                return true;
            }
            self.tick().await;
        }
        self.in_sync()
    }

    /// True with exactly one live host whose version every live client holds.
    pub fn in_sync(&self) -> bool {
        let hosts = self.host_ids();
        let [host] = hosts.as_slice() else { return false };
        let Some(version) = self.peer(host).map(MatchPeer::version) else { return false };
        self.live_peers()
            .filter(|p| !p.is_host())
            .all(|p| p.host_id() == Some(host) && p.version() == version)
    }

    pub fn peer(&self, id: &PeerId) -> Option<&MatchPeer> {
        self.peers.get(id).map(|p| p.runtime.peer())
    }

    pub fn live_ids(&self) -> Vec<PeerId> {
        self.peers
            .keys()
            .filter(|id| !self.controller.is_dead(id))
            .cloned()
            .collect()
    }

    pub fn live_peers(&self) -> impl Iterator<Item = &MatchPeer> {
        self.peers
            .iter()
            .filter(|(id, _)| !self.controller.is_dead(id))
            .map(|(_, p)| p.runtime.peer())
    }

    /// Live peers currently acting as host.
    pub fn host_ids(&self) -> Vec<PeerId> {
        self.live_peers()
            .filter(|p| p.is_host())
            .map(|p| p.local_id().clone())
            .collect()
    }

    /// World as seen by the single live host.
    pub fn host_world(&self) -> Option<&WorldState> {
        let hosts = self.host_ids();
        let [host] = hosts.as_slice() else { return None };
        self.peer(host).and_then(MatchPeer::authoritative_world)
    }

    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(peers: usize) -> SimConfig {
        SimConfig {
            seed: 42,
            num_peers: peers,
            ..SimConfig::default()
        }
    }

    #[test]
    fn test_sim_world_creation() {
        let world = SimWorld::new(config(3)).unwrap();
        assert_eq!(world.peer_count(), 3);
        assert_eq!(world.host_ids(), vec![peer_id(0)]);
        assert!(matches!(SimWorld::new(config(0)), Err(SimError::NoPeers)));
    }

    #[tokio::test]
    async fn test_start_replicates_to_clients() {
        let mut world = SimWorld::new(config(3)).unwrap();
        world.start().await.unwrap();
        assert!(world.settle(20).await);

        for peer in world.live_peers() {
            assert!(peer.is_started());
            assert_eq!(peer.roster().len(), 3);
        }
        assert!(world.metrics.packets_delivered > 0);
        assert!(world.tick_count() > 0);
    }

    #[tokio::test]
    async fn test_partitioned_packets_are_dropped() {
        let mut world = SimWorld::new(config(2)).unwrap();
        world.start().await.unwrap();
        world.partition(&[peer_id(0)], &[peer_id(1)]);
        let dropped = world.metrics.packets_dropped;
        world.tick().await;
        world.tick().await;
        assert!(world.metrics.packets_dropped > dropped);
    }

    #[tokio::test]
    async fn test_same_seed_same_run() {
        async fn run(seed: u64) -> (u64, usize) {
            let mut world = SimWorld::new(SimConfig {
                seed,
                ..SimConfig::default()
            })
            .unwrap();
            world.start().await.unwrap();
            for _ in 0..100 {
                world.tick().await;
            }
            let host = world.host_world().unwrap();
            (host.version, host.units.len())
        }
        assert_eq!(run(9).await, run(9).await);
    }
}
