//! Sans-IO match peer.
//!
//! `MatchPeer` is a synchronous state machine. Transport events are queued
//! with [`MatchPeer::enqueue`] and processed at the start of the next
//! [`MatchPeer::tick`]; outbound messages pile up until
//! [`MatchPeer::take_outbox`]. The async driver in `runtime` moves bytes,
//! the simulation harness drives it with a virtual clock.
//!
//! # Roles
//!
//! ```text
//!            StartGame / NewHost / demotion
//!   Client <-------------------------------- Host
//!      |                                      ^
//!      +--- host silent, local id elected ----+
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use skirmish_env::{PeerId, TransportEvent};

use crate::action::{Action, ActionFactory, ActionKind, ApplyOutcome};
use crate::ai::AiEngine;
use crate::authority::HostAuthority;
use crate::config::MatchConfig;
use crate::election::{HostMonitor, MigrationDecision, PeerRole, PeerRoster};
use crate::model::{Explosion, Faction, FactionId, Poi, PoiId, Projectile, Unit, UnitId, WorldState};
use crate::protocol::{decode, PeerMessage, RequestKind};
use crate::replica::{ClientReplica, SnapshotOutcome, VisualState};
use crate::simulator::TickSimulator;
use crate::snapshot::Snapshot;
use crate::terrain::Terrain;

/// Where this peer stands with the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Waiting for the host to start the match
    Connecting,
    Connected,
    /// Host lost, election in progress
    Migrating,
    /// Every other peer is gone
    Stranded,
    Failed { reason: String },
}

/// A message waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    To(PeerId, PeerMessage),
    Broadcast(PeerMessage),
}

/// Counters for harness metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub actions_applied: u64,
    pub actions_duplicate: u64,
    pub actions_rejected: u64,
    pub snapshots_applied: u64,
    pub snapshots_stale: u64,
    pub malformed_packets: u64,
    pub promotions: u64,
    pub demotions: u64,
}

pub struct MatchPeer {
    local_id: PeerId,
    config: MatchConfig,
    terrain: Arc<dyn Terrain>,
    ai: AiEngine,
    role: PeerRole,
    started: bool,
    roster: PeerRoster,
    monitor: HostMonitor,
    replica: ClientReplica,
    authority: Option<HostAuthority>,
    factory: ActionFactory,
    inbox: VecDeque<(PeerId, TransportEvent)>,
    outbox: Vec<Outgoing>,
    now: Duration,
    last_frame: Option<Duration>,
    last_heartbeat_sent: Option<Duration>,
    resync_at: Option<Duration>,
    status: ConnectionStatus,
    ai_seed: u64,
    stats: PeerStats,
}

impl MatchPeer {
    fn base(
        local_id: PeerId,
        config: MatchConfig,
        terrain: Arc<dyn Terrain>,
        role: PeerRole,
        host: Option<PeerId>,
        ai_seed: u64,
        now: Duration,
    ) -> Self {
        let monitor = HostMonitor::new(local_id.clone(), host, config.host_timeout, now);
        let replica = ClientReplica::new(WorldState::default(), config.smoothing_rate);
        Self {
            factory: ActionFactory::new(local_id.as_str()),
            roster: PeerRoster::new([local_id.clone()]),
            local_id,
            config,
            terrain,
            ai: AiEngine::default(),
            role,
            started: false,
            monitor,
            replica,
            authority: None,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            now,
            last_frame: None,
            last_heartbeat_sent: None,
            resync_at: None,
            status: ConnectionStatus::Connecting,
            ai_seed,
            stats: PeerStats::default(),
        }
    }

    /// Creates the lobby creator, which hosts `world`.
    pub fn host(
        local_id: PeerId,
        config: MatchConfig,
        terrain: Arc<dyn Terrain>,
        world: WorldState,
        ai_seed: u64,
        now: Duration,
    ) -> Self {
        let mut peer = Self::base(
            local_id.clone(),
            config,
            terrain,
            PeerRole::Host,
            Some(local_id),
            ai_seed,
            now,
        );
        peer.authority = Some(peer.build_authority(world));
        peer.status = ConnectionStatus::Connected;
        peer
    }

    /// Creates a peer that will join `host`'s match.
    pub fn client(
        local_id: PeerId,
        config: MatchConfig,
        terrain: Arc<dyn Terrain>,
        host: PeerId,
        ai_seed: u64,
        now: Duration,
    ) -> Self {
        let mut peer = Self::base(local_id, config, terrain, PeerRole::Client, Some(host.clone()), ai_seed, now);
        peer.roster.insert(host);
        peer
    }

    pub fn with_ai(mut self, ai: AiEngine) -> Self {
        self.ai = ai;
        self
    }

    fn simulator(&self) -> TickSimulator {
        let rng = ChaCha8Rng::seed_from_u64(self.ai_seed.wrapping_add(self.stats.promotions));
        TickSimulator::new(self.ai.clone(), self.config.ai_interval, rng)
    }

    fn build_authority(&self, world: WorldState) -> HostAuthority {
        HostAuthority::new(world, self.simulator(), self.config.snapshot_interval_ticks)
    }

    /// Host only: tells every connected peer the match has begun.
    pub fn start_match(&mut self) {
        let Some(authority) = self.authority.as_mut() else {
            warn!(peer = %self.local_id, "only the host can start a match");
            return;
        };
        let snapshot = authority.publish();
        self.started = true;
        info!(peer = %self.local_id, peers = self.roster.len(), "match started");
        self.outbox.push(Outgoing::Broadcast(PeerMessage::StartGame {
            host: self.local_id.clone(),
            peers: self.roster.to_vec(),
            snapshot,
        }));
    }

    pub fn enqueue(&mut self, from: PeerId, event: TransportEvent) {
        self.inbox.push_back((from, event));
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Processes queued events, then runs one tick of the current role.
    pub fn tick(&mut self, now: Duration) {
        self.now = now;
        while let Some((from, event)) = self.inbox.pop_front() {
            self.handle_event(from, event);
        }
        match self.role {
            PeerRole::Host => self.host_tick(now),
            PeerRole::Client => self.client_tick(now),
        }
    }

    /// Creates an action, applies it locally and broadcasts it.
    pub fn issue(&mut self, kind: ActionKind) -> Action {
        let action = self.factory.create(kind, self.now.as_millis() as u64);
        let outcome = match self.authority.as_mut() {
            Some(authority) => authority.apply(&action, self.terrain.as_ref()),
            None => self.replica.apply_local(&action, self.terrain.as_ref()),
        };
        self.count_outcome(&outcome);
        self.outbox.push(Outgoing::Broadcast(PeerMessage::Action {
            action: action.clone(),
        }));
        action
    }

    fn count_outcome(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.stats.actions_applied += 1,
            ApplyOutcome::Duplicate => self.stats.actions_duplicate += 1,
            ApplyOutcome::Rejected(_) => self.stats.actions_rejected += 1,
        }
    }

    fn host_tick(&mut self, now: Duration) {
        if !self.started {
            return;
        }
        let Some(authority) = self.authority.as_mut() else { return };

        let (report, snapshot) = authority.advance(self.terrain.as_ref(), now);
        if !report.captures.is_empty() {
            debug!(peer = %self.local_id, tick = report.tick, captures = ?report.captures, "captures");
        }
        if let Some(snapshot) = snapshot {
            self.outbox.push(Outgoing::Broadcast(PeerMessage::FullState { snapshot }));
        }

        if self.resync_at.is_some_and(|at| now >= at) {
            self.resync_at = None;
            let snapshot = authority.publish();
            info!(peer = %self.local_id, version = snapshot.version, "post-migration resync");
            self.outbox.push(Outgoing::Broadcast(PeerMessage::FullState { snapshot }));
        }

        let due = self
            .last_heartbeat_sent
            .map_or(true, |at| now.saturating_sub(at) >= self.config.heartbeat_interval);
        if due {
            self.last_heartbeat_sent = Some(now);
            let state = authority.state();
            self.outbox.push(Outgoing::Broadcast(PeerMessage::Heartbeat {
                tick: state.tick,
                version: state.version,
            }));
        }
    }

    fn client_tick(&mut self, now: Duration) {
        if !self.started {
            return;
        }
        let dt = self.last_frame.map_or(Duration::ZERO, |at| now.saturating_sub(at));
        self.last_frame = Some(now);
        self.replica.predict_frame(dt, self.config.tick_rate_hz);

        match self.monitor.poll(now, &mut self.roster) {
            MigrationDecision::Idle => {}
            MigrationDecision::Promote => self.promote(now),
            MigrationDecision::AwaitAnnouncement(successor) => {
                debug!(peer = %self.local_id, successor = %successor, "waiting for new host");
                self.status = ConnectionStatus::Migrating;
            }
            MigrationDecision::Stranded => {
                warn!(peer = %self.local_id, "no peers left to host the match");
                self.status = ConnectionStatus::Stranded;
            }
        }
    }

    /// Takes over as host from the last snapshot plus pending actions.
    fn promote(&mut self, now: Duration) {
        let snapshot = self.replica.last_snapshot();
        let pending: Vec<Action> = self.replica.pending().cloned().collect();
        let authority = HostAuthority::from_snapshot(
            snapshot,
            &pending,
            self.simulator(),
            self.config.snapshot_interval_ticks,
            self.terrain.as_ref(),
        );
        self.authority = Some(authority);
        self.role = PeerRole::Host;
        self.monitor.finish_promotion();
        self.stats.promotions += 1;
        self.status = ConnectionStatus::Connected;
        self.last_heartbeat_sent = None;
        self.resync_at = Some(now + self.config.resync_grace);

        info!(peer = %self.local_id, roster = self.roster.len(), "promoted to host");
        self.outbox.push(Outgoing::Broadcast(PeerMessage::NewHost {
            host: self.local_id.clone(),
        }));
    }

    /// Hands authority to a lower-id host.
    fn demote(&mut self, host: PeerId, now: Duration) {
        if let Some(authority) = self.authority.take() {
            self.replica = ClientReplica::new(authority.state().clone(), self.config.smoothing_rate);
        }
        self.role = PeerRole::Client;
        self.resync_at = None;
        self.stats.demotions += 1;
        info!(peer = %self.local_id, host = %host, "demoted, following lower-id host");
        self.follow(host, now);
    }

    /// Switches to `host` and asks it for the full state.
    fn follow(&mut self, host: PeerId, now: Duration) {
        self.replica.rebase();
        self.roster.insert(host.clone());
        self.monitor.adopt_host(host.clone(), now);
        self.status = ConnectionStatus::Connected;
        self.outbox.push(Outgoing::To(
            host,
            PeerMessage::Request {
                what: RequestKind::FullState,
            },
        ));
    }

    fn handle_event(&mut self, from: PeerId, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                trace!(peer = %self.local_id, remote = %from, "connected");
                self.roster.insert(from.clone());
                if let Some(authority) = self.authority.as_ref() {
                    self.outbox.push(Outgoing::Broadcast(PeerMessage::LobbyUpdate {
                        peers: self.roster.to_vec(),
                    }));
                    if self.started {
                        // Late joiner or a peer back from a partition
                        self.outbox.push(Outgoing::To(
                            from,
                            PeerMessage::StartGame {
                                host: self.local_id.clone(),
                                peers: self.roster.to_vec(),
                                snapshot: authority.snapshot(),
                            },
                        ));
                    }
                }
            }
            TransportEvent::Disconnected => {
                debug!(peer = %self.local_id, remote = %from, "disconnected");
                self.roster.remove(&from);
                self.replica.purge_peer(from.as_str(), self.terrain.as_ref());
                if let Some(authority) = self.authority.as_mut() {
                    authority.purge_peer(from.as_str());
                }
            }
            TransportEvent::Message(packet) => match decode(&packet) {
                Ok(message) => self.handle_message(from, message),
                Err(e) => {
                    self.stats.malformed_packets += 1;
                    warn!(peer = %self.local_id, remote = %from, error = %e, "dropping malformed packet");
                }
            },
        }
    }

    fn handle_message(&mut self, from: PeerId, message: PeerMessage) {
        let now = self.now;
        match message {
            PeerMessage::Action { action } => {
                if action.id.player != from.as_str() {
                    warn!(peer = %self.local_id, remote = %from, action = %action.id, "action relayed by wrong peer");
                    return;
                }
                let outcome = match self.authority.as_mut() {
                    Some(authority) => authority.apply(&action, self.terrain.as_ref()),
                    None => self.replica.apply_local(&action, self.terrain.as_ref()),
                };
                self.count_outcome(&outcome);
            }
            PeerMessage::FullState { snapshot } | PeerMessage::Response { snapshot } => {
                if self.role != PeerRole::Client || self.monitor.host() != Some(&from) {
                    trace!(peer = %self.local_id, remote = %from, "snapshot from non-host ignored");
                    return;
                }
                self.apply_snapshot(snapshot);
            }
            PeerMessage::Request { what: RequestKind::FullState } => {
                if let Some(authority) = self.authority.as_ref() {
                    self.outbox.push(Outgoing::To(
                        from,
                        PeerMessage::Response {
                            snapshot: authority.snapshot(),
                        },
                    ));
                }
            }
            PeerMessage::Heartbeat { tick, version } => match self.role {
                PeerRole::Client => {
                    if self.monitor.observe_heartbeat(&from, now) {
                        trace!(peer = %self.local_id, tick, version, "heartbeat");
                    } else if self.started && self.monitor.host().map_or(true, |host| from < *host) {
                        // Two hosts after a partition heals; the lower id wins
                        info!(peer = %self.local_id, host = %from, "following lower-id host");
                        self.follow(from, now);
                    }
                }
                PeerRole::Host => {
                    if from < self.local_id {
                        warn!(peer = %self.local_id, other = %from, "second host detected");
                        self.demote(from, now);
                    }
                }
            },
            PeerMessage::NewHost { host } => self.adopt_announced_host(host, now),
            PeerMessage::LobbyUpdate { peers } => {
                if self.role == PeerRole::Client && self.monitor.host() == Some(&from) {
                    self.roster = PeerRoster::new(peers);
                    self.roster.insert(self.local_id.clone());
                    self.roster.insert(from);
                }
            }
            PeerMessage::StartGame { host, peers, snapshot } => {
                match self.role {
                    PeerRole::Host => {
                        if host >= self.local_id {
                            return;
                        }
                        self.demote(host.clone(), now);
                    }
                    PeerRole::Client => {
                        // Once playing, only a lower-id host can pull this peer over
                        let current = self.monitor.host();
                        if self.started && current.is_some_and(|c| host > *c) {
                            return;
                        }
                    }
                }
                self.join(host, peers, snapshot, now);
            }
        }
    }

    fn adopt_announced_host(&mut self, host: PeerId, now: Duration) {
        if host == self.local_id {
            return;
        }
        if self.role == PeerRole::Host {
            if host < self.local_id {
                self.demote(host, now);
            }
            return;
        }
        if let Some(old) = self.monitor.host().cloned() {
            if old != host {
                self.roster.remove(&old);
            }
        }
        info!(peer = %self.local_id, host = %host, "following new host");
        self.roster.insert(host.clone());
        self.monitor.adopt_host(host, now);
        self.replica.rebase();
        self.status = ConnectionStatus::Connected;
    }

    fn join(&mut self, host: PeerId, peers: Vec<PeerId>, snapshot: Snapshot, now: Duration) {
        info!(peer = %self.local_id, host = %host, version = snapshot.version, "joined match");
        self.roster = PeerRoster::new(peers);
        self.roster.insert(self.local_id.clone());
        self.roster.insert(host.clone());
        self.monitor.adopt_host(host, now);

        let mut replica = ClientReplica::new(WorldState::default(), self.config.smoothing_rate);
        replica.ui = self.replica.ui.clone();
        self.replica = replica;
        self.apply_snapshot(snapshot);
        self.started = true;
        self.last_frame = Some(now);
        self.status = ConnectionStatus::Connected;
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        match self.replica.apply_snapshot(snapshot, self.terrain.as_ref()) {
            SnapshotOutcome::Applied { .. } => self.stats.snapshots_applied += 1,
            SnapshotOutcome::Stale { .. } => self.stats.snapshots_stale += 1,
        }
    }

    /// Records a transport failure reported by the driver.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    fn world(&self) -> &WorldState {
        match self.authority.as_ref() {
            Some(authority) => authority.state(),
            None => self.replica.predicted(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == PeerRole::Host
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn host_id(&self) -> Option<&PeerId> {
        self.monitor.host()
    }

    pub fn roster(&self) -> &PeerRoster {
        &self.roster
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn replica(&self) -> &ClientReplica {
        &self.replica
    }

    pub fn replica_mut(&mut self) -> &mut ClientReplica {
        &mut self.replica
    }

    /// Player (and faction) id this peer issues actions as.
    pub fn player_id(&self) -> FactionId {
        self.local_id.as_str().to_string()
    }

    pub fn units(&self) -> &BTreeMap<UnitId, Unit> {
        &self.world().units
    }

    pub fn factions(&self) -> &BTreeMap<FactionId, Faction> {
        &self.world().factions
    }

    pub fn pois(&self) -> &BTreeMap<PoiId, Poi> {
        &self.world().pois
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.world().projectiles
    }

    pub fn explosions(&self) -> &[Explosion] {
        &self.world().explosions
    }

    /// Simulation tick of the world this peer currently shows.
    pub fn world_tick(&self) -> u64 {
        self.world().tick
    }

    /// Version of the last authoritative state this peer holds.
    pub fn version(&self) -> u64 {
        match self.authority.as_ref() {
            Some(authority) => authority.state().version,
            None => self.replica.authoritative().version,
        }
    }

    /// Render position of a unit. Hosts draw the authoritative position.
    pub fn visual(&self, unit_id: &str) -> Option<VisualState> {
        match self.authority.as_ref() {
            Some(authority) => authority.state().units.get(unit_id).map(|u| VisualState {
                position: u.position,
                heading: u.heading,
            }),
            None => self.replica.visual(unit_id).copied(),
        }
    }

    /// Full authoritative world, if this peer is host.
    pub fn authoritative_world(&self) -> Option<&WorldState> {
        self.authority.as_ref().map(HostAuthority::state)
    }
}
