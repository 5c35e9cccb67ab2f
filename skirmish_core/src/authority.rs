//! Host-side authoritative state.

use rand::RngCore;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::{debug, info};

use crate::action::{apply_action_in_place, Action, ApplyOutcome};
use crate::model::{ActionLedger, WorldState};
use crate::simulator::{TickReport, TickSimulator};
use crate::snapshot::Snapshot;
use crate::terrain::Terrain;

/// The single writable copy of the world, owned by the host.
pub struct HostAuthority<R: RngCore = ChaCha8Rng> {
    state: WorldState,
    simulator: TickSimulator<R>,
    snapshot_interval: u64,
    ticks_since_snapshot: u64,
}

impl<R: RngCore> HostAuthority<R> {
    pub fn new(state: WorldState, simulator: TickSimulator<R>, snapshot_interval: u64) -> Self {
        Self {
            state,
            simulator,
            snapshot_interval: snapshot_interval.max(1),
            ticks_since_snapshot: 0,
        }
    }

    /// Rebuilds authority after a failover.
    ///
    /// Starts from the last snapshot this peer saw, then re-validates every
    /// action it still held as pending. Actions the old host already applied
    /// are recognised through the highest seq the snapshot acknowledges per issuer.
    pub fn from_snapshot(
        snapshot: Snapshot,
        pending: &[Action],
        simulator: TickSimulator<R>,
        snapshot_interval: u64,
        terrain: &dyn Terrain,
    ) -> Self {
        let mut state = snapshot.into_state();
        state.ledger = ActionLedger::from_acked(&state.acked);

        let mut replayed = 0;
        for action in pending {
            if apply_action_in_place(&mut state, action, terrain).is_applied() {
                replayed += 1;
            }
        }
        info!(
            version = state.version,
            tick = state.tick,
            pending = pending.len(),
            replayed,
            "authority restored from snapshot"
        );
        Self::new(state, simulator, snapshot_interval)
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    pub fn apply(&mut self, action: &Action, terrain: &dyn Terrain) -> ApplyOutcome {
        apply_action_in_place(&mut self.state, action, terrain)
    }

    /// Runs one tick. Every `snapshot_interval` ticks the version is bumped
    /// and a snapshot returned for broadcast.
    pub fn advance(&mut self, terrain: &dyn Terrain, now: Duration) -> (TickReport, Option<Snapshot>) {
        let report = self.simulator.step(&mut self.state, terrain, now);
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot < self.snapshot_interval {
            return (report, None);
        }
        self.ticks_since_snapshot = 0;
        (report, Some(self.publish()))
    }

    /// Bumps the version and captures a snapshot.
    pub fn publish(&mut self) -> Snapshot {
        self.state.version += 1;
        Snapshot::capture(&self.state)
    }

    /// Captures the current state without bumping the version.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.state)
    }

    pub fn purge_peer(&mut self, player: &str) {
        debug!(player, "purging dedup records");
        self.state.ledger.purge(player);
    }
}
