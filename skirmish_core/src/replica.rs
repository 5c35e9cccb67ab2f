//! Client-side two-tier state: the last authoritative snapshot plus a
//! predicted overlay of actions the host has not acknowledged yet.
//!
//! Visual positions live apart from both tiers. They chase the predicted
//! positions with exponential smoothing, so a correcting snapshot never
//! makes a unit jump on screen.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration;
use tracing::{debug, trace};

use crate::action::{apply_action_in_place, Action, ApplyOutcome};
use crate::model::{ActionLedger, GeoPoint, UnitClass, UnitId, WorldState};
use crate::snapshot::Snapshot;
use crate::terrain::Terrain;

/// Client-only render state for one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    pub position: GeoPoint,
    pub heading: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub center: GeoPoint,
    pub zoom: f64,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            center: GeoPoint::default(),
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum UiMode {
    #[default]
    Command,
    /// Placing a structure; locked until the player confirms or cancels
    Placement { class: UnitClass },
}

/// Local UI state. Snapshots never touch it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalUiState {
    pub camera: CameraState,
    pub mode: UiMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied { version: u64 },
    Stale { received: u64, current: u64 },
}

/// Snapshots an unacknowledged action survives before it is dropped.
///
/// An action the host never applies (its issuer left, or the host lost it)
/// would otherwise stay in the predicted tier forever.
pub const PENDING_EXPIRY_SNAPSHOTS: u32 = 10;

#[derive(Debug, Clone)]
struct PendingAction {
    action: Action,
    /// Snapshots applied since this action was predicted
    snapshots: u32,
}

#[derive(Debug, Clone)]
pub struct ClientReplica {
    authoritative: WorldState,
    predicted: WorldState,
    pending: Vec<PendingAction>,
    seen: ActionLedger,
    visuals: BTreeMap<UnitId, VisualState>,
    last_version: Option<u64>,
    smoothing_rate: f64,
    pub ui: LocalUiState,
}

/// Wraps an angle into `(-PI, PI]`.
fn wrap_angle(a: f64) -> f64 {
    let mut a = a % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

impl ClientReplica {
    pub fn new(initial: WorldState, smoothing_rate: f64) -> Self {
        let mut replica = Self {
            predicted: initial.clone(),
            authoritative: initial,
            pending: Vec::new(),
            seen: ActionLedger::default(),
            visuals: BTreeMap::new(),
            last_version: None,
            smoothing_rate,
            ui: LocalUiState::default(),
        };
        replica.sync_visuals();
        replica
    }

    pub fn authoritative(&self) -> &WorldState {
        &self.authoritative
    }

    pub fn predicted(&self) -> &WorldState {
        &self.predicted
    }

    /// Actions predicted locally that no snapshot has acknowledged yet.
    pub fn pending(&self) -> impl Iterator<Item = &Action> + '_ {
        self.pending.iter().map(|p| &p.action)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }

    pub fn visual(&self, id: &str) -> Option<&VisualState> {
        self.visuals.get(id)
    }

    pub fn visuals(&self) -> &BTreeMap<UnitId, VisualState> {
        &self.visuals
    }

    /// The last authoritative state, as a snapshot.
    pub fn last_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.authoritative)
    }

    fn already_applied(&self, action: &Action) -> bool {
        self.seen.contains(&action.id)
            || self
                .authoritative
                .acked
                .get(&action.id.player)
                .is_some_and(|&floor| action.id.seq <= floor)
    }

    /// Optimistically applies a local or remote action to the predicted tier.
    pub fn apply_local(&mut self, action: &Action, terrain: &dyn Terrain) -> ApplyOutcome {
        if self.already_applied(action) {
            return ApplyOutcome::Duplicate;
        }
        self.seen.record(&action.id);
        let outcome = apply_action_in_place(&mut self.predicted, action, terrain);
        self.pending.push(PendingAction {
            action: action.clone(),
            snapshots: 0,
        });
        self.sync_visuals();
        outcome
    }

    /// Reconciles against a host snapshot.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, terrain: &dyn Terrain) -> SnapshotOutcome {
        if let Some(current) = self.last_version {
            if snapshot.version <= current {
                trace!(received = snapshot.version, current, "stale snapshot dropped");
                return SnapshotOutcome::Stale {
                    received: snapshot.version,
                    current,
                };
            }
        }
        let version = snapshot.version;
        self.last_version = Some(version);
        self.authoritative = snapshot.into_state();

        let acked = &self.authoritative.acked;
        let before = self.pending.len();
        self.pending
            .retain(|p| p.action.id.seq > acked.get(&p.action.id.player).copied().unwrap_or(0));
        let acknowledged = before - self.pending.len();

        let before = self.pending.len();
        self.pending.retain_mut(|p| {
            p.snapshots += 1;
            p.snapshots <= PENDING_EXPIRY_SNAPSHOTS
        });
        let expired = before - self.pending.len();
        if expired > 0 {
            debug!(version, expired, "unacknowledged actions expired");
        }
        debug!(version, acknowledged, pending = self.pending.len(), "snapshot applied");

        self.rebuild_predicted(terrain);
        self.sync_visuals();
        SnapshotOutcome::Applied { version }
    }

    fn rebuild_predicted(&mut self, terrain: &dyn Terrain) {
        let mut predicted = self.authoritative.clone();
        predicted.ledger = ActionLedger::default();
        for p in &self.pending {
            apply_action_in_place(&mut predicted, &p.action, terrain);
        }
        self.predicted = predicted;
    }

    /// Keeps visuals of surviving units, seeds new ones, drops the rest.
    fn sync_visuals(&mut self) {
        let units = &self.predicted.units;
        self.visuals.retain(|id, _| units.contains_key(id));
        for unit in units.values() {
            self.visuals.entry(unit.id.clone()).or_insert(VisualState {
                position: unit.position,
                heading: unit.heading,
            });
        }
    }

    /// Advances prediction and visuals by one render frame.
    pub fn predict_frame(&mut self, dt: Duration, tick_rate_hz: u32) {
        let secs = dt.as_secs_f64();
        let ticks = secs * f64::from(tick_rate_hz);

        for unit in self.predicted.units.values_mut() {
            let Some(dest) = unit.destination else { continue };
            if unit.is_static() {
                continue;
            }
            let step = unit.effective_speed() * ticks;
            let dist = unit.position.distance_to(&dest);
            if dist <= step {
                unit.position = dest;
                unit.destination = None;
            } else if dist > 0.0 {
                unit.heading = unit.position.bearing_to(&dest);
                unit.position = unit.position.lerp(&dest, step / dist);
            }
        }

        let alpha = 1.0 - (-self.smoothing_rate * secs).exp();
        for (id, visual) in self.visuals.iter_mut() {
            let Some(unit) = self.predicted.units.get(id) else { continue };
            visual.position = visual.position.lerp(&unit.position, alpha);
            visual.heading = wrap_angle(visual.heading + wrap_angle(unit.heading - visual.heading) * alpha);
        }
    }

    /// Accepts the next snapshot whatever its version.
    ///
    /// Versions are monotonic per host. A newly adopted host may restart
    /// from an older snapshot than the one this replica last saw.
    pub fn rebase(&mut self) {
        self.last_version = None;
    }

    /// Forgets a departed peer: its dedup records and any of its actions
    /// still awaiting acknowledgement. The predicted tier is rebuilt without them.
    pub fn purge_peer(&mut self, player: &str, terrain: &dyn Terrain) {
        self.seen.purge(player);
        let before = self.pending.len();
        self.pending.retain(|p| p.action.id.player != player);
        let dropped = before - self.pending.len();
        debug!(player, dropped, "purged departed peer");
        self.rebuild_predicted(terrain);
        self.sync_visuals();
    }
}
