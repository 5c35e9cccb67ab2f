//! Versioned full-state snapshots broadcast by the host.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{
    ActionLedger, Explosion, Faction, FactionId, MatchPhase, Poi, PoiId, Projectile, Unit, UnitId, WorldState,
};

/// Everything replicated from the host. The dedup ledger stays local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub tick: u64,
    pub phase: MatchPhase,
    pub units: BTreeMap<UnitId, Unit>,
    pub factions: BTreeMap<FactionId, Faction>,
    pub pois: BTreeMap<PoiId, Poi>,
    pub projectiles: Vec<Projectile>,
    pub explosions: Vec<Explosion>,
    pub acked: BTreeMap<String, u64>,
    pub next_serial: u64,
}

impl Snapshot {
    pub fn capture(state: &WorldState) -> Self {
        Self {
            version: state.version,
            tick: state.tick,
            phase: state.phase,
            units: state.units.clone(),
            factions: state.factions.clone(),
            pois: state.pois.clone(),
            projectiles: state.projectiles.clone(),
            explosions: state.explosions.clone(),
            acked: state.acked.clone(),
            next_serial: state.next_serial,
        }
    }

    /// Rebuilds a world with an empty ledger.
    pub fn into_state(self) -> WorldState {
        WorldState {
            phase: self.phase,
            tick: self.tick,
            version: self.version,
            units: self.units,
            factions: self.factions,
            pois: self.pois,
            projectiles: self.projectiles,
            explosions: self.explosions,
            acked: self.acked,
            next_serial: self.next_serial,
            ledger: ActionLedger::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionId;
    use crate::model::{GeoPoint, UnitClass};

    #[test]
    fn test_capture_drops_ledger() {
        let mut state = WorldState::default();
        state.version = 4;
        state
            .units
            .insert("u".into(), Unit::new("u", UnitClass::Tank, "P1", GeoPoint::new(1.0, 2.0)));
        state.ledger.record(&ActionId {
            player: "P1".into(),
            seq: 1,
        });

        let restored = Snapshot::capture(&state).into_state();
        assert_eq!(restored.version, 4);
        assert_eq!(restored.units, state.units);
        assert_eq!(restored.ledger.tracked_players(), 0);
    }

    #[test]
    fn test_snapshot_json_has_no_ledger() {
        let state = WorldState::default();
        let json = serde_json::to_string(&Snapshot::capture(&state)).unwrap();
        assert!(!json.contains("ledger"));
        assert!(json.contains("\"acked\""));
    }
}
