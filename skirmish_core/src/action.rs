//! Command protocol: player actions, their ids, and how they mutate the world.
//!
//! Application is pure and deterministic. Host and clients run the same
//! code on the same inputs and must reach the same state, so nothing here
//! reads a clock or draws a random number.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{
    FactionId, FactionKind, GeoPoint, MatchPhase, PoiId, PoiKind, Relation, TargetRef, Unit, UnitClass, UnitId,
    WorldState,
};
use crate::rules;
use crate::terrain::Terrain;

/// Globally unique action id.
///
/// `seq` increases by one for every action a player issues, so duplicates
/// are detected by id alone, never by payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId {
    pub player: String,
    pub seq: u64,
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.player, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionKind {
    MoveUnits {
        unit_ids: Vec<UnitId>,
        destination: GeoPoint,
        boost: bool,
    },
    Attack {
        unit_ids: Vec<UnitId>,
        target: TargetRef,
    },
    BuildStructure {
        class: UnitClass,
        position: GeoPoint,
    },
    SpawnUnit {
        class: UnitClass,
        poi_id: PoiId,
    },
    SelectBase {
        poi_id: PoiId,
    },
    SetRelation {
        other: FactionId,
        relation: Relation,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::MoveUnits { .. } => "move_units",
            ActionKind::Attack { .. } => "attack",
            ActionKind::BuildStructure { .. } => "build_structure",
            ActionKind::SpawnUnit { .. } => "spawn_unit",
            ActionKind::SelectBase { .. } => "select_base",
            ActionKind::SetRelation { .. } => "set_relation",
        }
    }
}

/// One player command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    /// Issuing player; also the faction the action acts for
    pub player_id: FactionId,
    pub kind: ActionKind,
    /// Issuer's wall clock, informational only
    pub timestamp_ms: u64,
}

/// Stamps ids for one player's actions.
#[derive(Debug, Clone)]
pub struct ActionFactory {
    player: FactionId,
    next_seq: u64,
}

impl ActionFactory {
    pub fn new(player: impl Into<FactionId>) -> Self {
        Self {
            player: player.into(),
            next_seq: 1,
        }
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn create(&mut self, kind: ActionKind, timestamp_ms: u64) -> Action {
        let seq = self.next_seq;
        self.next_seq += 1;
        Action {
            id: ActionId {
                player: self.player.clone(),
                seq,
            },
            player_id: self.player.clone(),
            kind,
            timestamp_ms,
        }
    }
}

/// What happened when an action was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    /// Id already seen; state untouched
    Duplicate,
    /// Validation failed; state untouched apart from the ledger
    Rejected(RejectReason),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("action id does not belong to its issuer")]
    ForgedId,
    #[error("issuer has no faction")]
    UnknownFaction,
    #[error("match has ended")]
    MatchEnded,
    #[error("not allowed in the current phase")]
    WrongPhase,
    #[error("no unit could take the order")]
    NoEligibleUnits,
    #[error("target does not exist")]
    UnknownTarget,
    #[error("target belongs to the issuer")]
    FriendlyTarget,
    #[error("terrain does not allow it")]
    InvalidTerrain,
    #[error("class is not a structure")]
    NotAStructure,
    #[error("class cannot be trained")]
    NotMobile,
    #[error("not enough gold")]
    InsufficientFunds,
    #[error("issuer does not own the site")]
    NotOwned,
    #[error("naval units need a coastal site")]
    NotCoastal,
    #[error("base must be an unclaimed city")]
    BaseUnavailable,
    #[error("issuer already has a base")]
    AlreadyHasBase,
    #[error("relation target is invalid")]
    InvalidRelation,
}

/// Applies `action` to a copy of `state` and returns the copy.
///
/// Same bookkeeping as [`apply_action_in_place`]: even a rejected action
/// advances `acked` and the ledger on the copy.
pub fn apply_action(state: &WorldState, action: &Action, terrain: &dyn Terrain) -> WorldState {
    let mut next = state.clone();
    apply_action_in_place(&mut next, action, terrain);
    next
}

/// Applies `action` to `state`.
///
/// A duplicate id is a no-op. A rejected action leaves the game state
/// untouched, but the dedup bookkeeping still moves: the ledger remembers the
/// id and `acked` rises to its seq, so a retransmit is not re-validated and
/// the issuer's snapshot acknowledges it like any applied action.
pub fn apply_action_in_place(state: &mut WorldState, action: &Action, terrain: &dyn Terrain) -> ApplyOutcome {
    if action.id.player != action.player_id {
        debug!(action = %action.id, "rejected forged action id");
        return ApplyOutcome::Rejected(RejectReason::ForgedId);
    }
    let acked = state.acked.get(&action.player_id).copied().unwrap_or(0);
    state.ledger.raise_floor(&action.player_id, acked);
    if state.ledger.contains(&action.id) {
        debug!(action = %action.id, "duplicate action dropped");
        return ApplyOutcome::Duplicate;
    }
    state.ledger.record(&action.id);
    // Links are ordered per issuer, so anything below the highest seq is lost
    let highest = acked.max(action.id.seq);
    state.acked.insert(action.player_id.clone(), highest);

    match execute(state, action, terrain) {
        Ok(()) => ApplyOutcome::Applied,
        Err(reason) => {
            debug!(action = %action.id, kind = action.kind.name(), %reason, "action rejected");
            ApplyOutcome::Rejected(reason)
        }
    }
}

fn execute(state: &mut WorldState, action: &Action, terrain: &dyn Terrain) -> Result<(), RejectReason> {
    if state.phase == MatchPhase::Ended {
        return Err(RejectReason::MatchEnded);
    }
    if !state.factions.contains_key(&action.player_id) {
        return Err(RejectReason::UnknownFaction);
    }
    let player = action.player_id.as_str();

    match &action.kind {
        ActionKind::MoveUnits {
            unit_ids,
            destination,
            boost,
        } => move_units(state, player, unit_ids, destination, *boost, terrain),
        ActionKind::Attack { unit_ids, target } => attack(state, player, unit_ids, target),
        ActionKind::BuildStructure { class, position } => {
            build_structure(state, &action.id, *class, position, terrain)
        }
        ActionKind::SpawnUnit { class, poi_id } => spawn_unit(state, &action.id, *class, poi_id, terrain),
        ActionKind::SelectBase { poi_id } => select_base(state, &action.id, poi_id, terrain),
        ActionKind::SetRelation { other, relation } => set_relation(state, player, other, *relation),
    }
}

fn move_units(
    state: &mut WorldState,
    player: &str,
    unit_ids: &[UnitId],
    destination: &GeoPoint,
    boost: bool,
    terrain: &dyn Terrain,
) -> Result<(), RejectReason> {
    let eligible: Vec<UnitId> = unit_ids
        .iter()
        .filter(|id| {
            state.units.get(*id).is_some_and(|u| {
                u.faction_id == player
                    && !u.is_static()
                    && terrain.is_valid_move(u.class, destination, &state.pois, &state.units, player)
            })
        })
        .cloned()
        .collect();
    if eligible.is_empty() {
        return Err(RejectReason::NoEligibleUnits);
    }

    for id in eligible {
        if let Some(unit) = state.units.get_mut(&id) {
            unit.destination = Some(*destination);
            unit.target = None;
            if boost {
                unit.boosting = true;
                unit.boost_ticks = rules::BOOST_DURATION_TICKS;
            }
        }
    }
    Ok(())
}

fn attack(state: &mut WorldState, player: &str, unit_ids: &[UnitId], target: &TargetRef) -> Result<(), RejectReason> {
    match target {
        TargetRef::Unit(id) => {
            let unit = state
                .units
                .get(id)
                .filter(|u| u.is_alive())
                .ok_or(RejectReason::UnknownTarget)?;
            if unit.faction_id == player {
                return Err(RejectReason::FriendlyTarget);
            }
        }
        TargetRef::Poi(id) => {
            let poi = state.pois.get(id).ok_or(RejectReason::UnknownTarget)?;
            if poi.is_owned_by(player) {
                return Err(RejectReason::FriendlyTarget);
            }
        }
    }

    let eligible: Vec<UnitId> = unit_ids
        .iter()
        .filter(|id| {
            state
                .units
                .get(*id)
                .is_some_and(|u| u.faction_id == player && (u.class.is_mobile() || u.is_armed()))
        })
        .cloned()
        .collect();
    if eligible.is_empty() {
        return Err(RejectReason::NoEligibleUnits);
    }

    for id in eligible {
        if let Some(unit) = state.units.get_mut(&id) {
            unit.target = Some(target.clone());
            unit.destination = None;
        }
    }
    Ok(())
}

fn charge(state: &mut WorldState, player: &str, class: UnitClass) -> Result<(), RejectReason> {
    let cost = rules::cost(class);
    let faction = state.factions.get_mut(player).ok_or(RejectReason::UnknownFaction)?;
    if faction.wallet.gold < cost {
        return Err(RejectReason::InsufficientFunds);
    }
    faction.wallet.gold -= cost;
    Ok(())
}

/// Unit id derived from the action that created it, identical on every peer.
pub fn derived_unit_id(id: &ActionId, index: usize) -> UnitId {
    format!("{}/{}", id, index)
}

fn build_structure(
    state: &mut WorldState,
    id: &ActionId,
    class: UnitClass,
    position: &GeoPoint,
    terrain: &dyn Terrain,
) -> Result<(), RejectReason> {
    if state.phase != MatchPhase::Playing {
        return Err(RejectReason::WrongPhase);
    }
    if !class.is_structure() {
        return Err(RejectReason::NotAStructure);
    }
    if !terrain.is_valid_placement(class, position, &state.pois) {
        return Err(RejectReason::InvalidTerrain);
    }
    charge(state, &id.player, class)?;

    let unit = Unit::new(derived_unit_id(id, 0), class, id.player.clone(), *position);
    state.units.insert(unit.id.clone(), unit);
    Ok(())
}

/// First ring slot around `origin` a unit of `class` may stand on.
fn spawn_point(
    state: &WorldState,
    origin: &GeoPoint,
    first_slot: u64,
    class: UnitClass,
    faction: &str,
    terrain: &dyn Terrain,
) -> Option<GeoPoint> {
    (first_slot..first_slot + 8)
        .map(|slot| origin.ring_offset(slot, rules::SPAWN_RING_RADIUS))
        .find(|p| terrain.is_valid_move(class, p, &state.pois, &state.units, faction))
}

fn spawn_unit(
    state: &mut WorldState,
    id: &ActionId,
    class: UnitClass,
    poi_id: &PoiId,
    terrain: &dyn Terrain,
) -> Result<(), RejectReason> {
    if state.phase != MatchPhase::Playing {
        return Err(RejectReason::WrongPhase);
    }
    if !class.is_mobile() {
        return Err(RejectReason::NotMobile);
    }
    let poi = state.pois.get(poi_id).ok_or(RejectReason::UnknownTarget)?;
    if !poi.is_owned_by(&id.player) {
        return Err(RejectReason::NotOwned);
    }
    if class.is_naval() && !poi.coastal {
        return Err(RejectReason::NotCoastal);
    }
    let origin = poi.position;
    let position =
        spawn_point(state, &origin, id.seq, class, &id.player, terrain).ok_or(RejectReason::InvalidTerrain)?;
    charge(state, &id.player, class)?;

    let unit = Unit::new(derived_unit_id(id, 0), class, id.player.clone(), position);
    state.units.insert(unit.id.clone(), unit);
    Ok(())
}

fn select_base(state: &mut WorldState, id: &ActionId, poi_id: &PoiId, terrain: &dyn Terrain) -> Result<(), RejectReason> {
    if state.phase != MatchPhase::BaseSelection {
        return Err(RejectReason::WrongPhase);
    }
    let player = id.player.as_str();
    let poi = state.pois.get(poi_id).ok_or(RejectReason::UnknownTarget)?;
    if poi.kind != PoiKind::City || poi.owner.is_some() {
        return Err(RejectReason::BaseUnavailable);
    }
    if state.pois.values().any(|p| p.is_owned_by(player)) {
        return Err(RejectReason::AlreadyHasBase);
    }

    let origin = poi.position;
    if let Some(poi) = state.pois.get_mut(poi_id) {
        poi.owner = Some(player.to_string());
        poi.hp = poi.max_hp;
    }
    for (index, class) in rules::STARTER_GARRISON.iter().enumerate() {
        let position = spawn_point(state, &origin, index as u64, *class, player, terrain).unwrap_or(origin);
        let unit = Unit::new(derived_unit_id(id, index), *class, player.to_string(), position);
        state.units.insert(unit.id.clone(), unit);
    }

    let all_humans_placed = state
        .factions
        .values()
        .filter(|f| f.kind == FactionKind::Human)
        .all(|f| state.pois.values().any(|p| p.is_owned_by(&f.id)));
    if all_humans_placed {
        state.phase = MatchPhase::Playing;
    }
    Ok(())
}

fn set_relation(state: &mut WorldState, player: &str, other: &str, relation: Relation) -> Result<(), RejectReason> {
    if player == other || !state.factions.contains_key(other) {
        return Err(RejectReason::InvalidRelation);
    }
    if let Some(f) = state.factions.get_mut(player) {
        f.relations.insert(other.to_string(), relation);
    }
    if let Some(f) = state.factions.get_mut(other) {
        f.relations.insert(player.to_string(), relation);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Faction, Poi};
    use crate::terrain::{OpenTerrain, RegionTerrain, Rect};

    fn playing_state() -> WorldState {
        let mut state = WorldState {
            phase: MatchPhase::Playing,
            ..WorldState::default()
        };
        for id in ["P1", "P2"] {
            let mut f = Faction::new(id, FactionKind::Human, "#fff");
            f.wallet.gold = 1000;
            state.factions.insert(id.into(), f);
        }
        state.units.insert(
            "u1".into(),
            Unit::new("u1", UnitClass::Tank, "P1", GeoPoint::new(0.0, 0.0)),
        );
        state.units.insert(
            "e1".into(),
            Unit::new("e1", UnitClass::Infantry, "P2", GeoPoint::new(0.0, 20.0)),
        );
        let mut city = Poi::new("c1", PoiKind::City, GeoPoint::new(10.0, 10.0), 1);
        city.owner = Some("P1".into());
        state.pois.insert("c1".into(), city);
        state
    }

    #[test]
    fn test_same_id_different_payload_applies_once() {
        let state = playing_state();
        let mut factory = ActionFactory::new("P1");
        let first = factory.create(
            ActionKind::MoveUnits {
                unit_ids: vec!["u1".into()],
                destination: GeoPoint::new(5.0, 5.0),
                boost: false,
            },
            0,
        );
        let mut second = first.clone();
        second.kind = ActionKind::MoveUnits {
            unit_ids: vec!["u1".into()],
            destination: GeoPoint::new(50.0, 50.0),
            boost: true,
        };

        let mut host = state.clone();
        assert_eq!(apply_action_in_place(&mut host, &first, &OpenTerrain), ApplyOutcome::Applied);
        assert_eq!(apply_action_in_place(&mut host, &second, &OpenTerrain), ApplyOutcome::Duplicate);

        let unit = &host.units["u1"];
        assert_eq!(unit.destination, Some(GeoPoint::new(5.0, 5.0)));
        assert!(!unit.boosting);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let state = playing_state();
        let mut factory = ActionFactory::new("P1");
        let action = factory.create(
            ActionKind::SpawnUnit {
                class: UnitClass::Infantry,
                poi_id: "c1".into(),
            },
            0,
        );
        let once = apply_action(&state, &action, &OpenTerrain);
        let twice = apply_action(&once, &action, &OpenTerrain);
        assert_eq!(once, twice);
        assert_eq!(once.factions["P1"].wallet.gold, 1000 - rules::cost(UnitClass::Infantry));
        assert!(once.units.contains_key("P1#1/0"));
    }

    #[test]
    fn test_forged_id_rejected() {
        let mut state = playing_state();
        let mut factory = ActionFactory::new("P2");
        let mut action = factory.create(
            ActionKind::SetRelation {
                other: "P2".into(),
                relation: Relation::Alliance,
            },
            0,
        );
        action.player_id = "P1".into();
        assert_eq!(
            apply_action_in_place(&mut state, &action, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::ForgedId)
        );
    }

    #[test]
    fn test_move_ignores_foreign_and_static_units() {
        let mut state = playing_state();
        state.units.insert(
            "b1".into(),
            Unit::new("b1", UnitClass::Bunker, "P1", GeoPoint::new(1.0, 1.0)),
        );
        let mut factory = ActionFactory::new("P1");
        let action = factory.create(
            ActionKind::MoveUnits {
                unit_ids: vec!["e1".into(), "b1".into()],
                destination: GeoPoint::new(5.0, 5.0),
                boost: false,
            },
            0,
        );
        assert_eq!(
            apply_action_in_place(&mut state, &action, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::NoEligibleUnits)
        );
        assert!(state.units["e1"].destination.is_none());
    }

    #[test]
    fn test_move_rejects_invalid_terrain() {
        let mut state = playing_state();
        let terrain = RegionTerrain::new(Rect::new(GeoPoint::new(-50.0, -50.0), GeoPoint::new(50.0, 50.0)));
        let mut factory = ActionFactory::new("P1");
        let action = factory.create(
            ActionKind::MoveUnits {
                unit_ids: vec!["u1".into()],
                destination: GeoPoint::new(500.0, 5.0),
                boost: false,
            },
            0,
        );
        assert!(!apply_action_in_place(&mut state, &action, &terrain).is_applied());
        assert!(state.units["u1"].destination.is_none());
    }

    #[test]
    fn test_attack_sets_target_and_clears_destination() {
        let mut state = playing_state();
        if let Some(u) = state.units.get_mut("u1") {
            u.destination = Some(GeoPoint::new(3.0, 3.0));
        }
        let mut factory = ActionFactory::new("P1");
        let action = factory.create(
            ActionKind::Attack {
                unit_ids: vec!["u1".into()],
                target: TargetRef::Unit("e1".into()),
            },
            0,
        );
        assert!(apply_action_in_place(&mut state, &action, &OpenTerrain).is_applied());
        assert_eq!(state.units["u1"].target, Some(TargetRef::Unit("e1".into())));
        assert!(state.units["u1"].destination.is_none());

        let own_poi = factory.create(
            ActionKind::Attack {
                unit_ids: vec!["u1".into()],
                target: TargetRef::Poi("c1".into()),
            },
            0,
        );
        assert_eq!(
            apply_action_in_place(&mut state, &own_poi, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::FriendlyTarget)
        );
    }

    #[test]
    fn test_build_requires_funds_and_structure_class() {
        let mut state = playing_state();
        if let Some(f) = state.factions.get_mut("P1") {
            f.wallet.gold = 100;
        }
        let mut factory = ActionFactory::new("P1");

        let tank = factory.create(
            ActionKind::BuildStructure {
                class: UnitClass::Tank,
                position: GeoPoint::new(30.0, 30.0),
            },
            0,
        );
        assert_eq!(
            apply_action_in_place(&mut state, &tank, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::NotAStructure)
        );

        let factory_building = factory.create(
            ActionKind::BuildStructure {
                class: UnitClass::Factory,
                position: GeoPoint::new(30.0, 30.0),
            },
            0,
        );
        assert_eq!(
            apply_action_in_place(&mut state, &factory_building, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::InsufficientFunds)
        );
        assert_eq!(state.factions["P1"].wallet.gold, 100);
    }

    #[test]
    fn test_select_base_spawns_garrison_and_starts_play() {
        let mut state = WorldState::default();
        state.factions.insert("P1".into(), Faction::new("P1", FactionKind::Human, "#f00"));
        state.factions.insert("B1".into(), Faction::new("B1", FactionKind::Bot, "#0f0"));
        state.pois.insert(
            "c1".into(),
            Poi::new("c1", PoiKind::City, GeoPoint::new(10.0, 10.0), 2),
        );
        state.pois.insert(
            "c2".into(),
            Poi::new("c2", PoiKind::City, GeoPoint::new(60.0, 60.0), 1),
        );

        let mut factory = ActionFactory::new("P1");
        let pick = factory.create(ActionKind::SelectBase { poi_id: "c1".into() }, 0);
        assert!(apply_action_in_place(&mut state, &pick, &OpenTerrain).is_applied());

        assert!(state.pois["c1"].is_owned_by("P1"));
        assert_eq!(state.units_of("P1").count(), rules::STARTER_GARRISON.len());
        assert_eq!(state.phase, MatchPhase::Playing);

        let again = factory.create(ActionKind::SelectBase { poi_id: "c2".into() }, 0);
        assert_eq!(
            apply_action_in_place(&mut state, &again, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::WrongPhase)
        );
    }

    #[test]
    fn test_set_relation_is_mirrored() {
        let mut state = playing_state();
        let mut factory = ActionFactory::new("P1");
        let action = factory.create(
            ActionKind::SetRelation {
                other: "P2".into(),
                relation: Relation::Alliance,
            },
            0,
        );
        assert!(apply_action_in_place(&mut state, &action, &OpenTerrain).is_applied());
        assert!(!state.is_hostile("P1", "P2"));
        assert!(!state.is_hostile("P2", "P1"));
    }

    #[test]
    fn test_acked_tracks_highest_seq() {
        let mut state = playing_state();
        let mut factory = ActionFactory::new("P1");
        let a1 = factory.create(
            ActionKind::SetRelation {
                other: "P2".into(),
                relation: Relation::Neutral,
            },
            0,
        );
        let a2 = factory.create(
            ActionKind::SetRelation {
                other: "P2".into(),
                relation: Relation::War,
            },
            0,
        );
        apply_action_in_place(&mut state, &a2, &OpenTerrain);
        assert_eq!(state.acked["P1"], 2);
        // a1 was overtaken and is treated as lost
        assert_eq!(apply_action_in_place(&mut state, &a1, &OpenTerrain), ApplyOutcome::Duplicate);
        assert_eq!(state.acked["P1"], 2);
    }

    #[test]
    fn test_rejected_action_only_moves_dedup_bookkeeping() {
        let state = playing_state();
        let mut factory = ActionFactory::new("P1");
        let bad = factory.create(
            ActionKind::SpawnUnit {
                class: UnitClass::Infantry,
                poi_id: "nowhere".into(),
            },
            0,
        );
        let mut after = state.clone();
        assert_eq!(
            apply_action_in_place(&mut after, &bad, &OpenTerrain),
            ApplyOutcome::Rejected(RejectReason::UnknownTarget)
        );
        assert_eq!(after.acked["P1"], 1);
        assert!(after.ledger.contains(&bad.id));
        assert_eq!(apply_action_in_place(&mut after, &bad, &OpenTerrain), ApplyOutcome::Duplicate);

        // Everything else matches the input
        after.acked = state.acked.clone();
        after.ledger = state.ledger.clone();
        assert_eq!(after, state);
    }

    #[test]
    fn test_replaying_action_log_is_deterministic() {
        let state = playing_state();
        let mut p1 = ActionFactory::new("P1");
        let mut p2 = ActionFactory::new("P2");
        let log = vec![
            p1.create(
                ActionKind::SpawnUnit {
                    class: UnitClass::Tank,
                    poi_id: "c1".into(),
                },
                0,
            ),
            p2.create(
                ActionKind::Attack {
                    unit_ids: vec!["e1".into()],
                    target: TargetRef::Poi("c1".into()),
                },
                0,
            ),
            p1.create(
                ActionKind::MoveUnits {
                    unit_ids: vec!["u1".into(), "P1#1/0".into()],
                    destination: GeoPoint::new(7.0, 3.0),
                    boost: true,
                },
                0,
            ),
            p1.create(
                ActionKind::BuildStructure {
                    class: UnitClass::Bunker,
                    position: GeoPoint::new(30.0, 30.0),
                },
                0,
            ),
            p2.create(
                ActionKind::SetRelation {
                    other: "P1".into(),
                    relation: Relation::War,
                },
                0,
            ),
        ];

        let replay = || log.iter().fold(state.clone(), |s, a| apply_action(&s, a, &OpenTerrain));
        let first = replay();
        assert_eq!(first, replay());
        assert!(first.units.contains_key("P1#1/0"));
        assert!(first.units["P1#1/0"].boosting);
        assert_ne!(first, state);
    }
}
