//! World data model: units, factions, points of interest and the
//! authoritative state that holds them.
//!
//! Every collection is a `BTreeMap` keyed by id so that iteration order is
//! identical on every peer. Replaying the same action log over the same
//! initial state must produce the same world.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::action::ActionId;
use crate::rules::{self, WeaponKind};

pub type UnitId = String;
pub type FactionId = String;
pub type PoiId = String;

/// A position on the map.
///
/// The simulator treats `(lng, lat)` as planar `(x, y)` map units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        (other.to_vector() - self.to_vector()).norm()
    }

    /// Heading (radians, counter-clockwise from +lng) pointing at `other`.
    pub fn bearing_to(&self, other: &GeoPoint) -> f64 {
        (other.lat - self.lat).atan2(other.lng - self.lng)
    }

    pub fn to_vector(self) -> Vector2<f64> {
        Vector2::new(self.lng, self.lat)
    }

    pub fn from_vector(v: Vector2<f64>) -> Self {
        Self { lat: v.y, lng: v.x }
    }

    /// Linear interpolation; `t = 0` is `self`, `t = 1` is `other`.
    pub fn lerp(&self, other: &GeoPoint, t: f64) -> GeoPoint {
        let t = t.clamp(0.0, 1.0);
        GeoPoint {
            lat: self.lat + (other.lat - self.lat) * t,
            lng: self.lng + (other.lng - self.lng) * t,
        }
    }

    /// Deterministic point on a ring around `self`, used for spawn offsets.
    pub fn ring_offset(&self, slot: u64, radius: f64) -> GeoPoint {
        // Golden angle keeps successive slots well apart
        let angle = slot as f64 * 2.399_963_229_728_653;
        GeoPoint {
            lat: self.lat + radius * angle.sin(),
            lng: self.lng + radius * angle.cos(),
        }
    }
}

/// Kind of unit. Structures are units with zero speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnitClass {
    Infantry,
    Tank,
    Artillery,
    Jet,
    Ship,
    Bunker,
    Factory,
}

impl UnitClass {
    pub fn is_structure(self) -> bool {
        matches!(self, UnitClass::Bunker | UnitClass::Factory)
    }

    pub fn is_naval(self) -> bool {
        matches!(self, UnitClass::Ship)
    }

    pub fn is_air(self) -> bool {
        matches!(self, UnitClass::Jet)
    }

    pub fn is_mobile(self) -> bool {
        !self.is_structure()
    }
}

/// Something a unit can be ordered to attack.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetRef {
    Unit(UnitId),
    Poi(PoiId),
}

/// One unit on the battlefield.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub class: UnitClass,
    pub faction_id: FactionId,
    pub position: GeoPoint,
    /// Radians, see [`GeoPoint::bearing_to`]
    pub heading: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub attack: f64,
    pub range: f64,
    /// Map units per tick
    pub speed: f64,
    pub vision: f64,
    pub can_capture: bool,
    pub destination: Option<GeoPoint>,
    pub target: Option<TargetRef>,
    pub last_attacker: Option<UnitId>,
    pub last_hit_tick: Option<u64>,
    /// Ticks until the unit may fire again
    pub cooldown: u32,
    pub boosting: bool,
    pub boost_ticks: u32,
}

impl Unit {
    /// Creates a unit with the class's stock stats.
    pub fn new(id: impl Into<UnitId>, class: UnitClass, faction_id: impl Into<FactionId>, position: GeoPoint) -> Self {
        let stats = rules::stats(class);
        Self {
            id: id.into(),
            class,
            faction_id: faction_id.into(),
            position,
            heading: 0.0,
            hp: stats.max_hp,
            max_hp: stats.max_hp,
            attack: stats.attack,
            range: stats.range,
            speed: stats.speed,
            vision: stats.vision,
            can_capture: stats.can_capture,
            destination: None,
            target: None,
            last_attacker: None,
            last_hit_tick: None,
            cooldown: 0,
            boosting: false,
            boost_ticks: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0.0
    }

    pub fn is_static(&self) -> bool {
        self.class.is_structure() || self.speed <= 0.0
    }

    pub fn is_armed(&self) -> bool {
        self.attack > 0.0 && self.range > 0.0
    }

    /// No orders and able to take one from the AI.
    pub fn is_idle(&self) -> bool {
        self.destination.is_none() && self.target.is_none()
    }

    pub fn weapon(&self) -> WeaponKind {
        rules::stats(self.class).weapon
    }

    /// Current per-tick speed, including the boost multiplier.
    pub fn effective_speed(&self) -> f64 {
        if self.boosting {
            self.speed * rules::BOOST_MULTIPLIER
        } else {
            self.speed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FactionKind {
    Human,
    Bot,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    Alliance,
    Neutral,
    War,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Wallet {
    pub gold: u64,
    pub oil: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub id: FactionId,
    pub color: String,
    pub kind: FactionKind,
    pub wallet: Wallet,
    pub relations: BTreeMap<FactionId, Relation>,
    /// AI only: scales offensive desire and production rolls
    pub aggression: f64,
}

impl Faction {
    pub fn new(id: impl Into<FactionId>, kind: FactionKind, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            color: color.into(),
            kind,
            wallet: Wallet::default(),
            relations: BTreeMap::new(),
            aggression: 1.0,
        }
    }

    /// Unlisted factions are at war with each other.
    pub fn relation_to(&self, other: &str) -> Relation {
        if other == self.id {
            return Relation::Alliance;
        }
        self.relations.get(other).copied().unwrap_or(Relation::War)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoiKind {
    City,
    OilField,
}

/// A capturable point of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: PoiId,
    pub name: String,
    pub kind: PoiKind,
    pub position: GeoPoint,
    /// `None` = unclaimed
    pub owner: Option<FactionId>,
    pub tier: u8,
    pub hp: f64,
    pub max_hp: f64,
    pub coastal: bool,
}

impl Poi {
    pub fn new(id: impl Into<PoiId>, kind: PoiKind, position: GeoPoint, tier: u8) -> Self {
        let id = id.into();
        let max_hp = rules::poi_max_hp(tier);
        Self {
            name: id.clone(),
            id,
            kind,
            position,
            owner: None,
            tier,
            hp: max_hp,
            max_hp,
            coastal: false,
        }
    }

    pub fn is_city(&self) -> bool {
        self.kind == PoiKind::City
    }

    pub fn is_owned_by(&self, faction: &str) -> bool {
        self.owner.as_deref() == Some(faction)
    }

    pub fn capture_radius(&self) -> f64 {
        rules::capture_radius(self.tier)
    }
}

/// A slow weapon round in flight. Damage resolves on arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectile {
    pub id: u64,
    pub attacker_id: UnitId,
    pub attacker_faction: FactionId,
    pub can_capture: bool,
    pub target: TargetRef,
    pub origin: GeoPoint,
    pub impact: GeoPoint,
    pub launched_tick: u64,
    pub arrival_tick: u64,
    pub damage: f64,
}

impl Projectile {
    /// Interpolated position at `tick`, for renderers.
    pub fn position_at(&self, tick: u64) -> GeoPoint {
        let flight = self.arrival_tick.saturating_sub(self.launched_tick).max(1);
        let elapsed = tick.saturating_sub(self.launched_tick);
        self.origin.lerp(&self.impact, elapsed as f64 / flight as f64)
    }
}

/// A visual-only impact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explosion {
    pub id: u64,
    pub position: GeoPoint,
    pub tick: u64,
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchPhase {
    BaseSelection,
    Playing,
    Ended,
}

/// Per-issuer record of applied action ids.
///
/// Ids are `(player, seq)` with `seq` increasing per issuer, so each issuer
/// keeps a contiguous `floor` plus the few ids seen above it. Memory stays
/// bounded even for long matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionLedger {
    players: BTreeMap<String, LedgerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct LedgerEntry {
    floor: u64,
    above: BTreeSet<u64>,
}

impl ActionLedger {
    /// Seeds the ledger from a snapshot's `acked` map.
    pub fn from_acked(acked: &BTreeMap<String, u64>) -> Self {
        let players = acked
            .iter()
            .map(|(player, &floor)| {
                (
                    player.clone(),
                    LedgerEntry {
                        floor,
                        above: BTreeSet::new(),
                    },
                )
            })
            .collect();
        Self { players }
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.players
            .get(&id.player)
            .map(|e| id.seq <= e.floor || e.above.contains(&id.seq))
            .unwrap_or(false)
    }

    pub fn record(&mut self, id: &ActionId) {
        let entry = self.players.entry(id.player.clone()).or_default();
        if id.seq <= entry.floor {
            return;
        }
        entry.above.insert(id.seq);
        while entry.above.remove(&(entry.floor + 1)) {
            entry.floor += 1;
        }
    }

    /// Treats every id from `player` up to `floor` as seen.
    pub fn raise_floor(&mut self, player: &str, floor: u64) {
        if floor == 0 && !self.players.contains_key(player) {
            return;
        }
        let entry = self.players.entry(player.to_string()).or_default();
        if floor <= entry.floor {
            return;
        }
        entry.floor = floor;
        entry.above.retain(|&seq| seq > floor);
        while entry.above.remove(&(entry.floor + 1)) {
            entry.floor += 1;
        }
    }

    /// Highest seq below which every id from `player` has been seen.
    pub fn floor(&self, player: &str) -> u64 {
        self.players.get(player).map(|e| e.floor).unwrap_or(0)
    }

    /// Drops all records for a departed peer.
    pub fn purge(&mut self, player: &str) {
        self.players.remove(player);
    }

    pub fn tracked_players(&self) -> usize {
        self.players.len()
    }
}

/// The complete simulated world.
///
/// On the host this is authoritative. On a client it is either the last
/// snapshot or the predicted overlay built on top of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub phase: MatchPhase,
    pub tick: u64,
    pub version: u64,
    pub units: BTreeMap<UnitId, Unit>,
    pub factions: BTreeMap<FactionId, Faction>,
    pub pois: BTreeMap<PoiId, Poi>,
    pub projectiles: Vec<Projectile>,
    pub explosions: Vec<Explosion>,
    /// Highest action seq applied per issuer
    pub acked: BTreeMap<String, u64>,
    /// Id source for projectiles, explosions and AI-built units
    pub next_serial: u64,
    /// Local dedup bookkeeping, never replicated
    #[serde(skip)]
    pub ledger: ActionLedger,
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            phase: MatchPhase::BaseSelection,
            tick: 0,
            version: 0,
            units: BTreeMap::new(),
            factions: BTreeMap::new(),
            pois: BTreeMap::new(),
            projectiles: Vec::new(),
            explosions: Vec::new(),
            acked: BTreeMap::new(),
            next_serial: 0,
            ledger: ActionLedger::default(),
        }
    }
}

impl WorldState {
    /// Two factions are hostile unless identical or allied.
    pub fn is_hostile(&self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        match self.factions.get(a) {
            Some(f) => f.relation_to(b) != Relation::Alliance,
            None => true,
        }
    }

    /// True if `faction` may attack this POI: unclaimed or hostile-owned.
    pub fn poi_is_attackable_by(&self, poi: &Poi, faction: &str) -> bool {
        match &poi.owner {
            None => true,
            Some(owner) => self.is_hostile(faction, owner),
        }
    }

    pub fn target_position(&self, target: &TargetRef) -> Option<GeoPoint> {
        match target {
            TargetRef::Unit(id) => self.units.get(id).filter(|u| u.is_alive()).map(|u| u.position),
            TargetRef::Poi(id) => self.pois.get(id).map(|p| p.position),
        }
    }

    pub fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub fn units_of<'a>(&'a self, faction: &'a str) -> impl Iterator<Item = &'a Unit> + 'a {
        self.units.values().filter(move |u| u.faction_id == faction)
    }

    pub fn owned_pois<'a>(&'a self, faction: &'a str) -> impl Iterator<Item = &'a Poi> + 'a {
        self.pois.values().filter(move |p| p.is_owned_by(faction))
    }

    /// Checks the conservation invariants. Returns human-readable violations.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        for unit in self.units.values() {
            if unit.hp > unit.max_hp {
                violations.push(format!("unit {} hp {} > max {}", unit.id, unit.hp, unit.max_hp));
            }
        }
        for poi in self.pois.values() {
            if poi.hp < 0.0 {
                violations.push(format!("poi {} hp {} < 0", poi.id, poi.hp));
            }
            if poi.hp > poi.max_hp {
                violations.push(format!("poi {} hp {} > max {}", poi.id, poi.hp, poi.max_hp));
            }
        }
        violations
    }
}
