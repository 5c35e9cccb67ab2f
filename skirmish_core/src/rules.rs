//! Gameplay tuning: per-class stats and simulation constants.

use crate::model::{PoiKind, UnitClass};

/// Fraction of the attack stat dealt per shot.
pub const DAMAGE_FRACTION: f64 = 0.5;

/// Damage floor per shot.
pub const MIN_DAMAGE: f64 = 5.0;

/// Units chasing a target stop closing in once inside this share of range.
pub const ENGAGE_RANGE_FRACTION: f64 = 0.8;

/// Same-faction units closer than this push each other apart.
pub const SEPARATION_RADIUS: f64 = 1.5;

/// Weight of the separation force relative to the desired heading.
pub const SEPARATION_WEIGHT: f64 = 0.6;

/// How far ahead (in ticks) movement probes terrain.
pub const LOOKAHEAD_TICKS: f64 = 5.0;

/// Weight of the perpendicular avoidance force.
pub const AVOIDANCE_WEIGHT: f64 = 1.0;

pub const BOOST_MULTIPLIER: f64 = 2.0;
pub const BOOST_DURATION_TICKS: u32 = 75;

/// Share of max hp an owned POI regenerates per tick.
pub const POI_REGEN_FRACTION: f64 = 0.0003;

/// Hp a captured POI is left with, as a share of max.
pub const CAPTURE_HP_FRACTION: f64 = 0.5;

pub const INCOME_INTERVAL_TICKS: u64 = 25;
pub const CITY_GOLD_PER_TIER: u64 = 10;
pub const FACTORY_GOLD: u64 = 15;
/// One gold per this many units
pub const UNITS_PER_GOLD: u64 = 4;
pub const OIL_FIELD_OIL: u64 = 5;

pub const EXPLOSION_TTL_TICKS: u64 = 12;

/// A unit hit this recently (and otherwise idle) shoots back.
pub const RETALIATION_WINDOW_TICKS: u64 = 1;

pub const STARTING_GOLD: u64 = 500;
pub const STARTER_GARRISON: [UnitClass; 3] = [UnitClass::Infantry, UnitClass::Infantry, UnitClass::Tank];

/// Distance from a POI at which new units appear.
pub const SPAWN_RING_RADIUS: f64 = 2.5;

/// How a class delivers damage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WeaponKind {
    /// Damage lands the tick the unit fires
    Instant,
    /// Damage lands on arrival; `speed` is map units per tick
    Projectile { speed: f64 },
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub max_hp: f64,
    pub attack: f64,
    pub range: f64,
    pub speed: f64,
    pub vision: f64,
    pub cooldown_ticks: u32,
    pub can_capture: bool,
    pub weapon: WeaponKind,
    pub cost: u64,
}

pub fn stats(class: UnitClass) -> ClassStats {
    use UnitClass::*;
    use WeaponKind::*;
    match class {
        Infantry => ClassStats {
            max_hp: 100.0,
            attack: 20.0,
            range: 8.0,
            speed: 0.3,
            vision: 20.0,
            cooldown_ticks: 10,
            can_capture: true,
            weapon: Instant,
            cost: 50,
        },
        Tank => ClassStats {
            max_hp: 400.0,
            attack: 90.0,
            range: 15.0,
            speed: 0.5,
            vision: 25.0,
            cooldown_ticks: 20,
            can_capture: true,
            weapon: Instant,
            cost: 200,
        },
        Artillery => ClassStats {
            max_hp: 150.0,
            attack: 120.0,
            range: 35.0,
            speed: 0.25,
            vision: 30.0,
            cooldown_ticks: 40,
            can_capture: false,
            weapon: Projectile { speed: 2.0 },
            cost: 250,
        },
        Jet => ClassStats {
            max_hp: 200.0,
            attack: 60.0,
            range: 12.0,
            speed: 1.6,
            vision: 45.0,
            cooldown_ticks: 15,
            can_capture: false,
            weapon: Instant,
            cost: 350,
        },
        Ship => ClassStats {
            max_hp: 600.0,
            attack: 100.0,
            range: 30.0,
            speed: 0.4,
            vision: 40.0,
            cooldown_ticks: 30,
            can_capture: false,
            weapon: Projectile { speed: 1.5 },
            cost: 400,
        },
        Bunker => ClassStats {
            max_hp: 800.0,
            attack: 40.0,
            range: 14.0,
            speed: 0.0,
            vision: 25.0,
            cooldown_ticks: 12,
            can_capture: false,
            weapon: Instant,
            cost: 150,
        },
        Factory => ClassStats {
            max_hp: 600.0,
            attack: 0.0,
            range: 0.0,
            speed: 0.0,
            vision: 15.0,
            cooldown_ticks: 0,
            can_capture: false,
            weapon: None,
            cost: 300,
        },
    }
}

pub fn cost(class: UnitClass) -> u64 {
    stats(class).cost
}

pub fn damage_for(attack: f64) -> f64 {
    (attack * DAMAGE_FRACTION).max(MIN_DAMAGE)
}

pub fn poi_max_hp(tier: u8) -> f64 {
    2000.0 * f64::from(tier.max(1))
}

pub fn capture_radius(tier: u8) -> f64 {
    4.0 + 2.0 * f64::from(tier)
}

/// Gold paid each income interval for one owned POI.
pub fn poi_gold(kind: PoiKind, tier: u8) -> u64 {
    match kind {
        PoiKind::City => CITY_GOLD_PER_TIER * u64::from(tier),
        PoiKind::OilField => 0,
    }
}

/// Oil paid each income interval for one owned POI.
pub fn poi_oil(kind: PoiKind) -> u64 {
    match kind {
        PoiKind::OilField => OIL_FIELD_OIL,
        PoiKind::City => 0,
    }
}
