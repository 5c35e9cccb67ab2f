//! Utility-scoring AI for bot factions.
//!
//! Each decision round a bot:
//! 1. scores every city (defence for owned, offence otherwise),
//! 2. splits its idle combat units into squads and hands each one an
//!    objective, usually the best one,
//! 3. maybe buys one unit.
//!
//! Every random draw comes from the caller's RNG, so a seeded RNG gives a
//! reproducible bot.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, trace};

use crate::model::{FactionId, FactionKind, GeoPoint, Poi, PoiId, TargetRef, Unit, UnitClass, UnitId, WorldState};
use crate::rules;
use crate::terrain::Terrain;

/// AI tuning.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub squad_size: usize,
    /// Chance a squad goes for the 2nd/3rd best target instead of the best
    pub spread_probability: f64,
    /// Hostiles within this distance of an owned city trigger defence
    pub defense_radius: f64,
    pub defense_base: f64,
    pub defense_per_enemy: f64,
    pub unclaimed_desire: f64,
    pub enemy_desire: f64,
    pub tier_weight: f64,
    pub distance_penalty: f64,
    pub defender_penalty: f64,
    /// Base chance of buying a unit in a round, scaled by aggression
    pub production_chance: f64,
    /// Share of purchases that are ships when a coastal site exists
    pub naval_share: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            squad_size: 5,
            spread_probability: 0.3,
            defense_radius: 30.0,
            defense_base: 50.0,
            defense_per_enemy: 10.0,
            unclaimed_desire: 60.0,
            enemy_desire: 30.0,
            tier_weight: 20.0,
            distance_penalty: 0.5,
            defender_penalty: 8.0,
            production_chance: 0.6,
            naval_share: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveKind {
    /// Take the city
    Offence,
    /// Move onto an owned city under threat
    Defence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTarget {
    pub poi_id: PoiId,
    pub score: f64,
    pub kind: ObjectiveKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SquadOrder {
    pub unit_ids: Vec<UnitId>,
    pub poi_id: PoiId,
    pub kind: ObjectiveKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductionOrder {
    pub class: UnitClass,
    pub poi_id: PoiId,
}

/// One bot's decisions for one round.
#[derive(Debug, Clone, PartialEq)]
pub struct AiPlan {
    pub faction: FactionId,
    pub orders: Vec<SquadOrder>,
    pub production: Option<ProductionOrder>,
}

const LAND_MIX: [(UnitClass, u32); 4] = [
    (UnitClass::Infantry, 5),
    (UnitClass::Tank, 3),
    (UnitClass::Artillery, 2),
    (UnitClass::Jet, 1),
];

#[derive(Debug, Clone, Default)]
pub struct AiEngine {
    config: AiConfig,
}

impl AiEngine {
    pub fn new(config: AiConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    /// Where the faction's power sits: owned cities, else its units.
    fn anchor(state: &WorldState, faction: &str) -> Option<GeoPoint> {
        let owned: Vec<GeoPoint> = state.owned_pois(faction).map(|p| p.position).collect();
        let points = if owned.is_empty() {
            state.units_of(faction).map(|u| u.position).collect()
        } else {
            owned
        };
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (lat, lng) = points.iter().fold((0.0, 0.0), |(a, b), p| (a + p.lat, b + p.lng));
        Some(GeoPoint::new(lat / n, lng / n))
    }

    /// Scores every city for `faction`, best first. Non-positive scores are dropped.
    pub fn score_targets(&self, state: &WorldState, faction: &str) -> Vec<ScoredTarget> {
        let cfg = &self.config;
        let Some(me) = state.factions.get(faction) else { return Vec::new() };
        let anchor = Self::anchor(state, faction);
        let mut targets = Vec::new();

        for poi in state.pois.values().filter(|p| p.is_city()) {
            let near = |u: &&Unit| u.is_alive() && u.position.distance_to(&poi.position) <= cfg.defense_radius;

            if poi.is_owned_by(faction) {
                let enemies = state
                    .units
                    .values()
                    .filter(near)
                    .filter(|u| state.is_hostile(faction, &u.faction_id))
                    .count();
                if enemies > 0 {
                    targets.push(ScoredTarget {
                        poi_id: poi.id.clone(),
                        score: cfg.defense_base
                            + f64::from(poi.tier) * cfg.tier_weight
                            + enemies as f64 * cfg.defense_per_enemy,
                        kind: ObjectiveKind::Defence,
                    });
                }
                continue;
            }

            if !state.poi_is_attackable_by(poi, faction) {
                continue;
            }
            let Some(anchor) = anchor else { continue };
            let (desire, defenders) = match &poi.owner {
                None => (cfg.unclaimed_desire, 0),
                Some(owner) => (
                    cfg.enemy_desire,
                    state.units_of(owner).filter(near).count(),
                ),
            };
            let score = (desire + f64::from(poi.tier) * cfg.tier_weight
                - anchor.distance_to(&poi.position) * cfg.distance_penalty
                - defenders as f64 * cfg.defender_penalty)
                * me.aggression;
            targets.push(ScoredTarget {
                poi_id: poi.id.clone(),
                score,
                kind: ObjectiveKind::Offence,
            });
        }

        targets.retain(|t| t.score > 0.0);
        targets.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.poi_id.cmp(&b.poi_id)));
        targets
    }

    /// Idle, mobile, armed units split into squads, in id order.
    pub fn form_squads(&self, state: &WorldState, faction: &str) -> Vec<Vec<UnitId>> {
        let idle: Vec<UnitId> = state
            .units_of(faction)
            .filter(|u| u.is_alive() && u.is_idle() && !u.is_static() && u.is_armed())
            .map(|u| u.id.clone())
            .collect();
        idle.chunks(self.config.squad_size.max(1)).map(<[UnitId]>::to_vec).collect()
    }

    /// Maybe picks one unit to buy. `None` if the roll fails, no site is
    /// owned, or the pick is unaffordable.
    pub fn choose_production<R: Rng + ?Sized>(
        &self,
        state: &WorldState,
        faction: &str,
        rng: &mut R,
    ) -> Option<ProductionOrder> {
        let me = state.factions.get(faction)?;
        let chance = (self.config.production_chance * me.aggression).clamp(0.0, 1.0);
        if !rng.gen_bool(chance) {
            return None;
        }

        let sites: Vec<&Poi> = state.owned_pois(faction).filter(|p| p.is_city()).collect();
        let coastal: Vec<&&Poi> = sites.iter().filter(|p| p.coastal).collect();

        let (class, site) = if !coastal.is_empty() && rng.gen_bool(self.config.naval_share.clamp(0.0, 1.0)) {
            (UnitClass::Ship, **coastal.choose(rng)?)
        } else {
            let class = LAND_MIX.choose_weighted(rng, |(_, w)| *w).ok()?.0;
            (class, *sites.choose(rng)?)
        };

        if me.wallet.gold < rules::cost(class) {
            trace!(faction, ?class, "bot cannot afford unit");
            return None;
        }
        Some(ProductionOrder {
            class,
            poi_id: site.id.clone(),
        })
    }

    /// Decides one round for `faction` without touching the world.
    pub fn plan<R: Rng + ?Sized>(&self, state: &WorldState, faction: &str, rng: &mut R) -> AiPlan {
        let targets = self.score_targets(state, faction);
        let mut orders = Vec::new();

        if !targets.is_empty() {
            for squad in self.form_squads(state, faction) {
                let mut index = 0;
                if targets.len() > 1 && rng.gen_bool(self.config.spread_probability.clamp(0.0, 1.0)) {
                    index = rng.gen_range(1..=targets.len().min(3) - 1);
                }
                let target = &targets[index];
                orders.push(SquadOrder {
                    unit_ids: squad,
                    poi_id: target.poi_id.clone(),
                    kind: target.kind,
                });
            }
        }

        AiPlan {
            faction: faction.to_string(),
            orders,
            production: self.choose_production(state, faction, rng),
        }
    }

    /// Carries out a plan. Orders that no longer fit the world are skipped.
    pub fn apply_plan(&self, state: &mut WorldState, terrain: &dyn Terrain, plan: &AiPlan) {
        for order in &plan.orders {
            let Some(poi_pos) = state.pois.get(&order.poi_id).map(|p| p.position) else { continue };
            for id in &order.unit_ids {
                let valid_dest = state.units.get(id).is_some_and(|u| {
                    terrain.is_valid_move(u.class, &poi_pos, &state.pois, &state.units, &plan.faction)
                });
                let Some(unit) = state.units.get_mut(id) else { continue };
                match order.kind {
                    ObjectiveKind::Offence => {
                        unit.target = Some(TargetRef::Poi(order.poi_id.clone()));
                        unit.destination = None;
                    }
                    ObjectiveKind::Defence if valid_dest => {
                        unit.destination = Some(poi_pos);
                        unit.target = None;
                    }
                    ObjectiveKind::Defence => {}
                }
            }
        }

        if let Some(production) = &plan.production {
            self.produce(state, terrain, &plan.faction, production);
        }
    }

    fn produce(&self, state: &mut WorldState, terrain: &dyn Terrain, faction: &str, order: &ProductionOrder) {
        let cost = rules::cost(order.class);
        let Some(origin) = state
            .pois
            .get(&order.poi_id)
            .filter(|p| p.is_owned_by(faction))
            .map(|p| p.position)
        else {
            return;
        };
        if state.factions.get(faction).map_or(true, |f| f.wallet.gold < cost) {
            return;
        }

        let serial = state.next_serial();
        let Some(position) = (0..8)
            .map(|slot| origin.ring_offset(serial + slot, rules::SPAWN_RING_RADIUS))
            .find(|p| terrain.is_valid_move(order.class, p, &state.pois, &state.units, faction))
        else {
            return;
        };

        if let Some(f) = state.factions.get_mut(faction) {
            f.wallet.gold -= cost;
        }
        let id = format!("ai:{}:{}:{}", faction, state.tick, serial);
        debug!(faction, unit = %id, class = ?order.class, "bot produced unit");
        state
            .units
            .insert(id.clone(), Unit::new(id, order.class, faction.to_string(), position));
    }

    /// Runs one decision round for every bot faction.
    pub fn run<R: Rng + ?Sized>(&self, state: &mut WorldState, terrain: &dyn Terrain, rng: &mut R) {
        let bots: Vec<FactionId> = state
            .factions
            .values()
            .filter(|f| f.kind == FactionKind::Bot)
            .map(|f| f.id.clone())
            .collect();
        for faction in bots {
            let plan = self.plan(state, &faction, rng);
            trace!(
                faction = %faction,
                orders = plan.orders.len(),
                produce = plan.production.is_some(),
                "bot plan"
            );
            self.apply_plan(state, terrain, &plan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Faction, MatchPhase, PoiKind};
    use crate::terrain::OpenTerrain;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn bot_world() -> WorldState {
        let mut state = WorldState {
            phase: MatchPhase::Playing,
            ..WorldState::default()
        };
        let mut bot = Faction::new("B1", FactionKind::Bot, "#0f0");
        bot.wallet.gold = 1000;
        state.factions.insert("B1".into(), bot);
        state.factions.insert("P1".into(), Faction::new("P1", FactionKind::Human, "#f00"));

        let mut home = Poi::new("home", PoiKind::City, GeoPoint::new(0.0, 0.0), 1);
        home.owner = Some("B1".into());
        state.pois.insert("home".into(), home);
        state
            .pois
            .insert("near".into(), Poi::new("near", PoiKind::City, GeoPoint::new(0.0, 20.0), 1));
        let mut far = Poi::new("far", PoiKind::City, GeoPoint::new(0.0, 80.0), 1);
        far.owner = Some("P1".into());
        state.pois.insert("far".into(), far);
        state
    }

    fn add_units(state: &mut WorldState, faction: &str, count: usize, class: UnitClass) {
        for i in 0..count {
            let id = format!("{faction}-{i:02}");
            state
                .units
                .insert(id.clone(), Unit::new(id, class, faction, GeoPoint::new(1.0, i as f64 * 0.1)));
        }
    }

    #[test]
    fn test_unclaimed_near_city_scores_highest() {
        let state = bot_world();
        let engine = AiEngine::default();
        let targets = engine.score_targets(&state, "B1");
        assert_eq!(targets[0].poi_id, "near");
        assert_eq!(targets[0].kind, ObjectiveKind::Offence);
        // 30 + 20 - 40 = 10 for the far enemy city
        assert!(targets.iter().any(|t| t.poi_id == "far"));
        assert!(targets.iter().all(|t| t.poi_id != "home"));
    }

    #[test]
    fn test_threatened_city_gets_defence_score() {
        let mut state = bot_world();
        add_units(&mut state, "P1", 2, UnitClass::Infantry);
        let engine = AiEngine::default();
        let targets = engine.score_targets(&state, "B1");
        let home = targets.iter().find(|t| t.poi_id == "home").map(|t| t.score);
        assert_eq!(home, Some(50.0 + 20.0 + 2.0 * 10.0));
    }

    #[test]
    fn test_squads_of_five() {
        let mut state = bot_world();
        add_units(&mut state, "B1", 12, UnitClass::Infantry);
        state.units.insert(
            "B1-bunker".into(),
            Unit::new("B1-bunker", UnitClass::Bunker, "B1", GeoPoint::new(2.0, 2.0)),
        );
        let squads = AiEngine::default().form_squads(&state, "B1");
        let sizes: Vec<usize> = squads.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
    }

    #[test]
    fn test_spread_controls_target_choice() {
        let mut state = bot_world();
        add_units(&mut state, "B1", 20, UnitClass::Infantry);
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let focused = AiEngine::new(AiConfig {
            spread_probability: 0.0,
            ..AiConfig::default()
        });
        let plan = focused.plan(&state, "B1", &mut rng);
        assert_eq!(plan.orders.len(), 4);
        assert!(plan.orders.iter().all(|o| o.poi_id == "near"));

        let scattered = AiEngine::new(AiConfig {
            spread_probability: 1.0,
            ..AiConfig::default()
        });
        let plan = scattered.plan(&state, "B1", &mut rng);
        assert!(plan.orders.iter().all(|o| o.poi_id != "near"));
    }

    #[test]
    fn test_production_needs_gold() {
        let mut state = bot_world();
        if let Some(f) = state.factions.get_mut("B1") {
            f.wallet.gold = 0;
        }
        let engine = AiEngine::new(AiConfig {
            production_chance: 1.0,
            ..AiConfig::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..20 {
            assert!(engine.choose_production(&state, "B1", &mut rng).is_none());
        }
    }

    #[test]
    fn test_ships_only_with_coastal_site() {
        let mut state = bot_world();
        let engine = AiEngine::new(AiConfig {
            production_chance: 1.0,
            naval_share: 1.0,
            ..AiConfig::default()
        });
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..20 {
            if let Some(order) = engine.choose_production(&state, "B1", &mut rng) {
                assert_ne!(order.class, UnitClass::Ship);
            }
        }

        if let Some(home) = state.pois.get_mut("home") {
            home.coastal = true;
        }
        let order = engine.choose_production(&state, "B1", &mut rng);
        assert_eq!(
            order,
            Some(ProductionOrder {
                class: UnitClass::Ship,
                poi_id: "home".into(),
            })
        );
    }

    #[test]
    fn test_run_is_reproducible_with_seed() {
        let mut base = bot_world();
        add_units(&mut base, "B1", 7, UnitClass::Tank);
        let engine = AiEngine::default();

        let mut a = base.clone();
        let mut b = base.clone();
        engine.run(&mut a, &OpenTerrain, &mut ChaCha8Rng::seed_from_u64(42));
        engine.run(&mut b, &OpenTerrain, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
        assert!(a
            .units_of("B1")
            .filter(|u| u.id.starts_with("B1-"))
            .all(|u| u.target.is_some()));
    }

    #[test]
    fn test_ai_ignores_factions_without_units_or_cities() {
        let mut state = WorldState {
            phase: MatchPhase::Playing,
            ..WorldState::default()
        };
        state.factions.insert("B1".into(), Faction::new("B1", FactionKind::Bot, "#0f0"));
        let before = state.clone();
        AiEngine::default().run(&mut state, &OpenTerrain, &mut ChaCha8Rng::seed_from_u64(0));
        assert_eq!(state, before);
    }
}
