//! Building the initial world for a match.

use thiserror::Error;
use tracing::debug;

use crate::model::{
    Faction, FactionId, FactionKind, GeoPoint, MatchPhase, Poi, PoiId, PoiKind, Relation, Unit, WorldState,
};
use crate::rules;
use crate::terrain::{Rect, RegionTerrain};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SetupError {
    #[error("unknown faction {0}")]
    UnknownFaction(FactionId),
    #[error("unknown poi {0}")]
    UnknownPoi(PoiId),
    #[error("poi {0} is already someone's base")]
    BaseTaken(PoiId),
    #[error("duplicate id {0}")]
    Duplicate(String),
}

/// Builder for the opening world.
#[derive(Debug, Clone)]
pub struct MatchSetup {
    factions: Vec<Faction>,
    pois: Vec<Poi>,
    bases: Vec<(FactionId, PoiId)>,
    starting_gold: u64,
}

impl Default for MatchSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchSetup {
    pub fn new() -> Self {
        Self {
            factions: Vec::new(),
            pois: Vec::new(),
            bases: Vec::new(),
            starting_gold: rules::STARTING_GOLD,
        }
    }

    pub fn with_starting_gold(mut self, gold: u64) -> Self {
        self.starting_gold = gold;
        self
    }

    pub fn human(mut self, id: impl Into<FactionId>, color: &str) -> Self {
        self.factions.push(Faction::new(id, FactionKind::Human, color));
        self
    }

    pub fn bot(mut self, id: impl Into<FactionId>, color: &str, aggression: f64) -> Self {
        let mut faction = Faction::new(id, FactionKind::Bot, color);
        faction.aggression = aggression;
        self.factions.push(faction);
        self
    }

    pub fn city(mut self, id: &str, position: GeoPoint, tier: u8, coastal: bool) -> Self {
        let mut poi = Poi::new(id, PoiKind::City, position, tier);
        poi.coastal = coastal;
        self.pois.push(poi);
        self
    }

    pub fn oil_field(mut self, id: &str, position: GeoPoint) -> Self {
        self.pois.push(Poi::new(id, PoiKind::OilField, position, 1));
        self
    }

    /// Pre-assigns a base, typically for bots.
    pub fn assign_base(mut self, faction: impl Into<FactionId>, poi: impl Into<PoiId>) -> Self {
        self.bases.push((faction.into(), poi.into()));
        self
    }

    pub fn build(self) -> Result<WorldState, SetupError> {
        let mut state = WorldState::default();

        for mut faction in self.factions {
            faction.wallet.gold = self.starting_gold;
            if state.factions.contains_key(&faction.id) {
                return Err(SetupError::Duplicate(faction.id));
            }
            state.factions.insert(faction.id.clone(), faction);
        }
        let ids: Vec<FactionId> = state.factions.keys().cloned().collect();
        for faction in state.factions.values_mut() {
            for other in &ids {
                if *other != faction.id {
                    faction.relations.insert(other.clone(), Relation::War);
                }
            }
        }

        for poi in self.pois {
            if state.pois.contains_key(&poi.id) {
                return Err(SetupError::Duplicate(poi.id));
            }
            state.pois.insert(poi.id.clone(), poi);
        }

        for (faction, poi_id) in self.bases {
            if !state.factions.contains_key(&faction) {
                return Err(SetupError::UnknownFaction(faction));
            }
            let poi = state
                .pois
                .get_mut(&poi_id)
                .ok_or_else(|| SetupError::UnknownPoi(poi_id.clone()))?;
            if poi.owner.is_some() {
                return Err(SetupError::BaseTaken(poi_id));
            }
            poi.owner = Some(faction.clone());
            let origin = poi.position;
            for (i, class) in rules::STARTER_GARRISON.iter().enumerate() {
                let id = format!("{}:garrison:{}", faction, i);
                let position = origin.ring_offset(i as u64, rules::SPAWN_RING_RADIUS);
                state.units.insert(id.clone(), Unit::new(id, *class, faction.clone(), position));
            }
        }

        let waiting = state
            .factions
            .values()
            .filter(|f| f.kind == FactionKind::Human)
            .any(|f| state.owned_pois(&f.id).next().is_none());
        state.phase = if waiting {
            MatchPhase::BaseSelection
        } else {
            MatchPhase::Playing
        };
        debug!(
            factions = state.factions.len(),
            pois = state.pois.len(),
            phase = ?state.phase,
            "match world built"
        );
        Ok(state)
    }
}

/// Terrain for [`skirmish_map`]: a 100x100 land mass with a sea to the east.
pub fn skirmish_terrain() -> RegionTerrain {
    RegionTerrain::new(Rect::new(GeoPoint::new(0.0, 0.0), GeoPoint::new(100.0, 100.0)))
        .with_water(Rect::new(GeoPoint::new(0.0, 85.0), GeoPoint::new(100.0, 100.0)))
}

const CITIES: [(&str, f64, f64, u8, bool); 8] = [
    ("northgate", 85.0, 15.0, 2, false),
    ("southport", 15.0, 80.0, 2, true),
    ("westmarch", 50.0, 10.0, 1, false),
    ("eastharbor", 55.0, 81.0, 1, true),
    ("highpeak", 80.0, 55.0, 1, false),
    ("lowvale", 20.0, 40.0, 1, false),
    ("crossroads", 50.0, 45.0, 3, false),
    ("baypoint", 88.0, 80.0, 1, true),
];

const OIL_FIELDS: [(&str, f64, f64); 2] = [("oil-north", 70.0, 30.0), ("oil-south", 30.0, 62.0)];

/// The stock map. Bots take bases in city order; humans pick theirs.
pub fn skirmish_map(humans: &[&str], bots: &[&str]) -> MatchSetup {
    const COLORS: [&str; 6] = ["#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4"];
    let mut setup = MatchSetup::new();
    for (i, id) in humans.iter().enumerate() {
        setup = setup.human(*id, COLORS[i % COLORS.len()]);
    }
    for (i, id) in bots.iter().enumerate() {
        setup = setup.bot(*id, COLORS[(humans.len() + i) % COLORS.len()], 1.0);
    }
    for (id, lat, lng, tier, coastal) in CITIES {
        setup = setup.city(id, GeoPoint::new(lat, lng), tier, coastal);
    }
    for (id, lat, lng) in OIL_FIELDS {
        setup = setup.oil_field(id, GeoPoint::new(lat, lng));
    }
    for (bot, (city, ..)) in bots.iter().zip(CITIES.iter().rev()) {
        setup = setup.assign_base(*bot, *city);
    }
    setup
}

/// The stock map with humans pre-placed from the first city onward.
///
/// Fails at `build` when humans and bots together outnumber the cities.
pub fn skirmish_map_placed(humans: &[&str], bots: &[&str]) -> MatchSetup {
    let mut setup = skirmish_map(humans, bots);
    for (human, (city, ..)) in humans.iter().zip(CITIES.iter()) {
        setup = setup.assign_base(*human, *city);
    }
    setup
}
