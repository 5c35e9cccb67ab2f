//! Terrain predicates consumed by movement and placement validation.

use std::collections::BTreeMap;

use crate::model::{GeoPoint, Poi, PoiId, Unit, UnitClass, UnitId};

/// Pure terrain queries.
///
/// Implementations must be deterministic: host and clients evaluate the
/// same predicates while applying the same actions.
pub trait Terrain: Send + Sync {
    /// Can a unit of `class` owned by `faction` stand at `point`?
    fn is_valid_move(
        &self,
        class: UnitClass,
        point: &GeoPoint,
        pois: &BTreeMap<PoiId, Poi>,
        units: &BTreeMap<UnitId, Unit>,
        faction: &str,
    ) -> bool;

    /// Can a structure of `class` be built at `point`?
    fn is_valid_placement(&self, class: UnitClass, point: &GeoPoint, pois: &BTreeMap<PoiId, Poi>) -> bool;
}

/// Terrain where everything is valid.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenTerrain;

impl Terrain for OpenTerrain {
    fn is_valid_move(
        &self,
        _class: UnitClass,
        point: &GeoPoint,
        _pois: &BTreeMap<PoiId, Poi>,
        _units: &BTreeMap<UnitId, Unit>,
        _faction: &str,
    ) -> bool {
        point.lat.is_finite() && point.lng.is_finite()
    }

    fn is_valid_placement(&self, _class: UnitClass, point: &GeoPoint, _pois: &BTreeMap<PoiId, Poi>) -> bool {
        point.lat.is_finite() && point.lng.is_finite()
    }
}

/// Axis-aligned rectangle in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: GeoPoint,
    pub max: GeoPoint,
}

impl Rect {
    pub fn new(min: GeoPoint, max: GeoPoint) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.lat >= self.min.lat && p.lat <= self.max.lat && p.lng >= self.min.lng && p.lng <= self.max.lng
    }
}

/// Bounded map with water bodies.
///
/// - Ships need water, or the harbour area of a coastal POI.
/// - Ground units need land.
/// - Jets go anywhere in bounds.
/// - Structures need land clear of every POI.
#[derive(Debug, Clone)]
pub struct RegionTerrain {
    pub bounds: Rect,
    pub water: Vec<Rect>,
    /// Minimum distance between a structure and any POI
    pub poi_clearance: f64,
}

impl RegionTerrain {
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            water: Vec::new(),
            poi_clearance: 3.0,
        }
    }

    pub fn with_water(mut self, rect: Rect) -> Self {
        self.water.push(rect);
        self
    }

    pub fn is_water(&self, p: &GeoPoint) -> bool {
        self.water.iter().any(|w| w.contains(p))
    }

    fn in_harbour(&self, p: &GeoPoint, pois: &BTreeMap<PoiId, Poi>) -> bool {
        pois.values()
            .any(|poi| poi.coastal && poi.position.distance_to(p) <= poi.capture_radius())
    }
}

impl Terrain for RegionTerrain {
    fn is_valid_move(
        &self,
        class: UnitClass,
        point: &GeoPoint,
        pois: &BTreeMap<PoiId, Poi>,
        _units: &BTreeMap<UnitId, Unit>,
        _faction: &str,
    ) -> bool {
        if !self.bounds.contains(point) {
            return false;
        }
        if class.is_air() {
            return true;
        }
        if class.is_naval() {
            return self.is_water(point) || self.in_harbour(point, pois);
        }
        !self.is_water(point)
    }

    fn is_valid_placement(&self, class: UnitClass, point: &GeoPoint, pois: &BTreeMap<PoiId, Poi>) -> bool {
        class.is_structure()
            && self.bounds.contains(point)
            && !self.is_water(point)
            && pois.values().all(|poi| poi.position.distance_to(point) >= self.poi_clearance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoiKind;

    fn region() -> RegionTerrain {
        RegionTerrain::new(Rect::new(GeoPoint::new(0.0, 0.0), GeoPoint::new(100.0, 100.0)))
            .with_water(Rect::new(GeoPoint::new(0.0, 80.0), GeoPoint::new(100.0, 100.0)))
    }

    #[test]
    fn test_ground_and_naval_split() {
        let t = region();
        let pois = BTreeMap::new();
        let units = BTreeMap::new();
        let land = GeoPoint::new(50.0, 50.0);
        let sea = GeoPoint::new(50.0, 90.0);

        assert!(t.is_valid_move(UnitClass::Tank, &land, &pois, &units, "P1"));
        assert!(!t.is_valid_move(UnitClass::Tank, &sea, &pois, &units, "P1"));
        assert!(t.is_valid_move(UnitClass::Ship, &sea, &pois, &units, "P1"));
        assert!(!t.is_valid_move(UnitClass::Ship, &land, &pois, &units, "P1"));
        assert!(t.is_valid_move(UnitClass::Jet, &sea, &pois, &units, "P1"));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let t = region();
        let p = GeoPoint::new(-1.0, 50.0);
        assert!(!t.is_valid_move(UnitClass::Jet, &p, &BTreeMap::new(), &BTreeMap::new(), "P1"));
    }

    #[test]
    fn test_ships_may_use_harbours() {
        let t = region();
        let mut port = Poi::new("port", PoiKind::City, GeoPoint::new(50.0, 78.0), 1);
        port.coastal = true;
        let pois = BTreeMap::from([("port".to_string(), port)]);
        let dock = GeoPoint::new(50.0, 76.0);
        assert!(t.is_valid_move(UnitClass::Ship, &dock, &pois, &BTreeMap::new(), "P1"));
    }

    #[test]
    fn test_placement_needs_clearance() {
        let t = region();
        let city = Poi::new("c", PoiKind::City, GeoPoint::new(10.0, 10.0), 1);
        let pois = BTreeMap::from([("c".to_string(), city)]);
        assert!(!t.is_valid_placement(UnitClass::Bunker, &GeoPoint::new(11.0, 10.0), &pois));
        assert!(t.is_valid_placement(UnitClass::Bunker, &GeoPoint::new(20.0, 10.0), &pois));
        assert!(!t.is_valid_placement(UnitClass::Tank, &GeoPoint::new(20.0, 10.0), &pois));
    }
}
