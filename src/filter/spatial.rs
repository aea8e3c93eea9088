//! Spatial and topological filters over feature bounding boxes.
//!
//! The core evaluates these on bounds, not exact geometry: a feature's
//! stored bbox against the query shape, and a tile's extent against the
//! query shape for the coarse hint. Tiles assign features by containment,
//! so a tile fully inside the query box implies every feature in it is
//! inside too — that is what makes the `All` fast path sound.

use crate::feature::{Feature, FeatureStore};
use crate::geom::{mercator, BBox, Coordinate, Tile};

use super::{Filter, TileAcceptance};

/// `within(box)`: the feature's bounds lie entirely inside the box.
pub struct WithinFilter {
    bounds: BBox,
}

impl WithinFilter {
    pub fn new(bounds: BBox) -> Self {
        Self { bounds }
    }
}

impl Filter for WithinFilter {
    fn accept(&self, _store: &FeatureStore, feature: &Feature) -> bool {
        self.bounds.contains(&feature.bounds())
    }

    fn accept_tile(&self, tile: Tile) -> TileAcceptance {
        let extent = tile.bounds();
        if self.bounds.contains(&extent) {
            TileAcceptance::All
        } else if self.bounds.intersects(&extent) {
            TileAcceptance::Some
        } else {
            TileAcceptance::None
        }
    }
}

/// `intersecting(box)`: the feature's bounds overlap the box.
pub struct IntersectsFilter {
    bounds: BBox,
}

impl IntersectsFilter {
    pub fn new(bounds: BBox) -> Self {
        Self { bounds }
    }
}

impl Filter for IntersectsFilter {
    fn accept(&self, _store: &FeatureStore, feature: &Feature) -> bool {
        self.bounds.intersects(&feature.bounds())
    }

    fn accept_tile(&self, tile: Tile) -> TileAcceptance {
        let extent = tile.bounds();
        if self.bounds.contains(&extent) {
            TileAcceptance::All
        } else if self.bounds.intersects(&extent) {
            TileAcceptance::Some
        } else {
            TileAcceptance::None
        }
    }
}

/// `containing(point)`: the feature's bounds contain the coordinate.
pub struct ContainsPointFilter {
    point: Coordinate,
}

impl ContainsPointFilter {
    pub fn new(point: Coordinate) -> Self {
        Self { point }
    }
}

impl Filter for ContainsPointFilter {
    fn accept(&self, _store: &FeatureStore, feature: &Feature) -> bool {
        feature.bounds().contains_point(self.point)
    }

    fn accept_tile(&self, tile: Tile) -> TileAcceptance {
        // Only tiles whose extent covers the point can hold features whose
        // bounds do (features never outgrow their tile).
        if tile.bounds().contains_point(self.point) {
            TileAcceptance::Some
        } else {
            TileAcceptance::None
        }
    }
}

/// `maxMetersFrom(d, point)`: the feature's bounds come within `d` meters
/// of the coordinate, measured on the Mercator plane at the anchor's
/// latitude.
pub struct MaxDistanceFilter {
    point: Coordinate,
    search: BBox,
    max_units: f64,
}

impl MaxDistanceFilter {
    pub fn new(meters: f64, point: Coordinate) -> Self {
        let units = mercator::meters_to_units(meters.max(0.0), point.y);
        let radius = units.min(i32::MAX as f64) as i32;
        Self {
            point,
            search: BBox::of_point(point).buffered(radius),
            max_units: units,
        }
    }

    /// The box the tile walker can prune against.
    pub fn search_bounds(&self) -> BBox {
        self.search
    }

    /// Distance from the anchor to the nearest point of `bounds`, in plane
    /// units.
    fn distance_units(&self, bounds: &BBox) -> f64 {
        let dx = if self.point.x < bounds.min_x {
            bounds.min_x as i64 - self.point.x as i64
        } else if self.point.x > bounds.max_x {
            self.point.x as i64 - bounds.max_x as i64
        } else {
            0
        };
        let dy = if self.point.y < bounds.min_y {
            bounds.min_y as i64 - self.point.y as i64
        } else if self.point.y > bounds.max_y {
            self.point.y as i64 - bounds.max_y as i64
        } else {
            0
        };
        ((dx * dx + dy * dy) as f64).sqrt()
    }
}

impl Filter for MaxDistanceFilter {
    fn accept(&self, _store: &FeatureStore, feature: &Feature) -> bool {
        self.distance_units(&feature.bounds()) <= self.max_units
    }

    fn accept_tile(&self, tile: Tile) -> TileAcceptance {
        if self.search.intersects(&tile.bounds()) {
            TileAcceptance::Some
        } else {
            TileAcceptance::None
        }
    }
}
