//! # Filters
//!
//! Filters narrow a query beyond what the matcher can express: spatial
//! predicates, topological predicates and arbitrary user lambdas. A filter
//! exposes two capabilities:
//!
//! - `accept(store, feature)`: the per-feature test.
//! - `accept_tile(tile)`: a coarse, conservative tile-level hint. `None`
//!   prunes the whole tile, `All` lets the executor skip the per-feature
//!   test, `Some` means "ask me per feature".
//!
//! Filters compose through [`ComboFilter`], which short-circuits on the
//! tile level and keeps user predicates trailing (they are never consulted
//! for tiles). All filters are reference-counted and immutable; in
//! multi-threaded mode user predicates may be invoked from worker threads,
//! which is why `Filter` requires `Send + Sync`.

mod combo;
mod spatial;

pub use combo::ComboFilter;
pub use spatial::{ContainsPointFilter, IntersectsFilter, MaxDistanceFilter, WithinFilter};

use crate::feature::{Feature, FeatureStore};
use crate::geom::Tile;

/// Tile-level acceptance hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAcceptance {
    /// Every feature in the tile passes; per-feature tests may be skipped.
    All,
    /// Some features may pass; test each one.
    Some,
    /// No feature in the tile can pass; skip the tile.
    None,
}

impl TileAcceptance {
    /// Combines hints of two filters applied in conjunction.
    pub fn and(self, other: TileAcceptance) -> TileAcceptance {
        match (self, other) {
            (TileAcceptance::None, _) | (_, TileAcceptance::None) => TileAcceptance::None,
            (TileAcceptance::All, TileAcceptance::All) => TileAcceptance::All,
            _ => TileAcceptance::Some,
        }
    }
}

pub trait Filter: Send + Sync {
    /// Does `feature` pass this filter?
    fn accept(&self, store: &FeatureStore, feature: &Feature) -> bool;

    /// Conservative tile-level hint; the default claims nothing.
    fn accept_tile(&self, _tile: Tile) -> TileAcceptance {
        TileAcceptance::Some
    }

    /// Flattening support for [`ComboFilter::add`].
    fn as_combo(&self) -> Option<&ComboFilter> {
        None
    }

    /// User predicates are ordered after structural filters and never see
    /// tiles.
    fn is_predicate(&self) -> bool {
        false
    }
}

/// A user-supplied predicate as a filter. The closure must be re-entrant:
/// the multi-threaded executor may invoke it concurrently.
pub struct PredicateFilter<P> {
    predicate: P,
}

impl<P> PredicateFilter<P>
where
    P: Fn(&Feature) -> bool + Send + Sync,
{
    pub fn new(predicate: P) -> Self {
        Self { predicate }
    }
}

impl<P> Filter for PredicateFilter<P>
where
    P: Fn(&Feature) -> bool + Send + Sync,
{
    fn accept(&self, _store: &FeatureStore, feature: &Feature) -> bool {
        (self.predicate)(feature)
    }

    fn is_predicate(&self) -> bool {
        true
    }
}
