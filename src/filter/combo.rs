//! Conjunction of filters with tile-level short-circuiting.

use std::sync::Arc;

use crate::feature::{Feature, FeatureStore};
use crate::geom::Tile;

use super::{Filter, TileAcceptance};

/// An ordered conjunction of sub-filters. `add` flattens nested combos so
/// deep filter chains stay one level deep, and keeps user predicates after
/// all structural filters (predicates are never consulted for tiles and
/// tend to be the most expensive test).
pub struct ComboFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl ComboFilter {
    pub fn new(a: Arc<dyn Filter>, b: Arc<dyn Filter>) -> Self {
        let mut combo = Self {
            filters: Vec::with_capacity(2),
        };
        combo.add(a);
        combo.add(b);
        combo
    }

    /// Composes two optional filters into at most one.
    pub fn combine(
        existing: Option<Arc<dyn Filter>>,
        added: Arc<dyn Filter>,
    ) -> Arc<dyn Filter> {
        match existing {
            Some(existing) => Arc::new(ComboFilter::new(existing, added)),
            None => added,
        }
    }

    pub fn add(&mut self, filter: Arc<dyn Filter>) {
        if let Some(combo) = filter.as_combo() {
            for sub in &combo.filters {
                self.add(Arc::clone(sub));
            }
            return;
        }
        if filter.is_predicate() {
            self.filters.push(filter);
        } else {
            // Insert before the trailing predicate run.
            let at = self
                .filters
                .iter()
                .position(|f| f.is_predicate())
                .unwrap_or(self.filters.len());
            self.filters.insert(at, filter);
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for ComboFilter {
    fn accept(&self, store: &FeatureStore, feature: &Feature) -> bool {
        self.filters.iter().all(|f| f.accept(store, feature))
    }

    fn accept_tile(&self, tile: Tile) -> TileAcceptance {
        let mut acceptance = TileAcceptance::All;
        for filter in &self.filters {
            acceptance = acceptance.and(filter.accept_tile(tile));
            if acceptance == TileAcceptance::None {
                return TileAcceptance::None;
            }
        }
        acceptance
    }

    fn as_combo(&self) -> Option<&ComboFilter> {
        Some(self)
    }
}
