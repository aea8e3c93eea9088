//! # Features Façade
//!
//! [`Features`] is the public face of goldb: a lightweight, value-copyable
//! handle describing *criteria* for retrieving features, not a container
//! of them. Every filtering method returns a new handle and leaves the
//! receiver untouched; nothing touches the store until the handle is
//! iterated or a scalar reducer runs. Results are never cached — calling
//! `count()` before iterating executes the query twice.
//!
//! ```ignore
//! use goldb::Features;
//!
//! let world = Features::new("path/to/planet.gol")?;
//! let hotels = world.query("na[tourism=hotel]")?;
//! for hotel in &hotels.within(&paris) {
//!     println!("{}", hotel?.tag("name").unwrap_or("?"));
//! }
//! ```
//!
//! Handles opened on the same path share one [`FeatureStore`]; the store
//! closes when the last handle drops. `Nodes`, `Ways` and `Relations` are
//! type-restricted views — converting a view into an incompatible view
//! yields an empty collection rather than an error.

use std::path::Path;
use std::sync::Arc;

use eyre::Result;

use crate::error::QueryError;
use crate::feature::{Feature, FeaturePtr, FeatureStore, FeatureTypes, RecordView};
use crate::filter::{
    ComboFilter, ContainsPointFilter, Filter, IntersectsFilter, MaxDistanceFilter,
    PredicateFilter, TileAcceptance, WithinFilter,
};
use crate::geom::{BBox, Coordinate, Tile};
use crate::index::{TileRef, TileWalker};
use crate::matcher::MatcherProgram;
use crate::store::PageNum;

/// A lazily evaluated collection of geographic features.
#[derive(Clone)]
pub struct Features {
    store: Arc<FeatureStore>,
    types: FeatureTypes,
    matcher: Option<Arc<MatcherProgram>>,
    filter: Option<Arc<dyn Filter>>,
    bounds: Option<BBox>,
}

impl Features {
    /// Opens the GOL at `path` (the `.gol` extension may be omitted) and
    /// returns the collection of all its features.
    pub fn new(path: impl AsRef<Path>) -> Result<Features> {
        Ok(Self::from_store(FeatureStore::open(path)?))
    }

    /// Wraps an already-open store.
    pub fn from_store(store: Arc<FeatureStore>) -> Features {
        Features {
            store,
            types: FeatureTypes::ALL,
            matcher: None,
            filter: None,
            bounds: None,
        }
    }

    /// Only features matching the GOQL query.
    pub fn query(&self, goql: &str) -> Result<Features> {
        let program = crate::query::compile(goql, &self.store)?;
        let mut next = self.clone();
        next.types = next.types.intersect(program.accepted_types());
        // A second query stacks: the previous matcher demotes to a filter.
        if let Some(previous) = next.matcher.take() {
            next.filter = Some(ComboFilter::combine(
                next.filter.take(),
                Arc::new(MatcherFilter { program: previous }),
            ));
        }
        next.matcher = Some(Arc::new(program));
        Ok(next)
    }

    fn with_types(&self, types: FeatureTypes) -> Features {
        let mut next = self.clone();
        next.types = next.types.intersect(types);
        next
    }

    /// Only nodes.
    pub fn nodes(&self) -> Nodes {
        Nodes(self.with_types(FeatureTypes::NODES))
    }

    /// Only ways.
    pub fn ways(&self) -> Ways {
        Ways(self.with_types(FeatureTypes::WAYS))
    }

    /// Only relations.
    pub fn relations(&self) -> Relations {
        Relations(self.with_types(FeatureTypes::RELATIONS))
    }

    fn with_filter(&self, bounds: Option<BBox>, filter: Arc<dyn Filter>) -> Features {
        let mut next = self.clone();
        if let Some(bounds) = bounds {
            next.bounds = Some(match next.bounds {
                Some(existing) => existing.intersection(&bounds),
                None => bounds,
            });
        }
        next.filter = Some(ComboFilter::combine(next.filter.take(), filter));
        next
    }

    /// Only features whose bounds lie entirely inside `bounds`.
    pub fn within(&self, bounds: &BBox) -> Features {
        self.with_filter(Some(*bounds), Arc::new(WithinFilter::new(*bounds)))
    }

    /// Only features whose bounds overlap `bounds`.
    pub fn intersecting(&self, bounds: &BBox) -> Features {
        self.with_filter(Some(*bounds), Arc::new(IntersectsFilter::new(*bounds)))
    }

    /// Only features whose bounds contain `point`.
    pub fn containing(&self, point: Coordinate) -> Features {
        self.with_filter(
            Some(BBox::of_point(point)),
            Arc::new(ContainsPointFilter::new(point)),
        )
    }

    /// Only features within `meters` of `point`.
    pub fn max_meters_from(&self, meters: f64, point: Coordinate) -> Features {
        let filter = MaxDistanceFilter::new(meters, point);
        self.with_filter(Some(filter.search_bounds()), Arc::new(filter))
    }

    /// Only features passing the predicate. The predicate may run on
    /// worker threads in multi-threaded mode and must be re-entrant.
    pub fn filter<P>(&self, predicate: P) -> Features
    where
        P: Fn(&Feature) -> bool + Send + Sync + 'static,
    {
        self.with_filter(None, Arc::new(PredicateFilter::new(predicate)))
    }

    /// Starts the query and streams matching features.
    pub fn iter(&self) -> FeatureIter {
        FeatureIter::new(self)
    }

    /// Number of matching features. Walks the full stream.
    pub fn count(&self) -> Result<usize> {
        #[cfg(feature = "multithreaded")]
        {
            crate::exec::parallel::count(self)
        }
        #[cfg(not(feature = "multithreaded"))]
        {
            let mut n = 0;
            for feature in self.iter() {
                feature?;
                n += 1;
            }
            Ok(n)
        }
    }

    /// The single matching feature. `QueryError::Empty` on zero matches,
    /// `QueryError::NotUnique` on more than one.
    pub fn one(&self) -> Result<Feature> {
        let mut iter = self.iter();
        let first = match iter.next() {
            None => return Err(QueryError::Empty.into()),
            Some(feature) => feature?,
        };
        match iter.next() {
            None => Ok(first),
            Some(Err(e)) => Err(e),
            Some(Ok(_)) => {
                let mut count = 2;
                for extra in iter {
                    extra?;
                    count += 1;
                }
                Err(QueryError::NotUnique { count }.into())
            }
        }
    }

    /// The first matching feature, if any.
    pub fn first(&self) -> Result<Option<Feature>> {
        match self.iter().next() {
            None => Ok(None),
            Some(feature) => feature.map(Some),
        }
    }

    /// Collects all matching features eagerly.
    pub fn to_vec(&self) -> Result<Vec<Feature>> {
        self.iter().collect()
    }

    /// True when the collection has no members.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.first()?.is_none())
    }

    /// Does `feature` belong to this collection? Runs the query restricted
    /// to the feature's own bounds.
    pub fn contains(&self, feature: &Feature) -> Result<bool> {
        for candidate in self.intersecting(&feature.bounds()).iter() {
            if candidate? == *feature {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The store this collection draws from.
    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub(crate) fn store_handle(&self) -> Arc<FeatureStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn query_bounds(&self) -> BBox {
        self.bounds.unwrap_or_else(BBox::world)
    }

    /// Tile-level gate shared by the iterator and the parallel executor.
    fn tile_gate(&self, tile: Tile, index_bits: u32) -> Gate {
        if let Some(matcher) = &self.matcher {
            if !matcher.can_match_tile(index_bits) {
                return Gate::Skip;
            }
        }
        match &self.filter {
            None => Gate::Scan { bypass: true },
            Some(filter) => match filter.accept_tile(tile) {
                TileAcceptance::None => Gate::Skip,
                TileAcceptance::All => Gate::Scan { bypass: true },
                TileAcceptance::Some => Gate::Scan { bypass: false },
            },
        }
    }

    fn make_feature(&self, tile: Tile, page: PageNum, record: &RecordView<'_>) -> Result<Feature> {
        Ok(Feature::new(
            Arc::clone(&self.store),
            tile,
            FeaturePtr {
                page,
                offset: record.offset(),
            },
            record.feature_type()?,
            record.id(),
            record.bounds(),
        ))
    }

    /// Counts matches within one tile; the multi-threaded reducer fans
    /// this out over workers.
    pub(crate) fn count_in_tile(&self, tile_ref: TileRef) -> Result<usize> {
        let payload = self.store.payload(tile_ref.payload)?;
        let bypass = match self.tile_gate(tile_ref.tile, payload.index_bits()) {
            Gate::Skip => return Ok(0),
            Gate::Scan { bypass } => bypass,
        };
        self.store.prefetch_blob(tile_ref.payload);

        let mut n = 0;
        for offset in payload.records() {
            let record = payload.record_at(offset)?;
            if !self.types.contains(record.feature_type()?) {
                continue;
            }
            if let Some(matcher) = &self.matcher {
                if matcher.accept(&record) == 0 {
                    continue;
                }
            }
            if !bypass {
                if let Some(filter) = &self.filter {
                    let feature = self.make_feature(tile_ref.tile, tile_ref.payload, &record)?;
                    if !filter.accept(&self.store, &feature) {
                        continue;
                    }
                }
            }
            n += 1;
        }
        Ok(n)
    }
}

impl std::fmt::Debug for Features {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Features")
            .field("store", &self.store.path())
            .field("types", &self.types)
            .field("query", &self.matcher.as_ref().map(|m| m.source()))
            .field("bounds", &self.bounds)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for &'a Features {
    type Item = Result<Feature>;
    type IntoIter = FeatureIter;

    fn into_iter(self) -> FeatureIter {
        self.iter()
    }
}

enum Gate {
    Skip,
    Scan { bypass: bool },
}

/// A previous query's matcher demoted to a per-feature filter when
/// queries stack.
struct MatcherFilter {
    program: Arc<MatcherProgram>,
}

impl Filter for MatcherFilter {
    fn accept(&self, store: &FeatureStore, feature: &Feature) -> bool {
        let ptr = feature.ptr();
        let Ok(payload) = store.payload(ptr.page) else {
            return false;
        };
        let Ok(record) = payload.record_at(ptr.offset) else {
            return false;
        };
        self.program.accept(&record) != 0
    }
}

macro_rules! typed_view {
    ($(#[$doc:meta])* $name:ident, $types:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug)]
        pub struct $name(Features);

        impl $name {
            pub fn features(&self) -> &Features {
                &self.0
            }
        }

        impl From<Features> for $name {
            fn from(features: Features) -> $name {
                $name(features.with_types($types))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Features;

            fn deref(&self) -> &Features {
                &self.0
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = Result<Feature>;
            type IntoIter = FeatureIter;

            fn into_iter(self) -> FeatureIter {
                self.0.iter()
            }
        }
    };
}

typed_view!(
    /// Only nodes. Assigning an incompatible view yields an empty
    /// collection.
    Nodes,
    FeatureTypes::NODES
);
typed_view!(
    /// Only ways.
    Ways,
    FeatureTypes::WAYS
);
typed_view!(
    /// Only relations.
    Relations,
    FeatureTypes::RELATIONS
);

impl From<Ways> for Nodes {
    fn from(ways: Ways) -> Nodes {
        ways.0.into()
    }
}

impl From<Nodes> for Ways {
    fn from(nodes: Nodes) -> Ways {
        nodes.0.into()
    }
}

struct TileCursor {
    tile: Tile,
    page: PageNum,
    remaining: u32,
    next_offset: u32,
    bypass_filter: bool,
}

/// The pull iterator behind a `Features` handle: a plain state machine of
/// (tile walker, current tile cursor, filter chain). Dropping it
/// mid-stream releases everything deterministically. After yielding an
/// error the iterator is fused.
pub struct FeatureIter {
    features: Features,
    walker: Option<TileWalker>,
    walker_failed: Option<eyre::Report>,
    cursor: Option<TileCursor>,
    done: bool,
}

impl FeatureIter {
    fn new(features: &Features) -> FeatureIter {
        let walker = TileWalker::new(features.store_handle(), features.query_bounds());
        let (walker, walker_failed) = match walker {
            Ok(walker) => (Some(walker), None),
            Err(e) => (None, Some(e)),
        };
        FeatureIter {
            features: features.clone(),
            walker,
            walker_failed,
            cursor: None,
            done: false,
        }
    }

    fn next_in_cursor(&mut self) -> Result<Option<Feature>> {
        while let Some(cursor) = &mut self.cursor {
            if cursor.remaining == 0 {
                self.cursor = None;
                break;
            }
            cursor.remaining -= 1;
            let offset = cursor.next_offset;
            cursor.next_offset += crate::feature::RECORD_SIZE as u32;
            let (tile, page, bypass) = (cursor.tile, cursor.page, cursor.bypass_filter);

            let query = &self.features;
            let payload = query.store.payload(page)?;
            let record = payload.record_at(offset)?;
            if !query.types.contains(record.feature_type()?) {
                continue;
            }
            if let Some(matcher) = &query.matcher {
                if matcher.accept(&record) == 0 {
                    continue;
                }
            }
            let feature = query.make_feature(tile, page, &record)?;
            if !bypass {
                if let Some(filter) = &query.filter {
                    if !filter.accept(&query.store, &feature) {
                        continue;
                    }
                }
            }
            return Ok(Some(feature));
        }
        Ok(None)
    }

    fn advance(&mut self) -> Result<Option<Feature>> {
        if let Some(e) = self.walker_failed.take() {
            return Err(e);
        }
        loop {
            if let Some(feature) = self.next_in_cursor()? {
                return Ok(Some(feature));
            }
            let Some(walker) = &mut self.walker else {
                return Ok(None);
            };
            let Some(next_tile) = walker.next() else {
                return Ok(None);
            };
            let tile_ref = next_tile?;

            let payload = self.features.store.payload(tile_ref.payload)?;
            let feature_count = payload.feature_count();
            let index_bits = payload.index_bits();
            match self.features.tile_gate(tile_ref.tile, index_bits) {
                Gate::Skip => continue,
                Gate::Scan { bypass } => {
                    self.features.store.prefetch_blob(tile_ref.payload);
                    self.cursor = Some(TileCursor {
                        tile: tile_ref.tile,
                        page: tile_ref.payload,
                        remaining: feature_count,
                        next_offset: crate::feature::PAYLOAD_HEADER_SIZE as u32,
                        bypass_filter: bypass,
                    });
                }
            }
        }
    }
}

impl Iterator for FeatureIter {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Result<Feature>> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(feature)) => Some(Ok(feature)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn empty_features() -> (tempfile::TempDir, Features) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.gol");
        crate::store::BlobStore::create(&path, 12).unwrap();
        (dir, Features::new(&path).unwrap())
    }

    #[test]
    fn filter_composition_is_lazy() {
        let (_dir, world) = empty_features();
        static CALLED: AtomicBool = AtomicBool::new(false);

        let narrowed = world
            .within(&BBox::new(0, 0, 100, 100))
            .filter(|_| {
                CALLED.store(true, Ordering::Relaxed);
                true
            });

        // Constructing the chain never evaluates the predicate and never
        // touches tiles.
        assert!(!CALLED.load(Ordering::Relaxed));
        drop(narrowed);
        assert!(!CALLED.load(Ordering::Relaxed));
    }

    #[test]
    fn filtering_returns_a_new_value() {
        let (_dir, world) = empty_features();

        let narrowed = world.within(&BBox::new(0, 0, 10, 10));

        assert!(world.bounds.is_none());
        assert!(narrowed.bounds.is_some());
    }

    #[test]
    fn empty_store_counts_zero() {
        let (_dir, world) = empty_features();

        assert_eq!(world.count().unwrap(), 0);
        assert!(world.is_empty().unwrap());
        assert!(world.first().unwrap().is_none());
    }

    #[test]
    fn one_on_empty_store_is_query_error_empty() {
        let (_dir, world) = empty_features();

        let err = world.one().unwrap_err();

        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Empty)
        ));
    }

    #[test]
    fn incompatible_view_conversion_is_empty() {
        let (_dir, world) = empty_features();

        let nodes = world.nodes();
        let ways: Ways = nodes.into();

        assert!(ways.features().types.is_empty());
    }

    #[test]
    fn bad_goql_is_a_syntax_error() {
        let (_dir, world) = empty_features();

        let err = world.query("w[=bad]").unwrap_err();

        assert!(matches!(
            err.downcast_ref::<QueryError>(),
            Some(QueryError::Syntax { .. })
        ));
    }
}
