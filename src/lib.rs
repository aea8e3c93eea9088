//! # goldb - Embedded Query Engine for Geographic Object Libraries
//!
//! goldb provides random-access, queryable storage for compact geographic
//! feature databases (GOLs): memory-mapped, zero-copy reads; a compact
//! bytecode matcher for tag predicates; and a lazy, compositional query
//! façade. It is read-dominant by design, with a transactional mutation
//! path for maintenance.
//!
//! ## Quick Start
//!
//! ```ignore
//! use goldb::Features;
//!
//! let world = Features::new("planet.gol")?;
//! let pubs = world.query("na[amenity=pub]")?;
//!
//! println!("{} pubs", pubs.count()?);
//! for pub_ in &pubs.within(&city_bounds) {
//!     println!("{}", pub_?.tag("name").unwrap_or("(unnamed)"));
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------+
//! |     Features façade (lazy collections)     |
//! +--------------------------------------------+
//! |  GOQL compiler  |  Filters  |  TaskQueue   |
//! +-----------------+-----------+--------------+
//! |  Matcher VM     |  Tile index walker       |
//! +--------------------------------------------+
//! |  FeatureStore (string table, payloads)     |
//! +--------------------------------------------+
//! |  BlobStore (free-table, transactions)      |
//! +--------------------------------------------+
//! |  Segmented mmap (lazy 1 GiB segments)      |
//! +--------------------------------------------+
//! ```
//!
//! A query executes nothing at construction. Iteration walks the quadtree
//! tile index pruned by the query box, streams candidate features out of
//! each tile's payload blob, runs the compiled matcher over their tag
//! tables, applies spatial/topological filters, and yields survivors.
//!
//! ## Concurrency
//!
//! Everything read-side is shared-nothing or immutable: `Features`
//! handles are value types; stores, matchers and filters are
//! reference-counted. The single writer is separated from readers by
//! `&mut` at compile time. The `multithreaded` cargo feature adds a
//! worker-pool executor for scalar reducers (tile fan-out through a
//! bounded task queue); it changes no API.
//!
//! ## Module Overview
//!
//! - [`api`]: the `Features` façade and its typed views
//! - [`store`]: blob store, free-table, transactions, journal
//! - [`feature`]: feature records, tag tables, `FeatureStore`
//! - [`matcher`]: tag-predicate bytecode and its engine
//! - [`query`]: GOQL lexer, parser, compiler
//! - [`filter`]: spatial, topological and user-predicate filters
//! - [`index`]: quadtree tile-index walker
//! - [`geom`]: Mercator-plane geometry, tiles, length units
//! - [`exec`]: bounded task queue, parallel executor
//! - [`build`]: minimal GOL writer (maintenance path)

pub mod api;
pub mod build;
pub mod error;
pub mod exec;
pub mod feature;
pub mod filter;
pub mod geom;
pub mod index;
pub mod matcher;
pub mod query;
pub mod store;

pub use api::{FeatureIter, Features, Nodes, Relations, Ways};
pub use build::GolBuilder;
pub use error::{QueryError, StoreError};
pub use feature::{Feature, FeatureStore, FeatureType, FeatureTypes};
pub use geom::{length_unit::LengthUnit, BBox, Coordinate, Tile};
