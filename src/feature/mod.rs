//! # Features
//!
//! A feature is a node, way or relation — the atomic unit of query
//! results. Feature records live inside tile payload blobs and are read
//! zero-copy; the public [`Feature`] handle copies the cheap fixed fields
//! (type, id, bounds) and goes back to the mapping for tag lookups.

mod store;
mod tags;

pub use store::FeatureStore;
pub use tags::{
    read_varstr, varstr_len, write_varstr, GlobalTagEntry, LocalTagEntry, RawRecord, RecordView,
    TagTable, TilePayload, PAYLOAD_HEADER_SIZE, RECORD_SIZE,
};

use std::sync::Arc;

use crate::geom::{BBox, Tile};
use crate::store::PageNum;

/// The three feature kinds, in tag-table type-word order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FeatureType {
    Node = 0,
    Way = 1,
    Relation = 2,
}

impl FeatureType {
    pub fn from_word(word: u32) -> Option<FeatureType> {
        match word & 3 {
            0 => Some(FeatureType::Node),
            1 => Some(FeatureType::Way),
            2 => Some(FeatureType::Relation),
            _ => None,
        }
    }
}

/// A bitmask over feature types. Queries carry one of these; the matcher's
/// CMP_TYPE opcode tests against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureTypes(pub u32);

impl FeatureTypes {
    pub const NONE: FeatureTypes = FeatureTypes(0);
    pub const NODES: FeatureTypes = FeatureTypes(1);
    pub const WAYS: FeatureTypes = FeatureTypes(1 << 1);
    pub const RELATIONS: FeatureTypes = FeatureTypes(1 << 2);
    /// GOQL `a`: features that can be areas.
    pub const AREAS: FeatureTypes = FeatureTypes(Self::WAYS.0 | Self::RELATIONS.0);
    pub const ALL: FeatureTypes = FeatureTypes(Self::NODES.0 | Self::WAYS.0 | Self::RELATIONS.0);

    pub fn contains(&self, t: FeatureType) -> bool {
        self.0 & (1 << t as u32) != 0
    }

    pub fn intersect(&self, other: FeatureTypes) -> FeatureTypes {
        FeatureTypes(self.0 & other.0)
    }

    pub fn union(&self, other: FeatureTypes) -> FeatureTypes {
        FeatureTypes(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// Index category of a global key: one of 30 buckets, used to skip tiles
/// whose feature population cannot satisfy a required key. Returns the
/// category's bit in a 32-bit index mask.
pub fn key_category_bit(code: u16) -> u32 {
    1 << (code % 30)
}

/// Opaque location of a feature record: tile payload blob plus record
/// offset. Valid only while the owning store is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeaturePtr {
    pub(crate) page: PageNum,
    pub(crate) offset: u32,
}

/// A feature obtained from a query. Cheap to clone; tag lookups go back to
/// the store mapping, so a `Feature` must not outlive its store (the `Arc`
/// it holds makes that automatic).
#[derive(Debug, Clone)]
pub struct Feature {
    store: Arc<FeatureStore>,
    tile: Tile,
    ptr: FeaturePtr,
    feature_type: FeatureType,
    id: u64,
    bounds: BBox,
}

impl Feature {
    pub(crate) fn new(
        store: Arc<FeatureStore>,
        tile: Tile,
        ptr: FeaturePtr,
        feature_type: FeatureType,
        id: u64,
        bounds: BBox,
    ) -> Self {
        Self {
            store,
            tile,
            ptr,
            feature_type,
            id,
            bounds,
        }
    }

    pub fn feature_type(&self) -> FeatureType {
        self.feature_type
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bounds(&self) -> BBox {
        self.bounds
    }

    /// The tile whose payload stores this feature.
    pub fn tile(&self) -> Tile {
        self.tile
    }

    pub fn ptr(&self) -> FeaturePtr {
        self.ptr
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    /// Looks up a tag value by key. Global and local keys are both
    /// consulted; `None` for a missing key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        let payload = self.store.payload(self.ptr.page).ok()?;
        let tags = payload.record_at(self.ptr.offset).ok()?.tags().ok()?;
        let value_ofs = match self.store.key_code(key) {
            Some(code) => tags.find_global(code),
            None => None,
        }
        .or_else(|| tags.find_local(key))?;
        tags.value_at(value_ofs)
    }

    /// All tags as (key, value) pairs, global keys first.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let Ok(payload) = self.store.payload(self.ptr.page) else {
            return out;
        };
        let Ok(record) = payload.record_at(self.ptr.offset) else {
            return out;
        };
        let Ok(tags) = record.tags() else {
            return out;
        };
        for (code, value_ofs) in tags.global_entries() {
            if let (Some(key), Some(value)) =
                (self.store.key_name(code), tags.value_at(value_ofs))
            {
                out.push((key.to_string(), value.to_string()));
            }
        }
        for (key_ofs, value_ofs) in tags.local_entries() {
            if let (Some(key), Some(value)) = (tags.value_at(key_ofs), tags.value_at(value_ofs)) {
                out.push((key.to_string(), value.to_string()));
            }
        }
        out
    }
}

/// Features are equal when they name the same object, regardless of which
/// query produced them.
impl PartialEq for Feature {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.feature_type == other.feature_type
    }
}

impl Eq for Feature {}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.feature_type {
            FeatureType::Node => "node",
            FeatureType::Way => "way",
            FeatureType::Relation => "relation",
        };
        write!(f, "{}/{}", prefix, self.id)
    }
}
