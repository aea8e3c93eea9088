//! # GolBuilder
//!
//! A minimal GOL writer: collects features in memory, assigns each to the
//! deepest tile that contains its bounds, and writes the global string
//! table, tile payloads and quadtree index through a single store
//! transaction. This is the maintenance half of the crate — production
//! GOLs come from external tooling, but the reader needs fixtures and the
//! mutation path needs exercise.
//!
//! Keys listed via [`GolBuilder::global_keys`] are interned into the
//! store's string table (queries against them compile to integer
//! comparisons and participate in tile index bits); all other keys are
//! stored inline as local keys.

use std::path::Path;

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;

use crate::feature::{
    key_category_bit, write_varstr, FeatureType, GlobalTagEntry, LocalTagEntry, RawRecord,
    PAYLOAD_HEADER_SIZE, RECORD_SIZE,
};
use crate::geom::{BBox, Coordinate, Tile, MAX_ZOOM};
use crate::store::{BlobStore, PageNum, Transaction};
use zerocopy::IntoBytes;

struct BuildFeature {
    feature_type: FeatureType,
    id: u64,
    bounds: BBox,
    tags: Vec<(String, String)>,
}

#[derive(Default)]
pub struct GolBuilder {
    page_size_shift: Option<u8>,
    global_keys: Vec<String>,
    features: Vec<BuildFeature>,
}

impl GolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page size as a power-of-two shift (default 12 = 4 KiB).
    pub fn page_size_shift(&mut self, shift: u8) -> &mut Self {
        self.page_size_shift = Some(shift);
        self
    }

    /// Interns keys into the global string table, in the given order.
    /// Unknown keys on features stay local.
    pub fn global_keys<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>) -> &mut Self {
        for key in keys {
            if !self.global_keys.iter().any(|k| k == key) {
                self.global_keys.push(key.to_string());
            }
        }
        self
    }

    pub fn add_node(&mut self, id: u64, position: Coordinate, tags: &[(&str, &str)]) -> &mut Self {
        self.add(FeatureType::Node, id, BBox::of_point(position), tags)
    }

    pub fn add_way(&mut self, id: u64, bounds: BBox, tags: &[(&str, &str)]) -> &mut Self {
        self.add(FeatureType::Way, id, bounds, tags)
    }

    pub fn add_relation(&mut self, id: u64, bounds: BBox, tags: &[(&str, &str)]) -> &mut Self {
        self.add(FeatureType::Relation, id, bounds, tags)
    }

    fn add(
        &mut self,
        feature_type: FeatureType,
        id: u64,
        bounds: BBox,
        tags: &[(&str, &str)],
    ) -> &mut Self {
        self.features.push(BuildFeature {
            feature_type,
            id,
            bounds,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    /// Writes the store to `path` and commits.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut store = BlobStore::create(path, self.page_size_shift.unwrap_or(12))
            .wrap_err_with(|| format!("failed to create GOL '{}'", path.display()))?;
        let mut txn = store.begin()?;

        let key_codes: HashMap<&str, u16> = self
            .global_keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i as u16))
            .collect();

        if !self.global_keys.is_empty() {
            let page = write_string_table(&mut txn, &self.global_keys)?;
            txn.set_properties_ptr(page);
        }

        // Payload tiles, grouped by deepest containing tile.
        let mut by_tile: HashMap<Tile, Vec<&BuildFeature>> = HashMap::new();
        for feature in &self.features {
            by_tile
                .entry(tile_for_bounds(&feature.bounds))
                .or_default()
                .push(feature);
        }

        let mut payload_pages: HashMap<Tile, PageNum> = HashMap::new();
        let mut ordered: Vec<Tile> = by_tile.keys().copied().collect();
        ordered.sort_by_key(Tile::to_key);
        for tile in &ordered {
            let bytes = encode_payload(&by_tile[tile], &key_codes)?;
            let page = write_blob(&mut txn, &bytes)?;
            payload_pages.insert(*tile, page);
        }

        if !payload_pages.is_empty() {
            let root = write_index(&mut txn, &payload_pages)?;
            txn.set_index_ptr(root);
        }

        txn.commit()
    }
}

/// The deepest tile (up to the maximum zoom) whose extent contains
/// `bounds` entirely. Features never outgrow their tile, which is what
/// makes tile-level `All` acceptance sound.
fn tile_for_bounds(bounds: &BBox) -> Tile {
    let mut tile = Tile::ROOT;
    'descend: while tile.zoom() < MAX_ZOOM {
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            if let Some(child) = tile.child(dx, dy) {
                if child.bounds().contains(bounds) {
                    tile = child;
                    continue 'descend;
                }
            }
        }
        break;
    }
    tile
}

fn write_blob(txn: &mut Transaction<'_>, bytes: &[u8]) -> Result<PageNum> {
    ensure!(bytes.len() <= u32::MAX as usize, "blob too large");
    let page = txn.alloc(bytes.len() as u32)?;
    txn.blob_payload_mut(page)?.copy_from_slice(bytes);
    Ok(page)
}

fn write_string_table(txn: &mut Transaction<'_>, keys: &[String]) -> Result<PageNum> {
    ensure!(keys.len() <= u16::MAX as usize, "too many global keys");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(keys.len() as u16).to_le_bytes());
    for key in keys {
        write_varstr(&mut bytes, key);
    }
    write_blob(txn, &bytes)
}

fn encode_payload(features: &[&BuildFeature], key_codes: &HashMap<&str, u16>) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(features.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // index_bits, patched below
    bytes.resize(PAYLOAD_HEADER_SIZE + features.len() * RECORD_SIZE, 0);

    let mut index_bits = 0u32;
    let mut pool: HashMap<&str, u32> = HashMap::new();

    for (i, feature) in features.iter().enumerate() {
        // Pool all strings first so tag tables can reference them.
        let mut globals: Vec<(u16, u32)> = Vec::new();
        let mut locals: Vec<LocalTagEntry> = Vec::new();
        for (key, value) in &feature.tags {
            let value_ofs = intern(&mut bytes, &mut pool, value);
            match key_codes.get(key.as_str()) {
                Some(&code) => {
                    index_bits |= key_category_bit(code);
                    globals.push((code, value_ofs));
                }
                None => {
                    let key_ofs = intern(&mut bytes, &mut pool, key);
                    locals.push(LocalTagEntry::new(key_ofs, value_ofs));
                }
            }
        }
        // Readers early-exit on sorted key codes.
        globals.sort_by_key(|&(code, _)| code);

        let tag_ofs = bytes.len() as u32;
        ensure!(globals.len() <= u16::MAX as usize, "too many tags");
        bytes.extend_from_slice(&(globals.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(locals.len() as u16).to_le_bytes());
        for &(code, value_ofs) in &globals {
            bytes.extend_from_slice(GlobalTagEntry::new(code, value_ofs).as_bytes());
        }
        for entry in &locals {
            bytes.extend_from_slice(entry.as_bytes());
        }

        let record = RawRecord::new(
            feature.feature_type,
            feature.id,
            feature.bounds,
            tag_ofs,
            !locals.is_empty(),
        );
        let record_ofs = PAYLOAD_HEADER_SIZE + i * RECORD_SIZE;
        bytes[record_ofs..record_ofs + RECORD_SIZE].copy_from_slice(record.as_bytes());
    }

    bytes[4..8].copy_from_slice(&index_bits.to_le_bytes());
    Ok(bytes)
}

fn intern<'a>(bytes: &mut Vec<u8>, pool: &mut HashMap<&'a str, u32>, s: &'a str) -> u32 {
    *pool.entry(s).or_insert_with(|| {
        let ofs = bytes.len() as u32;
        write_varstr(bytes, s);
        ofs
    })
}

/// Writes the quadtree bottom-up (children before parents) and returns
/// the root node's page.
fn write_index(
    txn: &mut Transaction<'_>,
    payload_pages: &HashMap<Tile, PageNum>,
) -> Result<PageNum> {
    // Every payload tile needs its ancestor chain.
    let mut child_bitmaps: HashMap<Tile, u32> = HashMap::new();
    for tile in payload_pages.keys() {
        child_bitmaps.entry(*tile).or_default();
        let mut current = *tile;
        while let Some(parent) = current.parent() {
            *child_bitmaps.entry(parent).or_default() |= 1 << current.quadrant();
            current = parent;
        }
    }

    let mut tiles: Vec<Tile> = child_bitmaps.keys().copied().collect();
    // Deepest first, then deterministic within a zoom.
    tiles.sort_by_key(|t| (std::cmp::Reverse(t.zoom()), t.to_key()));

    let mut node_pages: HashMap<Tile, PageNum> = HashMap::new();
    for tile in tiles {
        let bitmap = child_bitmaps[&tile];
        let mut bytes = Vec::with_capacity(8 + 4 * bitmap.count_ones() as usize);
        bytes.extend_from_slice(&payload_pages.get(&tile).copied().unwrap_or(0).to_le_bytes());
        bytes.extend_from_slice(&bitmap.to_le_bytes());
        for quadrant in 0..4u32 {
            if bitmap & (1 << quadrant) != 0 {
                let child = tile
                    .child(quadrant & 1, quadrant >> 1)
                    .ok_or_else(|| eyre::eyre!("child bitmap set at max zoom"))?;
                let child_page = node_pages
                    .get(&child)
                    .ok_or_else(|| eyre::eyre!("index child written after parent"))?;
                bytes.extend_from_slice(&child_page.to_le_bytes());
            }
        }
        let page = write_blob(txn, &bytes)?;
        node_pages.insert(tile, page);
    }

    node_pages
        .get(&Tile::ROOT)
        .copied()
        .ok_or_else(|| eyre::eyre!("index has no root node"))
}
