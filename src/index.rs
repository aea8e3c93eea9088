//! # Tile Index Walker
//!
//! The tile index is a quadtree of node blobs rooted at the header's
//! `index_ptr`. Each node belongs to one tile and encodes:
//!
//! ```text
//! u32 payload_ptr    PageNum of this tile's feature payload (0 = none)
//! u32 child_bitmap   bits 0..3: child present at quadrant (dx, dy) =
//!                    (0,0), (1,0), (0,1), (1,1)
//! u32 child_ptr...   one per set bit, ascending quadrant order
//! ```
//!
//! The walker streams `(tile, payload page)` pairs depth-first, pruning
//! subtrees whose tile extent misses the query box. Emission order is
//! pre-order with ascending quadrants — deterministic for a fixed query,
//! which is what makes iteration order reproducible.

use std::sync::Arc;

use smallvec::SmallVec;

use eyre::Result;

use crate::error::QueryError;
use crate::feature::FeatureStore;
use crate::geom::{BBox, Tile};
use crate::store::{BitScan, PageNum};

/// A tile whose payload may contain matching features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRef {
    pub tile: Tile,
    pub payload: PageNum,
}

struct Visit {
    tile: Tile,
    node: PageNum,
}

/// Depth-first iterator over index tiles intersecting a query box.
pub struct TileWalker {
    store: Arc<FeatureStore>,
    query: BBox,
    stack: SmallVec<[Visit; 16]>,
}

impl TileWalker {
    /// Walks the store's tile index, pruned by `query`. A store without an
    /// index yields nothing.
    pub fn new(store: Arc<FeatureStore>, query: BBox) -> Result<Self> {
        let mut stack = SmallVec::new();
        if let Some(root) = store.index_root()? {
            if query.intersects(&Tile::ROOT.bounds()) {
                stack.push(Visit {
                    tile: Tile::ROOT,
                    node: root,
                });
            }
        }
        Ok(Self {
            store,
            query,
            stack,
        })
    }

    fn visit(&mut self, visit: Visit) -> Result<Option<TileRef>> {
        let bytes = self.store.index_node(visit.node).map_err(|e| {
            e.wrap_err(QueryError::MissingTile {
                tile: visit.tile.to_string(),
            })
        })?;
        if bytes.len() < 8 {
            return Err(QueryError::MissingTile {
                tile: visit.tile.to_string(),
            }
            .into());
        }
        let payload = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let child_bitmap = u32::from_le_bytes(bytes[4..8].try_into().unwrap());

        // Push children in reverse so they pop in ascending quadrant order.
        let mut children: SmallVec<[Visit; 4]> = SmallVec::new();
        let mut ptr_ofs = 8usize;
        for quadrant in BitScan::new(child_bitmap & 0xF) {
            let Some(ptr_bytes) = bytes.get(ptr_ofs..ptr_ofs + 4) else {
                return Err(QueryError::MissingTile {
                    tile: visit.tile.to_string(),
                }
                .into());
            };
            let child_ptr = u32::from_le_bytes(ptr_bytes.try_into().unwrap());
            ptr_ofs += 4;

            let (dx, dy) = (quadrant & 1, quadrant >> 1);
            if let Some(child_tile) = visit.tile.child(dx, dy) {
                if self.query.intersects(&child_tile.bounds()) {
                    children.push(Visit {
                        tile: child_tile,
                        node: child_ptr,
                    });
                }
            }
        }
        while let Some(child) = children.pop() {
            self.stack.push(child);
        }

        Ok((payload != 0).then_some(TileRef {
            tile: visit.tile,
            payload,
        }))
    }

    /// Next candidate tile, or `None` when the walk is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<TileRef>> {
        while let Some(visit) = self.stack.pop() {
            match self.visit(visit) {
                Ok(Some(tile_ref)) => return Some(Ok(tile_ref)),
                Ok(None) => continue,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
