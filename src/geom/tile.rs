//! Tiles of the quadtree index: `(zoom, column, row)` with zoom 0..=12.
//! Row 0 is the northernmost row; at zoom z the plane is split into 2^z
//! columns and rows. The serialized form is decimal `"zoom/column/row"`.

use std::fmt;

use super::BBox;

pub const MAX_ZOOM: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    zoom: u32,
    column: u32,
    row: u32,
}

impl Tile {
    /// The zoom-0 tile covering the whole plane.
    pub const ROOT: Tile = Tile {
        zoom: 0,
        column: 0,
        row: 0,
    };

    pub fn new(zoom: u32, column: u32, row: u32) -> Option<Tile> {
        if zoom > MAX_ZOOM || column >= (1 << zoom).max(1) || row >= (1 << zoom).max(1) {
            return None;
        }
        Some(Tile { zoom, column, row })
    }

    pub fn zoom(&self) -> u32 {
        self.zoom
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    /// Parses `"zoom/column/row"`. Anything else — sign characters, extra
    /// separators, trailing bytes, out-of-range zoom — yields `None`.
    pub fn from_string(s: &str) -> Option<Tile> {
        let mut bytes = s.bytes();

        fn digits(bytes: &mut std::str::Bytes<'_>, stop_at_slash: bool) -> Option<u32> {
            let mut value: u64 = 0;
            let mut seen = false;
            for b in bytes.by_ref() {
                match b {
                    b'0'..=b'9' => {
                        seen = true;
                        value = value * 10 + (b - b'0') as u64;
                        if value > u32::MAX as u64 {
                            return None;
                        }
                    }
                    b'/' if stop_at_slash && seen => return Some(value as u32),
                    _ => return None,
                }
            }
            // End of input is only legal for the final component.
            if seen && !stop_at_slash {
                Some(value as u32)
            } else {
                None
            }
        }

        let zoom = digits(&mut bytes, true)?;
        let column = digits(&mut bytes, true)?;
        let row = digits(&mut bytes, false)?;
        Tile::new(zoom, column, row)
    }

    /// The tile's extent on the Mercator plane, edges inclusive.
    pub fn bounds(&self) -> BBox {
        let extent = 1i64 << (32 - self.zoom);
        let min_x = -(1i64 << 31) + self.column as i64 * extent;
        let max_y = (1i64 << 31) - 1 - self.row as i64 * extent;
        BBox::new(
            min_x as i32,
            (max_y - extent + 1) as i32,
            (min_x + extent - 1) as i32,
            max_y as i32,
        )
    }

    /// Child at quadrant `(dx, dy)`, `dy` growing southward like rows do.
    /// `None` past the maximum zoom.
    pub fn child(&self, dx: u32, dy: u32) -> Option<Tile> {
        debug_assert!(dx < 2 && dy < 2);
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        Some(Tile {
            zoom: self.zoom + 1,
            column: self.column * 2 + dx,
            row: self.row * 2 + dy,
        })
    }

    /// The tile containing this one at the previous zoom, or `None` for
    /// the root.
    pub fn parent(&self) -> Option<Tile> {
        if self.zoom == 0 {
            return None;
        }
        Some(Tile {
            zoom: self.zoom - 1,
            column: self.column / 2,
            row: self.row / 2,
        })
    }

    /// This tile's quadrant index within its parent: `dx + 2 * dy`.
    pub fn quadrant(&self) -> u32 {
        (self.column & 1) | ((self.row & 1) << 1)
    }

    /// Packs into a sortable u32 key: zoom, then column, then row.
    pub fn to_key(&self) -> u32 {
        (self.zoom << 24) | (self.column << 12) | self.row
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_parses_valid_tiles() {
        let tile = Tile::from_string("5/17/9").unwrap();

        assert_eq!(tile.zoom(), 5);
        assert_eq!(tile.column(), 17);
        assert_eq!(tile.row(), 9);
    }

    #[test]
    fn from_string_accepts_zoom_bounds() {
        assert!(Tile::from_string("0/0/0").is_some());
        assert!(Tile::from_string("12/0/0").is_some());
        assert!(Tile::from_string("13/0/0").is_none());
    }

    #[test]
    fn from_string_rejects_signs_and_garbage() {
        assert!(Tile::from_string("-1/0/0").is_none());
        assert!(Tile::from_string("1/0/0 ").is_none());
        assert!(Tile::from_string("1/0/0/").is_none());
        assert!(Tile::from_string("1//0").is_none());
        assert!(Tile::from_string("1/0").is_none());
        assert!(Tile::from_string("").is_none());
        assert!(Tile::from_string("a/b/c").is_none());
    }

    #[test]
    fn from_string_rejects_out_of_range_column() {
        assert!(Tile::from_string("5/31/0").is_some());
        assert!(Tile::from_string("5/32/0").is_none());
    }

    #[test]
    fn round_trips_through_display() {
        for (z, c, r) in [(0, 0, 0), (5, 17, 9), (12, 4095, 4095)] {
            let tile = Tile::new(z, c, r).unwrap();
            assert_eq!(Tile::from_string(&tile.to_string()), Some(tile));
        }
    }

    #[test]
    fn root_bounds_cover_the_plane() {
        let bounds = Tile::ROOT.bounds();

        assert_eq!(bounds, BBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX));
    }

    #[test]
    fn children_tile_the_parent() {
        let parent = Tile::new(3, 2, 5).unwrap();
        let parent_bounds = parent.bounds();

        let mut union = BBox::empty();
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let child = parent.child(dx, dy).unwrap();
            let child_bounds = child.bounds();
            assert!(parent_bounds.contains(&child_bounds));
            union = union.union(&child_bounds);
        }
        assert_eq!(union, parent_bounds);
    }

    #[test]
    fn row_zero_is_north() {
        let north = Tile::new(1, 0, 0).unwrap().bounds();
        let south = Tile::new(1, 0, 1).unwrap().bounds();

        assert!(north.min_y > south.max_y - 1);
        assert_eq!(north.max_y, i32::MAX);
        assert_eq!(south.min_y, i32::MIN);
    }

    #[test]
    fn max_zoom_tile_has_no_children() {
        let leaf = Tile::new(12, 0, 0).unwrap();

        assert!(leaf.child(0, 0).is_none());
    }

    #[test]
    fn sort_key_orders_by_zoom_then_position() {
        let a = Tile::new(3, 0, 0).unwrap();
        let b = Tile::new(3, 0, 1).unwrap();
        let c = Tile::new(4, 0, 0).unwrap();

        assert!(a.to_key() < b.to_key());
        assert!(b.to_key() < c.to_key());
    }
}
