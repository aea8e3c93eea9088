//! # Geometry Primitives
//!
//! goldb works in a signed 32-bit Mercator plane: the world is projected
//! onto a square of 2^32 x 2^32 units with (0,0) at lon 0 / lat 0, x
//! growing east and y growing north. All spatial predicates in the core
//! are integer box math on this plane; only the conversions to and from
//! degrees (and the meters scale) touch floating point.

mod bbox;
pub mod length_unit;
pub mod mercator;
mod tile;

pub use bbox::BBox;
pub use tile::{Tile, MAX_ZOOM};

/// A pair of Cartesian coordinate values on the Mercator plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

impl Coordinate {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Creates a Coordinate from longitude and latitude, in that order.
    pub fn of_lon_lat(lon: f64, lat: f64) -> Self {
        Self {
            x: mercator::x_from_lon(lon),
            y: mercator::y_from_lat(lat),
        }
    }

    /// Creates a Coordinate from latitude and longitude, in that order.
    pub fn of_lat_lon(lat: f64, lon: f64) -> Self {
        Self::of_lon_lat(lon, lat)
    }

    pub fn lon(&self) -> f64 {
        mercator::lon_from_x(self.x)
    }

    pub fn lat(&self) -> f64 {
        mercator::lat_from_y(self.y)
    }

    pub fn is_null(&self) -> bool {
        (self.x | self.y) == 0
    }
}

impl From<Coordinate> for i64 {
    fn from(c: Coordinate) -> i64 {
        ((c.y as i64) << 32) | (c.x as u32 as i64)
    }
}
