//! Conversions between WGS-84 degrees and the 2^32-unit Mercator plane,
//! plus the meters scale used by distance filters. The projection is the
//! usual spherical web-Mercator; latitudes are usable to roughly +/- 85.05
//! degrees (the edge of the square).

use std::f64::consts::PI;

/// Plane units per 360 degrees of longitude.
const SCALE_X: f64 = 4_294_967_296.0 / 360.0;

/// Earth circumference at the equator in meters (WGS-84).
pub const EARTH_CIRCUMFERENCE: f64 = 40_075_016.685_578_49;

fn clamp_to_i32(v: f64) -> i32 {
    v.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

pub fn x_from_lon(lon: f64) -> i32 {
    clamp_to_i32(lon * SCALE_X)
}

pub fn y_from_lat(lat: f64) -> i32 {
    let y = ((PI / 4.0 + lat.to_radians() / 2.0).tan()).ln() / PI * 2_147_483_648.0;
    clamp_to_i32(y)
}

pub fn lon_from_x(x: i32) -> f64 {
    x as f64 / SCALE_X
}

pub fn lat_from_y(y: i32) -> f64 {
    ((y as f64 / 2_147_483_648.0 * PI).exp().atan() * 2.0 - PI / 2.0).to_degrees()
}

/// Plane units per meter at the given plane y. Mercator stretches away
/// from the equator by 1/cos(lat).
pub fn units_per_meter(y: i32) -> f64 {
    let lat = lat_from_y(y).to_radians();
    (4_294_967_296.0 / EARTH_CIRCUMFERENCE) / lat.cos().max(1e-9)
}

pub fn meters_to_units(meters: f64, at_y: i32) -> f64 {
    meters * units_per_meter(at_y)
}
