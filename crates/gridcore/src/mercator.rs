//! Spherical Mercator helpers for the render coordinate system.
//!
//! Render space is the unit square used by web map renderers: `x` grows east
//! from the antimeridian, `y` grows south from the top of the projection.

use std::f64::consts::PI;

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;
}

#[inline]
pub fn mercator_x_from_lng(lng: f64) -> f64 {
    (180.0 + lng) / 360.0
}

#[inline]
pub fn mercator_y_from_lat(lat: f64) -> f64 {
    (180.0 - (180.0 / PI) * (PI / 4.0 + lat * PI / 360.0).tan().ln()) / 360.0
}

/// Forward transform `[lon, lat]` (degrees) -> render `[x, y]`.
#[inline]
pub fn from_lon_lat(lon_lat: [f64; 2]) -> [f64; 2] {
    [mercator_x_from_lng(lon_lat[0]), mercator_y_from_lat(lon_lat[1])]
}

/// Inverse of [`from_lon_lat`].
#[inline]
pub fn to_lon_lat(xy: [f64; 2]) -> [f64; 2] {
    let lon = xy[0] * 360.0 - 180.0;
    let y2 = 180.0 - xy[1] * 360.0;
    let lat = 360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0;
    [lon, lat]
}

/// EPSG:3857 meters -> `[lon, lat]` degrees.
#[inline]
pub fn web_mercator_meters_to_lon_lat(xy: [f64; 2]) -> [f64; 2] {
    let lon = (xy[0] / wgs84::A).to_degrees();
    let lat = (2.0 * (xy[1] / wgs84::A).exp().atan() - PI / 2.0).to_degrees();
    [lon, lat]
}
