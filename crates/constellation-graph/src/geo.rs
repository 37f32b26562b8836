//! Spherical-Earth geometry helpers
//!
//! ECEF positions, slant ranges and elevation angles between ground cells
//! and satellites. A spherical Earth is accurate enough for coverage and
//! link-length estimates at constellation scale.

use nalgebra::Vector3;

/// Mean Earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6371.000000000;

/// Earth-centred, Earth-fixed position (km) of a point at the given altitude
pub fn ecef_km(lat_deg: f64, lon_deg: f64, alt_km: f64) -> Vector3<f64> {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let r = EARTH_RADIUS_KM + alt_km;
    Vector3::new(r * lat.cos() * lon.cos(), r * lat.cos() * lon.sin(), r * lat.sin())
}

/// Straight-line distance (km) between two ECEF positions
pub fn distance_km(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    (a - b).norm()
}

/// Elevation angle (degrees) of `target` as seen from the ground point `ground`
///
/// Negative when the target is below the local horizon.
pub fn elevation_deg(ground: &Vector3<f64>, target: &Vector3<f64>) -> f64 {
    let line_of_sight = target - ground;
    let range = line_of_sight.norm();
    if range == 0.0 {
        return 90.0;
    }
    let zenith = ground.normalize();
    (line_of_sight.dot(&zenith) / range).clamp(-1.0, 1.0).asin().to_degrees()
}

/// Great-circle central angle (radians) between two lat/lon points
pub fn central_angle(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    let (lat1, lat2) = (lat1_deg.to_radians(), lat2_deg.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2_deg - lon1_deg).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Normalise a longitude into `[-180, 180)`
pub fn wrap_longitude(lon_deg: f64) -> f64 {
    (lon_deg + 180.0).rem_euclid(360.0) - 180.0
}
