//! Geographic utilities.
//!
//! Distances follow the conventions of common GPX tooling so that metrics
//! stay comparable with tracks processed elsewhere: an equirectangular
//! approximation for short hops, haversine beyond 0.2 degrees.

use crate::GpsPoint;

/// Earth radius in meters (WGS84 equatorial).
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Length of one degree of arc at the equator in meters.
pub const ONE_DEGREE: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS / 360.0;

/// Beyond this latitude/longitude delta the approximation switches to haversine.
const APPROXIMATION_LIMIT_DEG: f64 = 0.2;

/// Great-circle distance in meters, ignoring elevation.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + (d_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS * c
}

/// Surface distance in meters.
pub fn distance_2d(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    if (p1.latitude - p2.latitude).abs() > APPROXIMATION_LIMIT_DEG
        || (p1.longitude - p2.longitude).abs() > APPROXIMATION_LIMIT_DEG
    {
        return haversine_distance(p1, p2);
    }

    let coef = p1.latitude.to_radians().cos();
    let x = p1.latitude - p2.latitude;
    let y = (p1.longitude - p2.longitude) * coef;
    (x * x + y * y).sqrt() * ONE_DEGREE
}

/// Distance in meters including the elevation delta when both points have one.
///
/// The haversine branch (long hops) ignores elevation.
pub fn distance_3d(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    if (p1.latitude - p2.latitude).abs() > APPROXIMATION_LIMIT_DEG
        || (p1.longitude - p2.longitude).abs() > APPROXIMATION_LIMIT_DEG
    {
        return haversine_distance(p1, p2);
    }

    let flat = distance_2d(p1, p2);
    match (p1.elevation, p2.elevation) {
        (Some(e1), Some(e2)) if e1 != e2 => (flat * flat + (e1 - e2).powi(2)).sqrt(),
        _ => flat,
    }
}

/// Total 3D length of a polyline in meters.
pub fn length_3d(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance_3d(&pair[0], &pair[1]))
        .sum()
}

/// Cumulative climb and descent of an elevation profile.
///
/// Missing elevations are dropped, the rest smoothed with a 0.3/0.4/0.3
/// kernel (end points kept as-is) before accumulating deltas.
/// Returns `(uphill, downhill)`, both non-negative.
pub fn uphill_downhill(elevations: &[Option<f64>]) -> (f64, f64) {
    let elevations: Vec<f64> = elevations.iter().flatten().copied().collect();
    let size = elevations.len();
    if size < 2 {
        return (0.0, 0.0);
    }

    let smoothed: Vec<f64> = (0..size)
        .map(|n| {
            if n > 0 && n < size - 1 {
                elevations[n - 1] * 0.3 + elevations[n] * 0.4 + elevations[n + 1] * 0.3
            } else {
                elevations[n]
            }
        })
        .collect();

    smoothed
        .windows(2)
        .fold((0.0, 0.0), |(up, down), pair| {
            let d = pair[1] - pair[0];
            if d > 0.0 { (up + d, down) } else { (up, down - d) }
        })
}
