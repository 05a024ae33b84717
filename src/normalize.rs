//! Route normalization.
//!
//! Turns an irregularly sampled polyline into a canonical curve of exactly
//! [`ROUTE_POINTS`] points, uniformly spaced by arc length:
//!
//! 1. drop exact duplicate coordinates (first occurrence wins)
//! 2. parametrize by cumulative chord length, normalized to [0, 1]
//! 3. smooth each dimension with a cubic smoothing spline, `s = length / 10000`
//! 4. sample the splines at [`ROUTE_POINTS`] evenly spaced parameters
//! 5. re-parametrize the smoothed curve by its own arc length and linearly
//!    interpolate it at [`ROUTE_POINTS`] evenly spaced arc-length values
//!
//! Lengths are measured in the units of the input coordinates. For
//! geographic input that means degrees, which also sets the scale of the
//! smoothing strength.

use std::collections::HashSet;

use geo::Coord;
use log::debug;

use crate::error::{Result, TrackError};
use crate::spline::SmoothingSpline;

/// Number of points in every normalized route.
pub const ROUTE_POINTS: usize = 1000;

/// Minimum distinct points for a cubic fit.
pub const MIN_DISTINCT_POINTS: usize = 4;

/// Smoothing strength is the raw polyline length divided by this.
pub const SMOOTHING_DIVISOR: f64 = 10_000.0;

/// Normalize a route to [`ROUTE_POINTS`] arc-length-uniform points.
///
/// Fails with [`TrackError::DegenerateRoute`] when fewer than
/// [`MIN_DISTINCT_POINTS`] distinct points remain or the route has no length.
///
/// # Example
/// ```
/// use geo::Coord;
/// use trackcorpus::normalize::{normalize_route, ROUTE_POINTS};
///
/// let points: Vec<Coord> = (0..20)
///     .map(|i| Coord { x: 8.5 + i as f64 * 0.001, y: 47.3 + (i as f64 * 0.3).sin() * 0.001 })
///     .collect();
/// let route = normalize_route(&points).unwrap();
/// assert_eq!(route.len(), ROUTE_POINTS);
/// ```
pub fn normalize_route(points: &[Coord]) -> Result<Vec<Coord>> {
    let distinct = dedup_points(points);
    if distinct.len() < MIN_DISTINCT_POINTS {
        return Err(TrackError::DegenerateRoute {
            distinct_points: distinct.len(),
            length: 0.0,
        });
    }

    let cumulative = cumulative_length(&distinct);
    let total = cumulative[cumulative.len() - 1];
    if !(total > 0.0) || !total.is_finite() {
        return Err(TrackError::DegenerateRoute {
            distinct_points: distinct.len(),
            length: total,
        });
    }

    let smoothing = total / SMOOTHING_DIVISOR;
    let params: Vec<f64> = cumulative.iter().map(|d| d / total).collect();
    let xs: Vec<f64> = distinct.iter().map(|c| c.x).collect();
    let ys: Vec<f64> = distinct.iter().map(|c| c.y).collect();

    let spline_x = SmoothingSpline::fit(&params, &xs, smoothing)?;
    let spline_y = SmoothingSpline::fit(&params, &ys, smoothing)?;

    let alpha = linspace(ROUTE_POINTS);
    let smoothed: Vec<Coord> = alpha
        .iter()
        .map(|&t| Coord {
            x: spline_x.eval(t),
            y: spline_y.eval(t),
        })
        .collect();

    let smoothed_cumulative = cumulative_length(&smoothed);
    let smoothed_total = smoothed_cumulative[smoothed_cumulative.len() - 1];
    if !(smoothed_total > 0.0) || !smoothed_total.is_finite() {
        return Err(TrackError::DegenerateRoute {
            distinct_points: distinct.len(),
            length: smoothed_total,
        });
    }

    let arc: Vec<f64> = smoothed_cumulative
        .iter()
        .map(|d| d / smoothed_total)
        .collect();

    debug!(
        "[Normalize] {} -> {} distinct points, raw length {:.6}, smoothed length {:.6}",
        points.len(),
        distinct.len(),
        total,
        smoothed_total
    );

    Ok(interpolate_linear(&smoothed, &arc, &alpha))
}

/// Remove exact duplicate coordinates wherever they occur, keeping the
/// first occurrence of each and the original order of the survivors.
///
/// `-0.0` and `0.0` compare equal.
pub fn dedup_points(points: &[Coord]) -> Vec<Coord> {
    let mut seen: HashSet<(u64, u64)> = HashSet::with_capacity(points.len());
    points
        .iter()
        .filter(|c| seen.insert(coord_key(c)))
        .copied()
        .collect()
}

fn coord_key(c: &Coord) -> (u64, u64) {
    // adding 0.0 folds -0.0 into 0.0
    ((c.x + 0.0).to_bits(), (c.y + 0.0).to_bits())
}

/// Cumulative Euclidean length along a polyline, starting with 0.
pub fn cumulative_length(points: &[Coord]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    out.push(acc);
    for pair in points.windows(2) {
        acc += (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y);
        out.push(acc);
    }
    out
}

/// `n` evenly spaced values from 0 to 1 inclusive.
fn linspace(n: usize) -> Vec<f64> {
    let last = (n - 1) as f64;
    (0..n).map(|i| i as f64 / last).collect()
}

/// Piecewise-linear interpolation of `points` (parametrized by the
/// non-decreasing `params`) at the non-decreasing `targets`.
fn interpolate_linear(points: &[Coord], params: &[f64], targets: &[f64]) -> Vec<Coord> {
    let last = params.len() - 1;
    let mut hi = 1;
    targets
        .iter()
        .map(|&t| {
            while hi < last && params[hi] < t {
                hi += 1;
            }
            let lo = hi - 1;
            let width = params[hi] - params[lo];
            let f = if width > 0.0 {
                ((t - params[lo]) / width).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (a, b) = (points[lo], points[hi]);
            Coord {
                x: a.x + f * (b.x - a.x),
                y: a.y + f * (b.y - a.y),
            }
        })
        .collect()
}
