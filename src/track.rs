//! GPX track reading.
//!
//! Wraps a parsed GPX document and exposes the track-level quantities the
//! parser needs: the flattened point stream, 3D length, moving duration,
//! climb/descent and time bounds.

use std::io::Read;

use chrono::{DateTime, Duration, Utc};
use gpx::Gpx;

use crate::GpsPoint;
use crate::error::{Result, TrackError};
use crate::geo_utils;

/// A GPS point with an optional UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedPoint {
    pub point: GpsPoint,
    pub time: Option<DateTime<Utc>>,
}

/// A parsed GPX document, reduced to its track segments.
#[derive(Debug, Clone)]
pub struct GpxTrack {
    /// Document or first track name
    pub name: Option<String>,
    /// Metadata keywords, empty if absent
    pub keywords: String,
    segments: Vec<Vec<TimedPoint>>,
}

impl GpxTrack {
    /// Read a GPX document. `file` is only used for error messages.
    pub fn read<R: Read>(file: &str, reader: R) -> Result<Self> {
        let gpx: Gpx = gpx::read(reader).map_err(|e| TrackError::parse(file, e))?;
        Self::from_gpx(file, gpx)
    }

    fn from_gpx(file: &str, gpx: Gpx) -> Result<Self> {
        let metadata_name = gpx.metadata.as_ref().and_then(|m| m.name.clone());
        let keywords = gpx
            .metadata
            .as_ref()
            .and_then(|m| m.keywords.clone())
            .unwrap_or_default();
        let track_name = gpx.tracks.first().and_then(|t| t.name.clone());

        let mut segments = Vec::new();
        for track in &gpx.tracks {
            for segment in &track.segments {
                let mut points = Vec::with_capacity(segment.points.len());
                for waypoint in &segment.points {
                    let geo = waypoint.point();
                    let point = GpsPoint {
                        latitude: geo.y(),
                        longitude: geo.x(),
                        elevation: waypoint.elevation,
                    };
                    if !point.is_valid() {
                        continue;
                    }
                    let time = match &waypoint.time {
                        Some(time) => Some(to_utc(file, time)?),
                        None => None,
                    };
                    points.push(TimedPoint { point, time });
                }
                if !points.is_empty() {
                    segments.push(points);
                }
            }
        }

        Ok(Self {
            name: metadata_name.or(track_name),
            keywords,
            segments,
        })
    }

    /// All points of all segments, in document order.
    pub fn points(&self) -> impl Iterator<Item = &TimedPoint> {
        self.segments.iter().flatten()
    }

    pub fn point_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    pub fn first_point(&self) -> Option<&TimedPoint> {
        self.points().next()
    }

    pub fn last_point(&self) -> Option<&TimedPoint> {
        self.segments.iter().rev().find_map(|s| s.last())
    }

    /// 3D length in meters, summed per segment.
    pub fn length_3d(&self) -> f64 {
        self.segments
            .iter()
            .map(|segment| {
                let points: Vec<GpsPoint> = segment.iter().map(|p| p.point).collect();
                geo_utils::length_3d(&points)
            })
            .sum()
    }

    /// Duration summed over segments from consecutive timed points.
    pub fn duration(&self) -> Duration {
        self.segments
            .iter()
            .map(|segment| {
                let times: Vec<DateTime<Utc>> = segment.iter().filter_map(|p| p.time).collect();
                times
                    .windows(2)
                    .map(|w| w[1] - w[0])
                    .filter(|delta| *delta > Duration::zero())
                    .fold(Duration::zero(), |acc, delta| acc + delta)
            })
            .fold(Duration::zero(), |acc, d| acc + d)
    }

    /// `(uphill, downhill)` in meters, summed per segment.
    pub fn uphill_downhill(&self) -> (f64, f64) {
        self.segments.iter().fold((0.0, 0.0), |(up, down), segment| {
            let elevations: Vec<Option<f64>> = segment.iter().map(|p| p.point.elevation).collect();
            let (u, d) = geo_utils::uphill_downhill(&elevations);
            (up + u, down + d)
        })
    }

    /// First and last timestamp of the document.
    pub fn time_bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.points().find_map(|p| p.time)?;
        let end = self
            .segments
            .iter()
            .rev()
            .flat_map(|s| s.iter().rev())
            .find_map(|p| p.time)?;
        Some((start, end))
    }
}

fn to_utc(file: &str, time: &gpx::Time) -> Result<DateTime<Utc>> {
    let iso = time.format().map_err(|e| TrackError::parse(file, e))?;
    Ok(DateTime::parse_from_rfc3339(&iso)
        .map_err(|e| TrackError::parse(file, e))?
        .with_timezone(&Utc))
}
