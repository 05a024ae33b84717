//! Track file parsing.
//!
//! Turns one GPX file into a [`TrackRecord`]: scalar metrics from the track,
//! start instant localized to the start location's timezone, optional weather
//! attributes, calendar fields and the normalized route.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use chrono_tz::Tz;
use geo::Coord;
use log::{debug, warn};

use crate::enrich::{
    SharedTimezoneLookup, SharedWeatherLookup, WeatherAttributes, call_with_timeout, parse_zone,
};
use crate::error::{OptionExt, Result, TrackError};
use crate::normalize::normalize_route;
use crate::track::GpxTrack;
use crate::{DEFAULT_LOOKUP_TIMEOUT_MS, GpsPoint, Season, TrackRecord, geo_utils};

/// Parses GPX files into track records.
///
/// Lookups are injected so one process-wide timezone finder can be shared by
/// every parser and batch.
#[derive(Clone)]
pub struct TrackParser {
    timezone: SharedTimezoneLookup,
    weather: Option<SharedWeatherLookup>,
    lookup_timeout: Duration,
}

impl TrackParser {
    /// Create a parser without weather enrichment.
    pub fn new(timezone: SharedTimezoneLookup) -> Self {
        Self {
            timezone,
            weather: None,
            lookup_timeout: Duration::from_millis(DEFAULT_LOOKUP_TIMEOUT_MS),
        }
    }

    /// Attach a weather lookup.
    pub fn with_weather(mut self, weather: SharedWeatherLookup) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Bound every external lookup by `timeout`.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn lookup_timeout(&self) -> Duration {
        self.lookup_timeout
    }

    /// Parse a track file. The record id is the file name.
    ///
    /// Weather is only queried when `enrich_with_weather` is set and a weather
    /// lookup is attached; a failing lookup leaves the attributes empty.
    pub fn parse(&self, path: &Path, enrich_with_weather: bool) -> Result<TrackRecord> {
        let id = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_parse(&path.display().to_string(), "no usable file name")?;
        let file = File::open(path).map_err(|e| TrackError::parse(id, e))?;
        self.parse_reader(id, BufReader::new(file), enrich_with_weather)
    }

    /// Parse a track from an already opened reader.
    pub fn parse_reader<R: Read>(
        &self,
        id: &str,
        reader: R,
        enrich_with_weather: bool,
    ) -> Result<TrackRecord> {
        debug!(
            "[Parser] reading {} {} weather",
            id,
            if enrich_with_weather { "with" } else { "without" }
        );

        let track = GpxTrack::read(id, reader)?;
        let first = track.first_point().ok_or_parse(id, "no track points")?.point;
        let last = track.last_point().ok_or_parse(id, "no track points")?.point;
        let (start_utc, _) = track.time_bounds().ok_or_parse(id, "no time bounds")?;

        let distance_meters = track.length_3d();
        let duration_minutes = track.duration().num_milliseconds() as f64 / 60_000.0;
        if !(duration_minutes > 0.0) {
            return Err(TrackError::parse(id, "duration is zero"));
        }
        if !(distance_meters > 0.0) {
            return Err(TrackError::parse(id, "distance is zero"));
        }
        let (uphill_meters, downhill_meters) = track.uphill_downhill();

        let route: Vec<Coord> = track.points().map(|p| p.point.to_coord()).collect();
        let normalized_route = normalize_route(&route)?;

        let zone = self.resolve_zone(id, &first);
        let local = start_utc.with_timezone(&zone);
        let start_date_time = local.fixed_offset();

        let weather = match &self.weather {
            Some(lookup) if enrich_with_weather => {
                self.lookup_weather(id, lookup, start_date_time, &first)
            }
            _ => WeatherAttributes::new(),
        };

        let crow_distance_meters = geo_utils::distance_3d(&last, &first);
        let month = local.month();

        Ok(TrackRecord {
            id: id.to_string(),
            name: track.name.clone(),
            distance_meters,
            duration_minutes,
            uphill_meters,
            downhill_meters,
            start_location: first,
            end_location: last,
            timezone: zone.name().to_string(),
            start_date_time,
            date: local.date_naive(),
            time_of_day: local.hour() as f64 + local.minute() as f64 / 60.0,
            month,
            weekday: local.weekday().into(),
            season: Season::from_month(month),
            crow_distance_meters,
            speed_kmh: speed_kmh(distance_meters, duration_minutes),
            crow_speed_kmh: speed_kmh(crow_distance_meters, duration_minutes),
            keywords: track.keywords.clone(),
            weather,
            normalized_route,
        })
    }

    /// Zone at the start point; UTC when the lookup fails.
    fn resolve_zone(&self, id: &str, start: &GpsPoint) -> Tz {
        let lookup = Arc::clone(&self.timezone);
        let (lat, lon) = (start.latitude, start.longitude);
        let zone_id = if lookup.may_block() {
            call_with_timeout("timezone", self.lookup_timeout, move || {
                lookup.timezone_at(lat, lon)
            })
        } else {
            lookup.timezone_at(lat, lon)
        };
        let resolved = zone_id.and_then(|zone_id| parse_zone(&zone_id));

        resolved.unwrap_or_else(|e| {
            warn!("[Parser] {}: {}, falling back to UTC", id, e);
            Tz::UTC
        })
    }

    fn lookup_weather(
        &self,
        id: &str,
        lookup: &SharedWeatherLookup,
        instant: DateTime<FixedOffset>,
        start: &GpsPoint,
    ) -> WeatherAttributes {
        let lookup = Arc::clone(lookup);
        let start = *start;
        let result = if lookup.may_block() {
            call_with_timeout("weather", self.lookup_timeout, move || {
                lookup.weather_at(instant, start.latitude, start.longitude, start.elevation)
            })
        } else {
            lookup.weather_at(instant, start.latitude, start.longitude, start.elevation)
        };

        result.unwrap_or_else(|e| {
            warn!("[Parser] {}: {}, continuing without weather", id, e);
            WeatherAttributes::new()
        })
    }
}

impl std::fmt::Debug for TrackParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackParser")
            .field("weather", &self.weather.is_some())
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

/// km/h from meters and minutes.
fn speed_kmh(meters: f64, minutes: f64) -> f64 {
    meters / 1000.0 / minutes * 60.0
}
