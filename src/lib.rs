//! # Track Corpus
//!
//! Incremental GPX track corpus for route analysis.
//!
//! This library provides:
//! - GPX parsing into typed track records (distance, duration, climb, calendar fields)
//! - Route normalization into fixed-length, arc-length-uniform curves
//! - A persistent per-session corpus that never reparses a known track
//! - Background ingestion with polling-friendly progress and single-flight per session
//!
//! ## Features
//!
//! - **`parallel`** - Parse the files of a batch in parallel with rayon
//! - **`tzf`** - Bundle a process-wide timezone finder (tzf-rs)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trackcorpus::{FixedTimezone, IngestConfig, IngestionCoordinator, StartOutcome, TrackParser};
//!
//! let parser = TrackParser::new(Arc::new(FixedTimezone::utc()));
//! let coordinator = IngestionCoordinator::new(IngestConfig::default(), parser);
//!
//! let handle = match coordinator.start_ingestion("session-1", "uploads/session-1", "gpx", true)? {
//!     StartOutcome::Started(handle) | StartOutcome::Busy(handle) => handle,
//! };
//! println!("{:.0}% done", handle.percent_complete());
//! handle.wait();
//!
//! let corpus = coordinator.load("session-1")?;
//! println!("{} tracks", corpus.len());
//! # Ok::<(), trackcorpus::TrackError>(())
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDate};
use geo::Coord;
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrackError};

// Geographic utilities (GPX-compatible distances, climb)
pub mod geo_utils;

// Cubic smoothing spline
pub mod spline;

// Route normalization (dedup, smoothing, arc-length resampling)
pub mod normalize;
pub use normalize::{ROUTE_POINTS, normalize_route};

// GPX document reading
pub mod track;
pub use track::GpxTrack;

// Timezone and weather lookups
pub mod enrich;
pub use enrich::{
    FixedTimezone, SharedTimezoneLookup, SharedWeatherLookup, TimezoneLookup, WeatherAttributes,
    WeatherLookup,
};

// Track file parsing into records
pub mod parser;
pub use parser::TrackParser;

// Corpus cache and ingestion coordinator
pub mod engine;
pub use engine::{
    BatchReport, CancellationToken, Corpus, CorpusCache, IngestionCoordinator, IngestionHandle,
    IngestionStatus, StartOutcome,
};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude, longitude and optional elevation.
///
/// # Example
/// ```
/// use trackcorpus::GpsPoint;
/// let point = GpsPoint::new(47.3769, 8.5417); // Zurich
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

impl GpsPoint {
    /// Create a new GPS point without elevation.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: None,
        }
    }

    /// Create a new GPS point with elevation.
    pub fn with_elevation(latitude: f64, longitude: f64, elevation: f64) -> Self {
        Self {
            latitude,
            longitude,
            elevation: Some(elevation),
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Project to an (x = longitude, y = latitude) coordinate.
    pub fn to_coord(&self) -> Coord {
        Coord {
            x: self.longitude,
            y: self.latitude,
        }
    }
}

/// Day of the week, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    /// The full ordered domain.
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        Weekday::ALL[day.num_days_from_monday() as usize]
    }
}

/// Meteorological season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Autumn];

    /// Season of a calendar month (1-12).
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "winter",
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
        }
    }
}

/// One parsed track. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Source file name, unique within a corpus
    pub id: String,
    /// Track name from the GPX metadata or first track
    #[serde(default)]
    pub name: Option<String>,
    /// 3D length in meters
    pub distance_meters: f64,
    pub duration_minutes: f64,
    pub uphill_meters: f64,
    pub downhill_meters: f64,
    pub start_location: GpsPoint,
    pub end_location: GpsPoint,
    /// IANA zone the start instant was localized to
    pub timezone: String,
    pub start_date_time: DateTime<FixedOffset>,
    pub date: NaiveDate,
    /// Local hour plus minute / 60
    pub time_of_day: f64,
    pub month: u32,
    pub weekday: Weekday,
    pub season: Season,
    /// Straight-line start to end distance in meters
    pub crow_distance_meters: f64,
    pub speed_kmh: f64,
    pub crow_speed_kmh: f64,
    pub keywords: String,
    /// Empty when weather enrichment was off or failed
    #[serde(default)]
    pub weather: WeatherAttributes,
    /// Exactly [`ROUTE_POINTS`] (longitude, latitude) points
    pub normalized_route: Vec<Coord>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Default upper bound for a single timezone or weather lookup.
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 10_000;

/// Configuration for the ingestion coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Root directory holding one subdirectory per session.
    /// Default: "sessions"
    pub sessions_root: PathBuf,

    /// File name of the corpus store inside a session directory.
    /// Default: "corpus.json"
    pub store_file_name: String,

    /// Suffix of track files when `start_ingestion` is given an empty filter.
    /// Default: "gpx"
    pub suffix_filter: String,

    /// Query the weather lookup for every parsed track (if one is configured).
    /// Default: true
    pub enrich_with_weather: bool,

    /// Upper bound for each timezone or weather lookup in milliseconds.
    /// Default: 10000
    pub lookup_timeout_ms: u64,

    /// Minimum number of track files required to start a batch.
    /// Default: 2
    pub min_batch_files: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sessions_root: PathBuf::from("sessions"),
            store_file_name: "corpus.json".to_string(),
            suffix_filter: "gpx".to_string(),
            enrich_with_weather: true,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            min_batch_files: 2,
        }
    }
}

impl IngestConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TrackError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| TrackError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    /// Directory of a session.
    pub fn session_dir(&self, session_key: &str) -> PathBuf {
        self.sessions_root.join(session_key)
    }

    /// Path of a session's corpus store.
    pub fn store_path(&self, session_key: &str) -> PathBuf {
        self.session_dir(session_key).join(&self.store_file_name)
    }

    pub fn lookup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lookup_timeout_ms)
    }
}
