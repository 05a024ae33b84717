//! External lookups used while parsing: timezone resolution and weather.
//!
//! Both are trait objects injected into [`crate::TrackParser`]. Every call
//! goes through [`call_with_timeout`] so that a hanging lookup surfaces as
//! [`TrackError::Enrichment`] instead of stalling a batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;

use crate::error::{Result, TrackError};

/// Open mapping of weather fields attached to a track.
pub type WeatherAttributes = BTreeMap<String, serde_json::Value>;

/// Resolves the IANA timezone id at a coordinate.
pub trait TimezoneLookup: Send + Sync {
    fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<String>;

    /// Whether a call can stall (network, disk). Non-blocking lookups are
    /// called directly instead of through [`call_with_timeout`].
    fn may_block(&self) -> bool {
        true
    }
}

/// Looks up weather conditions for a place and time.
pub trait WeatherLookup: Send + Sync {
    fn weather_at(
        &self,
        instant: DateTime<FixedOffset>,
        latitude: f64,
        longitude: f64,
        elevation: Option<f64>,
    ) -> Result<WeatherAttributes>;

    /// Whether a call can stall. See [`TimezoneLookup::may_block`].
    fn may_block(&self) -> bool {
        true
    }
}

/// Timezone lookup that always answers with the same zone.
#[derive(Debug, Clone)]
pub struct FixedTimezone {
    zone: Tz,
}

impl FixedTimezone {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn utc() -> Self {
        Self::new(Tz::UTC)
    }
}

impl TimezoneLookup for FixedTimezone {
    fn timezone_at(&self, _latitude: f64, _longitude: f64) -> Result<String> {
        Ok(self.zone.name().to_string())
    }

    fn may_block(&self) -> bool {
        false
    }
}

/// Parse an IANA timezone id.
pub fn parse_zone(id: &str) -> Result<Tz> {
    id.parse::<Tz>()
        .map_err(|e| TrackError::enrichment("timezone", format!("unknown zone {id:?}: {e}")))
}

/// Run `f` on a helper thread and wait at most `timeout` for its result.
///
/// Every call spawns one OS thread. On expiry the helper thread is detached
/// and its result discarded; a lookup that never returns keeps its thread
/// alive until the process exits. In-memory lookups should report
/// `may_block() == false` so callers can skip this.
///
/// ```
/// use std::time::Duration;
/// use trackcorpus::enrich::call_with_timeout;
///
/// let answer = call_with_timeout("weather", Duration::from_secs(1), || Ok(42)).unwrap();
/// assert_eq!(answer, 42);
/// ```
pub fn call_with_timeout<T, F>(lookup: &'static str, timeout: Duration, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("{lookup}-lookup"))
        .spawn(move || {
            // receiver may be gone after a timeout
            let _ = tx.send(f());
        })
        .map_err(|e| TrackError::enrichment(lookup, e))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(TrackError::enrichment(
            lookup,
            format!("no answer within {} ms", timeout.as_millis()),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(TrackError::enrichment(lookup, "lookup thread panicked"))
        }
    }
}

/// Shared handle to a timezone lookup.
pub type SharedTimezoneLookup = Arc<dyn TimezoneLookup>;

/// Shared handle to a weather lookup.
pub type SharedWeatherLookup = Arc<dyn WeatherLookup>;

#[cfg(feature = "tzf")]
mod finder {
    use super::*;
    use once_cell::sync::Lazy;

    /// Process-wide polygon finder, built on first use.
    static FINDER: Lazy<tzf_rs::DefaultFinder> = Lazy::new(tzf_rs::DefaultFinder::new);

    /// Timezone lookup backed by the bundled tzf-rs polygons.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TzfTimezone;

    impl TimezoneLookup for TzfTimezone {
        fn timezone_at(&self, latitude: f64, longitude: f64) -> Result<String> {
            let name = FINDER.get_tz_name(longitude, latitude);
            if name.is_empty() {
                return Err(TrackError::enrichment(
                    "timezone",
                    format!("no zone at ({latitude}, {longitude})"),
                ));
            }
            Ok(name.to_string())
        }

        fn may_block(&self) -> bool {
            false
        }
    }

    static SHARED: Lazy<SharedTimezoneLookup> = Lazy::new(|| Arc::new(TzfTimezone));

    /// The process-wide timezone lookup.
    pub fn shared_timezone_lookup() -> SharedTimezoneLookup {
        Arc::clone(&SHARED)
    }
}

#[cfg(feature = "tzf")]
pub use finder::{TzfTimezone, shared_timezone_lookup};
