//! Persistent corpus of track records.
//!
//! Manages the per-session corpus with:
//! - First-write-wins merging (a known id is never overwritten)
//! - Category domains that only ever grow across merges
//! - Unsaved tracking so persisting an unchanged corpus is a no-op
//! - Atomic replace-on-write through a temporary file and rename

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackError};
use crate::{Season, TrackRecord, Weekday};

/// Current store format version.
pub const STORE_VERSION: u32 = 1;

/// Category values observed across every merge into a corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryDomains {
    pub seasons: BTreeSet<Season>,
    pub weekdays: BTreeSet<Weekday>,
    pub months: BTreeSet<u32>,
    pub keywords: BTreeSet<String>,
}

impl CategoryDomains {
    /// Add the categories of one record.
    pub fn observe(&mut self, record: &TrackRecord) {
        self.seasons.insert(record.season);
        self.weekdays.insert(record.weekday);
        self.months.insert(record.month);
        self.keywords.insert(record.keywords.clone());
    }

    /// Union with another set of domains.
    pub fn extend(&mut self, other: &CategoryDomains) {
        self.seasons.extend(other.seasons.iter().copied());
        self.weekdays.extend(other.weekdays.iter().copied());
        self.months.extend(other.months.iter().copied());
        self.keywords.extend(other.keywords.iter().cloned());
    }

    /// True if every value of `other` is also in `self`.
    pub fn contains_all(&self, other: &CategoryDomains) -> bool {
        self.seasons.is_superset(&other.seasons)
            && self.weekdays.is_superset(&other.weekdays)
            && self.months.is_superset(&other.months)
            && self.keywords.is_superset(&other.keywords)
    }
}

/// Mapping from track id to record for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    records: HashMap<String, TrackRecord>,
    domains: CategoryDomains,
    /// Records merged since the last load or persist
    #[serde(skip)]
    unsaved: usize,
}

impl Corpus {
    /// Create a new empty corpus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge records whose id is not yet present; known ids are dropped.
    ///
    /// Category domains are unioned with the domains of the accepted records.
    pub fn merge_new(mut self, new_records: impl IntoIterator<Item = TrackRecord>) -> Self {
        let mut dropped = 0;
        for record in new_records {
            if self.records.contains_key(&record.id) {
                dropped += 1;
                continue;
            }
            self.domains.observe(&record);
            self.records.insert(record.id.clone(), record);
            self.unsaved += 1;
        }
        if dropped > 0 {
            debug!("[Corpus] dropped {} records with known ids", dropped);
        }
        self
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<&TrackRecord> {
        self.records.get(id)
    }

    /// Check if a record exists.
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// All record ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    /// All records, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &TrackRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Category values observed across all merges.
    pub fn domains(&self) -> &CategoryDomains {
        &self.domains
    }

    /// The full ordered weekday domain, independent of observed values.
    pub fn weekday_categories(&self) -> [Weekday; 7] {
        Weekday::ALL
    }

    /// Number of records merged since the last load or persist.
    pub fn unsaved_count(&self) -> usize {
        self.unsaved
    }
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    corpus: &'a Corpus,
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    corpus: serde_json::Value,
}

/// Durable storage of one session's corpus.
#[derive(Debug, Clone)]
pub struct CorpusCache {
    store_path: PathBuf,
}

impl CorpusCache {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Load the stored corpus, or an empty one if no store exists yet.
    ///
    /// A store that exists but cannot be read is an error, never an empty corpus.
    pub fn load(&self) -> Result<Corpus> {
        let path = &self.store_path;
        // only a missing store means empty; permission or path errors surface
        let exists = path.try_exists().map_err(|e| TrackError::cache_io(path, e))?;
        if !exists {
            info!("[Corpus] {} doesn't exist, starting empty", path.display());
            return Ok(Corpus::new());
        }

        let file = File::open(path).map_err(|e| TrackError::cache_io(path, e))?;
        let store: StoreFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| TrackError::cache_io(path, e))?;

        let corpus: Corpus = match store.version {
            STORE_VERSION => {
                serde_json::from_value(store.corpus).map_err(|e| TrackError::cache_io(path, e))?
            }
            other => {
                return Err(TrackError::cache_io(
                    path,
                    format!("unsupported store version {other}"),
                ));
            }
        };

        info!(
            "[Corpus] loaded {} records from {}",
            corpus.len(),
            path.display()
        );
        Ok(corpus)
    }

    /// Create the store directory and check that a file can be written there.
    ///
    /// Run before any work whose results would be lost if the later
    /// [`persist`](Self::persist) failed.
    pub fn ensure_writable(&self) -> Result<()> {
        let path = &self.store_path;
        self.create_parent()?;
        let tmp = temporary_path(path);
        File::create(&tmp).map_err(|e| TrackError::cache_io(path, e))?;
        fs::remove_file(&tmp).map_err(|e| TrackError::cache_io(path, e))?;
        debug!("[Corpus] {} is writable", path.display());
        Ok(())
    }

    fn create_parent(&self) -> Result<()> {
        let path = &self.store_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TrackError::cache_io(path, e))?;
        }
        Ok(())
    }

    /// Write the corpus if anything was merged since the last load or persist.
    ///
    /// Returns whether a write happened. The store is replaced atomically.
    pub fn persist(&self, corpus: &mut Corpus) -> Result<bool> {
        if corpus.unsaved == 0 {
            debug!("[Corpus] nothing new, not writing {}", self.store_path.display());
            return Ok(false);
        }

        let path = &self.store_path;
        self.create_parent()?;

        let tmp = temporary_path(path);
        let written = write_store(&tmp, corpus).and_then(|()| fs::rename(&tmp, path));
        if let Err(e) = written {
            fs::remove_file(&tmp).ok();
            return Err(TrackError::cache_io(path, e));
        }

        info!(
            "[Corpus] persisted {} records ({} new) to {}",
            corpus.len(),
            corpus.unsaved,
            path.display()
        );
        corpus.unsaved = 0;
        Ok(true)
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn write_store(tmp: &Path, corpus: &Corpus) -> std::io::Result<()> {
    let file = File::create(tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(
        &mut writer,
        &StoreFileRef {
            version: STORE_VERSION,
            corpus,
        },
    )?;
    writer.flush()?;
    writer.get_ref().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpsPoint, ROUTE_POINTS};
    use chrono::{DateTime, NaiveDate};
    use geo::Coord;

    fn record(id: &str, month: u32, keywords: &str) -> TrackRecord {
        TrackRecord {
            id: id.to_string(),
            name: None,
            distance_meters: 12_345.6,
            duration_minutes: 42.5,
            uphill_meters: 120.0,
            downhill_meters: 118.0,
            start_location: GpsPoint::with_elevation(47.37, 8.54, 410.0),
            end_location: GpsPoint::with_elevation(47.40, 8.60, 430.0),
            timezone: "Europe/Zurich".to_string(),
            start_date_time: DateTime::parse_from_rfc3339("2023-06-01T17:00:00+02:00").unwrap(),
            date: NaiveDate::from_ymd_opt(2023, month, 1).unwrap(),
            time_of_day: 17.0,
            month,
            weekday: Weekday::Thursday,
            season: Season::from_month(month),
            crow_distance_meters: 5_000.0,
            speed_kmh: 17.4,
            crow_speed_kmh: 7.1,
            keywords: keywords.to_string(),
            weather: Default::default(),
            normalized_route: vec![Coord { x: 8.54, y: 47.37 }; ROUTE_POINTS],
        }
    }

    #[test]
    fn test_merge_first_write_wins() {
        let corpus = Corpus::new().merge_new(vec![record("a.gpx", 6, "commute")]);
        let mut replacement = record("a.gpx", 6, "commute");
        replacement.distance_meters = 1.0;
        let corpus = corpus.merge_new(vec![replacement, record("b.gpx", 7, "")]);

        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get("a.gpx").unwrap().distance_meters, 12_345.6);
        assert_eq!(corpus.unsaved_count(), 2);
    }

    #[test]
    fn test_domains_grow_across_merges() {
        let corpus = Corpus::new().merge_new(vec![record("a.gpx", 1, "commute")]);
        let before = corpus.domains().clone();
        let corpus = corpus.merge_new(vec![record("b.gpx", 7, "race")]);

        assert!(corpus.domains().contains_all(&before));
        assert_eq!(corpus.domains().months, BTreeSet::from([1, 7]));
        assert_eq!(
            corpus.domains().seasons,
            BTreeSet::from([Season::Winter, Season::Summer])
        );
        assert!(corpus.domains().keywords.contains("race"));
    }

    #[test]
    fn test_persist_without_changes_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CorpusCache::new(dir.path().join("corpus.json"));
        let mut corpus = Corpus::new();
        assert!(!cache.persist(&mut corpus).unwrap());
        assert!(!cache.store_path().exists());
    }

    #[test]
    fn test_persist_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CorpusCache::new(dir.path().join("nested").join("corpus.json"));
        let mut corpus = Corpus::new().merge_new(vec![record("a.gpx", 3, "")]);

        assert!(cache.persist(&mut corpus).unwrap());
        assert_eq!(corpus.unsaved_count(), 0);
        assert!(!cache.persist(&mut corpus).unwrap());

        let names: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("corpus.json")]);
    }

    #[test]
    fn test_store_below_regular_file_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("sessions");
        fs::write(&blocker, "").unwrap();
        let cache = CorpusCache::new(blocker.join("s1").join("corpus.json"));

        assert!(matches!(cache.load(), Err(TrackError::CacheIo { .. })));
        assert!(matches!(
            cache.ensure_writable(),
            Err(TrackError::CacheIo { .. })
        ));
    }

    #[test]
    fn test_ensure_writable_creates_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CorpusCache::new(dir.path().join("s1").join("corpus.json"));
        cache.ensure_writable().unwrap();

        assert!(dir.path().join("s1").is_dir());
        assert_eq!(fs::read_dir(dir.path().join("s1")).unwrap().count(), 0);
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_version_is_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        fs::write(&path, r#"{"version": 99, "corpus": {}}"#).unwrap();
        assert!(matches!(
            CorpusCache::new(&path).load(),
            Err(TrackError::CacheIo { .. })
        ));
    }
}
