//! Tests for background ingestion

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use common::{file_names, init_logging, two_point_gpx, write_file, write_tracks};
use trackcorpus::{
    FixedTimezone, IngestConfig, IngestionCoordinator, IngestionStatus, Result, StartOutcome,
    TimezoneLookup, TrackError, TrackParser,
};

/// Blocks timezone lookups until opened.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn open(&self) {
        let (open, signal) = &*self.0;
        *open.lock().unwrap() = true;
        signal.notify_all();
    }

    fn pass(&self) {
        let (open, signal) = &*self.0;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = signal.wait(guard).unwrap();
        }
    }
}

struct GatedZone(Gate);

impl TimezoneLookup for GatedZone {
    fn timezone_at(&self, _latitude: f64, _longitude: f64) -> Result<String> {
        self.0.pass();
        Ok("UTC".to_string())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    uploads: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let uploads = root.join("uploads");
        fs::create_dir(&uploads).unwrap();
        Self {
            _dir: dir,
            root,
            uploads,
        }
    }

    fn config(&self) -> IngestConfig {
        IngestConfig {
            sessions_root: self.root.join("sessions"),
            enrich_with_weather: false,
            ..Default::default()
        }
    }

    fn coordinator(&self) -> IngestionCoordinator {
        IngestionCoordinator::new(self.config(), TrackParser::new(Arc::new(FixedTimezone::utc())))
    }

    fn gated_coordinator(&self, gate: &Gate) -> IngestionCoordinator {
        IngestionCoordinator::new(
            self.config(),
            TrackParser::new(Arc::new(GatedZone(gate.clone()))),
        )
    }
}

fn started(outcome: StartOutcome) -> trackcorpus::IngestionHandle {
    match outcome {
        StartOutcome::Started(handle) => handle,
        StartOutcome::Busy(_) => panic!("expected a new batch"),
    }
}

#[test]
fn test_three_files_without_delete() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 3);
    let coordinator = fx.coordinator();

    let handle = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", false)
            .unwrap(),
    );
    let report = handle.wait().unwrap();

    assert_eq!(handle.status(), IngestionStatus::Done);
    assert_eq!(handle.remaining(), 0);
    assert_eq!(handle.percent_complete(), 100.0);
    assert_eq!(report.added.len(), 3);
    assert!(report.failed.is_empty() && report.deleted.is_empty());
    assert!(report.persisted);

    assert_eq!(coordinator.load("s1").unwrap().len(), 3);
    assert_eq!(
        file_names(&fx.uploads),
        vec!["track-0.gpx", "track-1.gpx", "track-2.gpx"]
    );
    assert!(fx.config().store_path("s1").exists());
}

#[test]
fn test_reingest_only_parses_new_file() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 3);
    let coordinator = fx.coordinator();
    let first = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", false)
            .unwrap(),
    );
    first.wait().unwrap();
    let before = coordinator.load("s1").unwrap();

    write_tracks(&fx.uploads, 3, 1);
    let second = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", false)
            .unwrap(),
    );
    let report = second.wait().unwrap();

    assert_eq!(second.total(), 1);
    assert_eq!(report.added, vec!["track-3.gpx".to_string()]);
    assert_eq!(report.already_known, 3);
    assert!(report.deleted.is_empty());

    let after = coordinator.load("s1").unwrap();
    assert_eq!(after.len(), before.len() + 1);
    for record in before.records() {
        assert_eq!(after.get(&record.id), Some(record));
    }
    assert_eq!(file_names(&fx.uploads).len(), 4);
}

#[test]
fn test_delete_on_success_keeps_failed_files() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 3);
    write_file(&fx.uploads, "pingpong.gpx", &two_point_gpx());
    write_file(&fx.uploads, "notes.txt", "not a track");
    let coordinator = fx.coordinator();

    let handle = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", true)
            .unwrap(),
    );
    let report = handle.wait().unwrap();

    assert_eq!(handle.status(), IngestionStatus::Done);
    assert_eq!(handle.remaining(), 0);
    assert_eq!((handle.parsed(), handle.failed()), (3, 1));
    assert_eq!(report.deleted.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "pingpong.gpx");

    let corpus = coordinator.load("s1").unwrap();
    assert_eq!(corpus.len(), 3);
    assert!(!corpus.contains("pingpong.gpx"));
    assert_eq!(file_names(&fx.uploads), vec!["notes.txt", "pingpong.gpx"]);
}

#[test]
fn test_single_file_is_insufficient_input() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 1);
    write_file(&fx.uploads, "other.fit", "binary");
    let coordinator = fx.coordinator();

    let result = coordinator.start_ingestion("s1", &fx.uploads, "gpx", true);
    assert!(matches!(
        result,
        Err(TrackError::InsufficientInput {
            found: 1,
            minimum_required: 2
        })
    ));
    assert!(coordinator.handle("s1").is_none());
    assert!(!fx.config().session_dir("s1").exists());
    assert_eq!(file_names(&fx.uploads).len(), 2);
}

#[test]
fn test_second_start_while_running_is_busy() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 2);
    let gate = Gate::default();
    let coordinator = fx.gated_coordinator(&gate);

    let first = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", false)
            .unwrap(),
    );
    let second = coordinator
        .start_ingestion("s1", &fx.uploads, "gpx", false)
        .unwrap();

    assert!(second.is_busy());
    assert_eq!(second.handle().total(), first.total());
    assert_eq!(first.status(), IngestionStatus::Running);
    assert!(first.report().is_none());

    // other sessions are independent
    let other = coordinator
        .start_ingestion("s2", &fx.uploads, "gpx", false)
        .unwrap();
    assert!(!other.is_busy());

    gate.open();
    assert_eq!(first.wait().unwrap().added.len(), 2);
    assert_eq!(second.handle().wait().unwrap().added.len(), 2);
    other.handle().wait().unwrap();
    assert_eq!(coordinator.status("s1"), Some(IngestionStatus::Done));

    // finished batches no longer block the session
    let third = coordinator
        .start_ingestion("s1", &fx.uploads, "gpx", false)
        .unwrap();
    assert!(!third.is_busy());
    let report = third.handle().wait().unwrap();
    assert_eq!(third.handle().total(), 0);
    assert_eq!(report.already_known, 2);
    assert!(!report.persisted);
}

#[test]
fn test_remaining_never_increases() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 6);
    let gate = Gate::default();
    let coordinator = fx.gated_coordinator(&gate);
    let handle = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", true)
            .unwrap(),
    );

    let poller = {
        let handle = handle.clone();
        thread::spawn(move || {
            let mut seen = vec![handle.remaining()];
            while handle.status() == IngestionStatus::Running {
                seen.push(handle.remaining());
            }
            seen.push(handle.remaining());
            seen
        })
    };
    assert_eq!(handle.remaining(), 6);
    gate.open();

    let seen = poller.join().unwrap();
    assert!(seen.windows(2).all(|w| w[1] <= w[0]), "{seen:?}");
    assert_eq!(seen.last(), Some(&0));
    assert!(file_names(&fx.uploads).is_empty());
}

#[test]
fn test_cancelled_batch_keeps_what_it_parsed() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 8);
    let gate = Gate::default();
    let coordinator = fx.gated_coordinator(&gate);

    let handle = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "gpx", false)
            .unwrap(),
    );
    handle.cancel();
    gate.open();
    let report = handle.wait().unwrap();

    assert!(report.cancelled);
    assert!(handle.is_cancelled());
    assert_eq!(handle.status(), IngestionStatus::Done);
    assert_eq!(handle.parsed() as usize, report.added.len());
    assert_eq!(handle.remaining(), 8 - report.added.len());

    assert_eq!(report.persisted, !report.added.is_empty());
    assert_eq!(coordinator.load("s1").unwrap().len(), report.added.len());
}

#[test]
fn test_unreadable_store_fails_synchronously() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 2);
    let store = fx.config().store_path("s1");
    fs::create_dir_all(store.parent().unwrap()).unwrap();
    fs::write(&store, "garbage").unwrap();

    let result = fx.coordinator().start_ingestion("s1", &fx.uploads, "gpx", true);
    assert!(matches!(result, Err(TrackError::CacheIo { .. })));
    assert_eq!(file_names(&fx.uploads).len(), 2);
}

#[test]
fn test_rejects_bad_session_keys_and_folders() {
    let fx = Fixture::new();
    let coordinator = fx.coordinator();

    assert!(matches!(
        coordinator.start_ingestion("../escape", &fx.uploads, "gpx", false),
        Err(TrackError::InvalidSessionKey(_))
    ));
    assert!(matches!(
        coordinator.load(""),
        Err(TrackError::InvalidSessionKey(_))
    ));
    assert!(matches!(
        coordinator.start_ingestion("s1", Path::new("/definitely/not/here"), "gpx", false),
        Err(TrackError::Io { .. })
    ));
}

#[test]
fn test_config_from_json_fills_defaults() {
    let fx = Fixture::new();
    let path = write_file(
        &fx.root,
        "config.json",
        r#"{ "sessions_root": "/data/sessions", "min_batch_files": 5 }"#,
    );
    let config = IngestConfig::from_json_file(&path).unwrap();

    assert_eq!(config.min_batch_files, 5);
    assert_eq!(config.store_file_name, "corpus.json");
    assert_eq!(
        config.store_path("abc"),
        Path::new("/data/sessions/abc/corpus.json")
    );
}

#[test]
fn test_unusable_session_root_fails_before_touching_files() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 3);
    let blocker = fx.root.join("sessions-file");
    fs::write(&blocker, "").unwrap();
    let config = IngestConfig {
        sessions_root: blocker,
        enrich_with_weather: false,
        ..Default::default()
    };
    let coordinator =
        IngestionCoordinator::new(config, TrackParser::new(Arc::new(FixedTimezone::utc())));

    let result = coordinator.start_ingestion("s1", &fx.uploads, "gpx", true);

    assert!(matches!(result, Err(TrackError::CacheIo { .. })));
    assert!(coordinator.handle("s1").is_none());
    assert_eq!(file_names(&fx.uploads).len(), 3);
    assert!(matches!(
        coordinator.load("s1"),
        Err(TrackError::CacheIo { .. })
    ));
}

#[test]
fn test_empty_suffix_uses_configured_default() {
    let fx = Fixture::new();
    write_tracks(&fx.uploads, 0, 2);
    write_file(&fx.uploads, "notes.txt", "not a track");
    write_file(&fx.uploads, "more-notes.txt", "not a track either");
    let coordinator = fx.coordinator();

    let handle = started(
        coordinator
            .start_ingestion("s1", &fx.uploads, "", false)
            .unwrap(),
    );
    let report = handle.wait().unwrap();

    assert_eq!(handle.total(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(coordinator.load("s1").unwrap().len(), 2);
}
