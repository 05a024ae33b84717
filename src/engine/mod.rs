//! # Ingestion Engine
//!
//! Background ingestion of track files into per-session corpora.
//!
//! ## Architecture
//!
//! - `CorpusCache` - Durable per-session corpus with first-write-wins merging
//! - `IngestionCoordinator` - Single-flight batch launcher keyed by session
//! - `IngestionHandle` - Polling view of one batch (status, remaining, report)
//!
//! A batch only parses files whose id is not yet in the session's corpus, so
//! re-ingesting a folder never reparses a known track.

pub mod batch;
pub mod corpus_cache;
pub mod progress;

pub use batch::list_track_files;
pub use corpus_cache::{CategoryDomains, Corpus, CorpusCache, STORE_VERSION};
pub use progress::{BatchProgress, BatchReport, CancellationToken, IngestionHandle, IngestionStatus};

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;

use log::{error, info};

use crate::IngestConfig;
use crate::error::{Result, TrackError};
use crate::parser::TrackParser;
use batch::{BatchJob, run_batch};

/// Result of asking for a new batch.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// A new batch was launched.
    Started(IngestionHandle),
    /// A batch for this session is still running; nothing was launched.
    Busy(IngestionHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &IngestionHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::Busy(handle) => handle,
        }
    }

    pub fn into_handle(self) -> IngestionHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::Busy(handle) => handle,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StartOutcome::Busy(_))
    }
}

type SessionSlot = Arc<Mutex<Option<IngestionHandle>>>;

/// Launches ingestion batches, at most one running batch per session.
pub struct IngestionCoordinator {
    config: IngestConfig,
    parser: TrackParser,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl IngestionCoordinator {
    /// Create a coordinator. Lookups made by `parser` are bounded by the
    /// configured timeout.
    pub fn new(config: IngestConfig, parser: TrackParser) -> Self {
        let parser = parser.with_lookup_timeout(config.lookup_timeout());
        Self {
            config,
            parser,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Start a batch over `folder`, unless one is already running for the session.
    ///
    /// Only files whose name ends with `suffix_filter` and that are not yet in
    /// the corpus are parsed; an empty `suffix_filter` means
    /// [`IngestConfig::suffix_filter`]. With `delete_on_success`, each file is
    /// removed right after its own successful parse.
    ///
    /// # Errors
    /// - [`TrackError::InvalidSessionKey`] for an unusable key
    /// - [`TrackError::InsufficientInput`] when fewer than
    ///   [`IngestConfig::min_batch_files`] files match
    /// - [`TrackError::CacheIo`] when the existing store cannot be read or the
    ///   session directory cannot be written
    pub fn start_ingestion(
        &self,
        session_key: &str,
        folder: impl AsRef<Path>,
        suffix_filter: &str,
        delete_on_success: bool,
    ) -> Result<StartOutcome> {
        validate_session_key(session_key)?;
        let folder = folder.as_ref();

        let slot = self.slot(session_key);
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = current.as_ref()
            && !handle.status().is_finished()
        {
            info!("[Ingest] {}: batch already running", session_key);
            return Ok(StartOutcome::Busy(handle.clone()));
        }

        let suffix_filter = if suffix_filter.is_empty() {
            self.config.suffix_filter.as_str()
        } else {
            suffix_filter
        };
        let files = list_track_files(folder, suffix_filter)?;
        if files.len() < self.config.min_batch_files {
            return Err(TrackError::InsufficientInput {
                found: files.len(),
                minimum_required: self.config.min_batch_files,
            });
        }

        let cache = CorpusCache::new(self.config.store_path(session_key));
        let corpus = cache.load()?;
        // source files may be deleted as soon as they parse
        cache.ensure_writable()?;
        let (known, to_parse): (Vec<PathBuf>, Vec<PathBuf>) = files.into_iter().partition(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|id| corpus.contains(id))
        });

        let progress = Arc::new(BatchProgress::new(to_parse));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel();
        let handle = IngestionHandle::new(session_key, Arc::clone(&progress), cancel.clone(), rx);

        let job = BatchJob {
            session_key: session_key.to_string(),
            parser: self.parser.clone(),
            cache,
            corpus,
            enrich_with_weather: self.config.enrich_with_weather,
            delete_on_success,
            already_known: known.len(),
        };

        let key = session_key.to_string();
        thread::Builder::new()
            .name(format!("ingest-{session_key}"))
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| run_batch(job, &progress, &cancel)));
                match outcome {
                    // handle may have been dropped
                    Ok(report) => {
                        let _ = tx.send(report);
                    }
                    Err(_) => {
                        progress.set_status(IngestionStatus::Failed);
                        error!("[Ingest] {}: batch panicked", key);
                    }
                }
            })
            .map_err(|e| TrackError::io(folder, e))?;

        *current = Some(handle.clone());
        Ok(StartOutcome::Started(handle))
    }

    /// Load the persisted corpus of a session.
    pub fn load(&self, session_key: &str) -> Result<Corpus> {
        validate_session_key(session_key)?;
        CorpusCache::new(self.config.store_path(session_key)).load()
    }

    /// Handle of the most recent batch of a session, if any.
    pub fn handle(&self, session_key: &str) -> Option<IngestionHandle> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = sessions.get(session_key)?;
        let handle = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        handle
    }

    /// Status of the most recent batch of a session, if any.
    pub fn status(&self, session_key: &str) -> Option<IngestionStatus> {
        self.handle(session_key).map(|handle| handle.status())
    }

    fn slot(&self, session_key: &str) -> SessionSlot {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(session_key.to_string()).or_default())
    }
}

impl std::fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.lock().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("IngestionCoordinator")
            .field("config", &self.config)
            .field("sessions", &sessions)
            .finish()
    }
}

/// A session key names a single directory below the sessions root.
fn validate_session_key(session_key: &str) -> Result<()> {
    let valid = !session_key.is_empty()
        && session_key != "."
        && session_key != ".."
        && !session_key.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(TrackError::InvalidSessionKey(session_key.to_string()))
    }
}
