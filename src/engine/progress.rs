//! Progress and handles for background ingestion batches.
//!
//! A [`BatchProgress`] is shared between the worker thread and every
//! [`IngestionHandle`] clone. Polling only reads atomics, so a handle can be
//! polled from any thread, as often as needed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};

/// Lifecycle of an ingestion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestionStatus {
    Running,
    Done,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Running => "running",
            IngestionStatus::Done => "done",
            IngestionStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, IngestionStatus::Running)
    }

    fn to_u8(self) -> u8 {
        match self {
            IngestionStatus::Running => 0,
            IngestionStatus::Done => 1,
            IngestionStatus::Failed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => IngestionStatus::Running,
            1 => IngestionStatus::Done,
            _ => IngestionStatus::Failed,
        }
    }
}

/// Cooperative cancellation flag, checked before each file is parsed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Atomic progress of one batch, written by the worker and read by handles.
#[derive(Debug)]
pub struct BatchProgress {
    files: Vec<PathBuf>,
    attempted: Vec<AtomicBool>,
    status: AtomicU8,
    parsed: AtomicU32,
    failed: AtomicU32,
}

impl BatchProgress {
    /// Track the files a batch is going to parse.
    pub fn new(files: Vec<PathBuf>) -> Self {
        let attempted = files.iter().map(|_| AtomicBool::new(false)).collect();
        Self {
            files,
            attempted,
            status: AtomicU8::new(IngestionStatus::Running.to_u8()),
            parsed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file(&self, index: usize) -> &Path {
        &self.files[index]
    }

    /// Record that a file was parsed successfully.
    pub fn record_success(&self, index: usize) {
        self.parsed.fetch_add(1, Ordering::SeqCst);
        self.attempted[index].store(true, Ordering::SeqCst);
    }

    /// Record that a file failed to parse.
    pub fn record_failure(&self, index: usize) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.attempted[index].store(true, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: IngestionStatus) {
        self.status.store(status.to_u8(), Ordering::SeqCst);
    }

    pub fn status(&self) -> IngestionStatus {
        IngestionStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Files of this batch that are still on disk and not yet attempted.
    pub fn remaining(&self) -> usize {
        self.files
            .iter()
            .zip(&self.attempted)
            .filter(|(path, attempted)| !attempted.load(Ordering::SeqCst) && path.exists())
            .count()
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn parsed(&self) -> u32 {
        self.parsed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// Final outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Ids merged into the corpus by this batch
    pub added: Vec<String>,
    /// `(file name, reason)` of every file that failed to parse
    pub failed: Vec<(String, String)>,
    /// Files removed after a successful parse
    pub deleted: Vec<String>,
    /// Matching files skipped because the corpus already knew them
    pub already_known: usize,
    pub cancelled: bool,
    /// Whether the store was written
    pub persisted: bool,
}

/// Handle to a running or finished batch.
///
/// Cloning is cheap; every clone observes the same batch.
#[derive(Debug, Clone)]
pub struct IngestionHandle {
    session_key: Arc<str>,
    progress: Arc<BatchProgress>,
    cancel: CancellationToken,
    receiver: Arc<Mutex<mpsc::Receiver<BatchReport>>>,
    report: Arc<Mutex<Option<BatchReport>>>,
}

impl IngestionHandle {
    pub(crate) fn new(
        session_key: &str,
        progress: Arc<BatchProgress>,
        cancel: CancellationToken,
        receiver: mpsc::Receiver<BatchReport>,
    ) -> Self {
        Self {
            session_key: Arc::from(session_key),
            progress,
            cancel,
            receiver: Arc::new(Mutex::new(receiver)),
            report: Arc::new(Mutex::new(None)),
        }
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn status(&self) -> IngestionStatus {
        self.progress.status()
    }

    /// Files of this batch not yet processed. Never increases.
    pub fn remaining(&self) -> usize {
        self.progress.remaining()
    }

    /// Files this batch set out to parse.
    pub fn total(&self) -> usize {
        self.progress.total()
    }

    pub fn parsed(&self) -> u32 {
        self.progress.parsed()
    }

    pub fn failed(&self) -> u32 {
        self.progress.failed()
    }

    /// `(total - remaining) / total` as a percentage; 100 for an empty batch.
    pub fn percent_complete(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        let done = total.saturating_sub(self.remaining());
        done as f64 / total as f64 * 100.0
    }

    /// Ask the worker to stop before the next file.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The batch report, if the batch has finished. Non-blocking.
    pub fn report(&self) -> Option<BatchReport> {
        if let Some(report) = self.cached_report() {
            return Some(report);
        }
        // a concurrent `wait` owns the receiver
        match self.receiver.try_lock() {
            Ok(receiver) => self.store_report(receiver.try_recv().ok()),
            Err(_) => None,
        }
    }

    /// Block until the batch finishes and return its report.
    ///
    /// `None` when the worker died without reporting; the status is then `Failed`.
    pub fn wait(&self) -> Option<BatchReport> {
        let receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(report) = self.cached_report() {
            return Some(report);
        }
        let received = receiver.recv().ok();
        self.store_report(received)
    }

    fn cached_report(&self) -> Option<BatchReport> {
        self.report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_report(&self, received: Option<BatchReport>) -> Option<BatchReport> {
        let mut cached = self.report.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.is_none() {
            *cached = received;
        }
        cached.clone()
    }
}
