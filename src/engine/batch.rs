//! One ingestion batch: parse new files, merge, persist.
//!
//! Per-file failures are contained here. A file that fails to parse is
//! logged, reported and left on disk; the rest of the batch continues.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use super::corpus_cache::{Corpus, CorpusCache};
use super::progress::{BatchProgress, BatchReport, CancellationToken, IngestionStatus};
use crate::TrackRecord;
use crate::error::{Result, TrackError};
use crate::parser::TrackParser;

/// Regular files directly inside `folder` whose name ends with `suffix`, sorted.
pub fn list_track_files(folder: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(folder).map_err(|e| TrackError::io(folder, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TrackError::io(folder, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Everything a worker needs to run a batch.
pub(crate) struct BatchJob {
    pub session_key: String,
    pub parser: TrackParser,
    pub cache: CorpusCache,
    pub corpus: Corpus,
    pub enrich_with_weather: bool,
    pub delete_on_success: bool,
    pub already_known: usize,
}

enum FileOutcome {
    Parsed { record: TrackRecord, deleted: bool },
    Failed { file: String, reason: String },
    Skipped,
}

/// Run a batch to completion and set the final status on `progress`.
pub(crate) fn run_batch(
    job: BatchJob,
    progress: &BatchProgress,
    cancel: &CancellationToken,
) -> BatchReport {
    info!(
        "[Ingest] {}: parsing {} files ({} already known)",
        job.session_key,
        progress.total(),
        job.already_known
    );

    let outcomes = parse_all(&job, progress, cancel);

    let mut report = BatchReport {
        already_known: job.already_known,
        cancelled: cancel.is_cancelled(),
        ..Default::default()
    };
    let mut records = Vec::new();
    for outcome in outcomes {
        match outcome {
            FileOutcome::Parsed { record, deleted } => {
                if deleted {
                    report.deleted.push(record.id.clone());
                }
                report.added.push(record.id.clone());
                records.push(record);
            }
            FileOutcome::Failed { file, reason } => report.failed.push((file, reason)),
            FileOutcome::Skipped => {}
        }
    }

    let BatchJob {
        session_key,
        cache,
        corpus,
        ..
    } = job;
    let mut corpus = corpus.merge_new(records);

    match cache.persist(&mut corpus) {
        Ok(persisted) => {
            report.persisted = persisted;
            progress.set_status(IngestionStatus::Done);
            info!(
                "[Ingest] {}: done, {} added, {} failed{}",
                session_key,
                report.added.len(),
                report.failed.len(),
                if report.cancelled { " (cancelled)" } else { "" }
            );
        }
        Err(e) => {
            progress.set_status(IngestionStatus::Failed);
            error!("[Ingest] {}: {}", session_key, e);
        }
    }
    report
}

#[cfg(feature = "parallel")]
fn parse_all(
    job: &BatchJob,
    progress: &BatchProgress,
    cancel: &CancellationToken,
) -> Vec<FileOutcome> {
    use rayon::prelude::*;

    (0..progress.total())
        .into_par_iter()
        .map(|index| parse_one(job, progress, cancel, index))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn parse_all(
    job: &BatchJob,
    progress: &BatchProgress,
    cancel: &CancellationToken,
) -> Vec<FileOutcome> {
    (0..progress.total())
        .map(|index| parse_one(job, progress, cancel, index))
        .collect()
}

fn parse_one(
    job: &BatchJob,
    progress: &BatchProgress,
    cancel: &CancellationToken,
    index: usize,
) -> FileOutcome {
    if cancel.is_cancelled() {
        return FileOutcome::Skipped;
    }
    let path = progress.file(index);

    match job.parser.parse(path, job.enrich_with_weather) {
        Ok(record) => {
            let deleted = job.delete_on_success && delete_source(path);
            debug!("[Ingest] {}: parsed {}", job.session_key, record.id);
            progress.record_success(index);
            FileOutcome::Parsed { record, deleted }
        }
        Err(e) => {
            warn!("[Ingest] {}: skipping {}: {}", job.session_key, path.display(), e);
            progress.record_failure(index);
            FileOutcome::Failed {
                file: file_name(path),
                reason: e.to_string(),
            }
        }
    }
}

fn delete_source(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("[Ingest] could not delete {}: {}", path.display(), e);
            false
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
