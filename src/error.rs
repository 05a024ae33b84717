//! Unified error handling.
//!
//! Every fallible operation in the crate returns [`Result`]. Per-file errors
//! ([`TrackError::Parse`], [`TrackError::DegenerateRoute`]) are contained by the
//! ingestion batch; store and precondition errors surface to the caller.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors produced while parsing, normalizing, enriching and storing tracks.
#[derive(Debug, Error)]
pub enum TrackError {
    /// Malformed or unreadable track, no points, or no time bounds.
    #[error("failed to parse track {file}: {reason}")]
    Parse { file: String, reason: String },

    /// Too few distinct points or zero length after deduplication.
    #[error("degenerate route: {distinct_points} distinct points, length {length}")]
    DegenerateRoute { distinct_points: usize, length: f64 },

    /// Weather or timezone lookup failed or timed out.
    #[error("{lookup} lookup failed: {reason}")]
    Enrichment { lookup: &'static str, reason: String },

    /// The corpus store exists but cannot be read, or cannot be written.
    #[error("corpus store {}: {reason}", path.display())]
    CacheIo { path: PathBuf, reason: String },

    /// Not enough track files to start a batch.
    #[error("found {found} track files, at least {minimum_required} required")]
    InsufficientInput {
        found: usize,
        minimum_required: usize,
    },

    #[error("invalid session key {0:?}")]
    InvalidSessionKey(String),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TrackError {
    pub fn parse(file: impl Into<String>, reason: impl ToString) -> Self {
        TrackError::Parse {
            file: file.into(),
            reason: reason.to_string(),
        }
    }

    pub fn enrichment(lookup: &'static str, reason: impl ToString) -> Self {
        TrackError::Enrichment {
            lookup,
            reason: reason.to_string(),
        }
    }

    pub fn cache_io(path: &Path, reason: impl ToString) -> Self {
        TrackError::CacheIo {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        TrackError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for errors that only affect a single file of a batch.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            TrackError::Parse { .. } | TrackError::DegenerateRoute { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

/// Conversions from `Option` into typed errors.
pub trait OptionExt<T> {
    fn ok_or_parse(self, file: &str, reason: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, file: &str, reason: &str) -> Result<T> {
        self.ok_or_else(|| TrackError::parse(file, reason))
    }
}
