//! Error kinds surfaced by grouping and extraction.
//!
//! Grouping errors abort a whole directory scan. Extraction errors abort only
//! the group being extracted, so a caller driving several groups can keep going
//! and report a final failure count.

use std::io;
use std::path::PathBuf;

/// Everything that can go wrong while classifying, grouping or extracting.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("not a supported archive: {0}")]
    NotAnArchive(PathBuf),

    #[error(
        "ambiguous filename encoding in {archive}: could be any of {}; pass an explicit encoding",
        candidates.join(", ")
    )]
    AmbiguousEncoding {
        archive: PathBuf,
        candidates: Vec<String>,
    },

    #[error("filename encoding of {0} is indeterminate (not a CJK charset); pass an explicit encoding")]
    UnknownEncoding(PathBuf),

    #[error("unsupported encoding '{label}' for {archive}")]
    UnsupportedEncoding { archive: PathBuf, label: String },

    #[error("entry name in {archive} cannot be decoded as {encoding}: {raw}")]
    UndecodableName {
        archive: PathBuf,
        encoding: String,
        raw: String,
    },

    #[error("two entries in {archive} normalize to the same path: {path}")]
    DuplicateEntryName { archive: PathBuf, path: PathBuf },

    #[error("failed to decrypt {archive} after trying {attempts} password(s): {last_error}")]
    DecryptionFailed {
        archive: PathBuf,
        attempts: usize,
        last_error: String,
    },

    #[error("destination already exists: {0}")]
    DestinationCollision(PathBuf),

    #[error("external extractor {binary} failed on {archive}: {output}")]
    ExternalToolFailure {
        binary: PathBuf,
        archive: PathBuf,
        output: String,
    },

    #[error("failed to decode {archive}: {reason}")]
    Decode { archive: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl ExtractError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the failure means "already extracted" rather than a broken archive.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::DestinationCollision(_))
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Attach a path to bare `io::Result`s.
pub(crate) trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| ExtractError::io(path, e))
    }
}
