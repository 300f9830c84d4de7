//! Error kinds surfaced by the export core.
//!
//! Per-submission failures ([`SubmissionError`]) are recovered locally by
//! skipping the submission; per-form failures ([`ExportError`]) abort the
//! whole export and propagate to the caller.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal, per-form failures.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Failures of the decryption and validation machinery.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    Key(String),

    #[error("failed to decrypt {}: {reason}", path.display())]
    DecryptionFailed { path: PathBuf, reason: String },

    #[error("missing expected media file {}", path.display())]
    MissingMedia { path: PathBuf },

    #[error("signature digest does not match for instance {instance}")]
    SignatureMismatch { instance: String },
}

/// Per-submission failures; each one skips a single submission.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("i/o failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
