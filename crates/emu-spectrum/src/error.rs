//! Host-visible error types.
//!
//! Guest-visible failures (tape loading errors, bad sector CRCs) never
//! surface here — they become machine state the emulated program sees.
//! These errors cover malformed input files only, and no machine state
//! is mutated before validation succeeds.

use thiserror::Error;

/// Tape image parsing failure.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("invalid {format} data at offset {offset:#x}: {reason}")]
    InvalidFormat {
        format: &'static str,
        offset: usize,
        reason: String,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TapeError {
    pub(crate) fn invalid(
        format: &'static str,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidFormat {
            format,
            offset,
            reason: reason.into(),
        }
    }
}

/// Snapshot parsing failure.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid {format} snapshot at offset {offset:#x}: {reason}")]
    InvalidFormat {
        format: &'static str,
        offset: usize,
        reason: String,
    },
    #[error("unrecognised snapshot: {0}")]
    UnknownFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SnapshotError {
    pub(crate) fn invalid(
        format: &'static str,
        offset: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidFormat {
            format,
            offset,
            reason: reason.into(),
        }
    }
}
