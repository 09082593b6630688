//! Error taxonomy for the operation-log engine.
//!
//! Mirrors the shape of a hand-rolled domain error type: a flat enum of
//! string-payload variants, a manual `Display`, and `From` conversions at
//! the I/O boundary. No derive-macro error crate is pulled in — callers
//! match on the variant, not on a source chain.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, OpLogError>;

/// The single error taxonomy surfaced to callers of this crate.
#[derive(Debug)]
pub enum OpLogError {
    /// An operation was invoked in a lifecycle state that forbids it:
    /// not open, already open, already stopping, empty save-point stack,
    /// wrong log mode, current-transaction access in thread-spanning mode.
    StateError(String),

    /// A requested `TxId` or nested transaction is not present.
    NotFound(String),

    /// Structural validation of a log file failed.
    Corrupt(String),

    /// A log position is out of range, or a caller passed malformed input.
    InvalidArgument(String),

    /// An I/O error from the backing store, with contextual path information.
    Io { path: Option<PathBuf>, source: io::Error },
}

impl fmt::Display for OpLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateError(msg) => write!(f, "state error: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Corrupt(msg) => write!(f, "corrupt log: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Io { path: Some(path), source } => {
                write!(f, "io error at {}: {source}", path.display())
            }
            Self::Io { path: None, source } => write!(f, "io error: {source}"),
        }
    }
}

impl std::error::Error for OpLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for OpLogError {
    fn from(source: io::Error) -> Self {
        Self::Io { path: None, source }
    }
}

impl OpLogError {
    /// Attaches path context to an I/O error produced while touching `path`.
    #[must_use]
    pub fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: Some(path.into()), source }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::StateError(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_when_present() {
        let err = OpLogError::io_at("/tmp/x.log", io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.to_string().contains("/tmp/x.log"));
    }

    #[test]
    fn io_without_path_still_displays() {
        let err: OpLogError = io::Error::new(io::ErrorKind::NotFound, "missing").into();
        assert!(err.to_string().starts_with("io error:"));
    }
}
