use crate::lens::Kind;
use crate::NAME_MAX_LEN;

/// Errors surfaced by lens construction and registry operations.
///
/// Record-path calls never fail: typed handles rule out kind confusion and
/// recording is a handful of atomic ops. Everything fallible happens at
/// creation, lookup, or close time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Name or prefix exceeds the key bound.
    #[error("name '{0}' is longer than {max} bytes", max = NAME_MAX_LEN - 1)]
    NameTooLong(String),

    /// Name is empty or contains a reserved character (`.` or NUL).
    #[error("name '{0}' is empty or contains a reserved character")]
    NameInvalid(String),

    /// A lens with this name is already registered.
    #[error("lens '{0}' already exists")]
    NameExists(String),

    /// Histogram boundaries must be 2 to 9 strictly increasing finite edges.
    #[error("invalid histogram boundaries: {0}")]
    InvalidBuckets(&'static str),

    /// The target quantile must lie in the open interval (0, 1).
    #[error("target quantile {0} is outside (0, 1)")]
    InvalidQuantile(f64),

    /// The registered lens under this name has a different kind.
    #[error("lens '{name}' is a {actual:?}, not a {expected:?}")]
    TypeMismatch {
        name: String,
        expected: Kind,
        actual: Kind,
    },
}

/// Why a per-lens harvest read yielded nothing this interval.
///
/// `Busy` is not a failure: the sample stream accumulates into the next
/// epoch's record and is picked up by the following poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ReadError {
    /// A recorder holds the record's lock; the poller does not wait.
    #[error("record is locked by a recorder")]
    Busy,
}
