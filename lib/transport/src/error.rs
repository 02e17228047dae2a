use space::LocationId;
use thiserror::Error as ThisError;

/// Convenient alias, which defaults to [`Error`] as [`Err`]-variant.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error variants returned by transports.
///
/// Only conditions a caller can meaningfully observe become errors;
/// violations of internal invariants and configuration errors panic, since
/// the executing thread has no useful recovery.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is disconnected")]
    Disconnected(LocationId),

    #[error("operation not supported by transport '{0}'")]
    Unsupported(&'static str),

    #[error("cannot resolve address {0}")]
    Address(String),
}
