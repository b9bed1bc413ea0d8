//! Crate-wide error taxonomy.
//!
//! Every public boundary in this codebase returns a `FusionResult<T>`. Loops that cross
//! component boundaries (the coordinator, sensor adapters, the fusion tick) convert
//! recoverable variants into a log line plus a metrics counter rather than exiting; only
//! `Fatal` is allowed to unwind a thread's main loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("queue overflow (capacity {capacity} reached)")]
    Overflow { capacity: usize },

    #[error("timed out waiting {0} ms")]
    TimedOut(i64),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("numerical error: {0}")]
    Numerical(String),

    #[error("capacity exceeded: {what} (limit {limit})")]
    Capacity { what: String, limit: usize },

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type FusionResult<T> = Result<T, FusionError>;
