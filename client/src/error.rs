use std::io;
use std::time::Duration;

use thiserror::Error;

/// Client-side error kinds.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport or filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A server interaction did not complete within its deadline.
    #[error("server interaction timed out after {0:?}")]
    Deadline(Duration),
    /// The roster file did not parse as `<id> <score>` pairs.
    #[error("invalid roster entry: {0:?}")]
    Roster(String),
}
