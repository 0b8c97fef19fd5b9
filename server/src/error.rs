use std::io;

use thiserror::Error;

/// Server-side error kinds.
///
/// Per-connection errors never kill the server; they are logged at the
/// session boundary and the offending connection is shut down.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Transport or filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// A ranking recompute was abandoned before resolving its waiters,
    /// which only happens during shutdown.
    #[error("ranking computation aborted")]
    RankingAborted,
}
