//! # Shared Competition Library
//!
//! This module contains the data structures, constants, and line codec used by
//! both the competition client and server. It is the single definition of the
//! wire protocol and keeps the two sides of the distributed system consistent.
//!
//! ## Core Components
//!
//! ### Protocol Constants
//! Network and pacing parameters shared across the system:
//! - **Transport**: default server port, per-interaction client deadline
//! - **Ingestion**: batch size, queue capacity, back-pressure timeouts
//! - **Persisted files**: event log and final dump file names
//!
//! ### Wire Protocol
//! The protocol is ASCII and line-framed by `\n`. The first line of a session
//! is the handshake (`<country_id>`); every subsequent client line is one of:
//! - `<competitor_id>,<score>`: a single competitor record
//! - `REQUEST_RANKING`: ask for the current country ranking
//! - `FINAL_REQUEST`: ask for the finalized dump and end the session
//!
//! Server responses are also ASCII: the ranking payload is a sequence of
//! `<country_id>,<score>` lines, and the final dump is the competitor file
//! body, a blank line, then the country file body.
//!
//! ### Data Model
//! [`Competitor`] is the unit of ingestion: one `(country, competitor, score)`
//! tuple. Scores are additive per country and duplicates are permitted.
//!
//! ## Design Notes
//!
//! Parsing is strict about the message literals and lenient about surrounding
//! whitespace, mirroring what real clients produce. A record line that does
//! not match `<int>,<int>` is reported as [`ProtocolError::MalformedRecord`]
//! so the caller can drop it and keep the session alive.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default TCP port the competition server listens on.
pub const DEFAULT_PORT: u16 = 12345;

/// Number of competitor records a client sends per batch.
pub const BATCH_SIZE: usize = 20;

/// Capacity of the server-side ingestion queue.
pub const QUEUE_CAPACITY: usize = 10_000;

/// How long a producer blocks for queue space before dropping a record.
pub const PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// How long a consumer blocks waiting for a record before re-checking
/// for shutdown.
pub const POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Client-side deadline applied to each interaction with the server.
pub const CLIENT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Literal a client sends to request the current country ranking.
pub const REQUEST_RANKING: &str = "REQUEST_RANKING";

/// Literal a client sends to request the finalized dump.
pub const FINAL_REQUEST: &str = "FINAL_REQUEST";

/// Name of the append-only server event log.
pub const SERVER_LOG_FILE: &str = "server_log.txt";

/// Name of the finalized competitor dump, score-descending.
pub const FINAL_COMPETITORS_FILE: &str = "final_competitors.txt";

/// Name of the finalized per-country totals dump.
pub const FINAL_COUNTRIES_FILE: &str = "final_countries.txt";

/// One competitor record as ingested by the server.
///
/// Immutable once parsed. The server's authoritative store is an append-only
/// sequence of these; country totals are always recomputed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Competitor {
    /// Country the connection that produced this record is bound to.
    pub country_id: i32,
    /// Competitor identifier within the country's roster.
    pub competitor_id: i32,
    /// Score contribution; additive per country.
    pub score: i32,
}

impl Competitor {
    /// Renders the record as a finalized dump row.
    pub fn csv_row(&self) -> String {
        format!("{},{},{}\n", self.country_id, self.competitor_id, self.score)
    }
}

impl fmt::Display for Competitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.country_id, self.competitor_id, self.score
        )
    }
}

/// A parsed client line, after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// One competitor record from a batch line.
    Record {
        /// Competitor identifier.
        competitor_id: i32,
        /// Score contribution.
        score: i32,
    },
    /// Request for the current country ranking.
    RankingRequest,
    /// Request for the finalized dump; ends the session.
    FinalRequest,
}

/// Errors produced by the line codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The first line of a session was not a plain integer.
    #[error("invalid handshake line: {0:?}")]
    InvalidHandshake(String),
    /// A batch line did not match the `<int>,<int>` record shape.
    #[error("malformed record line: {0:?}")]
    MalformedRecord(String),
}

/// Parses the handshake line into a country id.
///
/// The handshake is the first line of every session and binds the connection
/// to a country for its lifetime. Surrounding whitespace is tolerated.
pub fn parse_handshake(line: &str) -> Result<i32, ProtocolError> {
    line.trim()
        .parse::<i32>()
        .map_err(|_| ProtocolError::InvalidHandshake(line.to_string()))
}

/// Parses one post-handshake line into a [`ClientMessage`].
///
/// The two control literals are matched exactly after trimming; every other
/// line is treated as a record and must match `<int>,<int>`.
pub fn parse_message(line: &str) -> Result<ClientMessage, ProtocolError> {
    let trimmed = line.trim();
    match trimmed {
        REQUEST_RANKING => Ok(ClientMessage::RankingRequest),
        FINAL_REQUEST => Ok(ClientMessage::FinalRequest),
        _ => parse_record(trimmed),
    }
}

fn parse_record(line: &str) -> Result<ClientMessage, ProtocolError> {
    let malformed = || ProtocolError::MalformedRecord(line.to_string());
    let (id, score) = line.split_once(',').ok_or_else(|| malformed())?;
    let competitor_id = id.trim().parse::<i32>().map_err(|_| malformed())?;
    let score = score.trim().parse::<i32>().map_err(|_| malformed())?;
    Ok(ClientMessage::Record {
        competitor_id,
        score,
    })
}

/// Renders one country ranking entry.
pub fn ranking_entry(country_id: i32, total_score: i32) -> String {
    format!("{},{}\n", country_id, total_score)
}
