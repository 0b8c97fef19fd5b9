//! Competitor roster loading.
//!
//! The input file is whitespace-separated `<id> <score>` pairs, in any line
//! layout. A dangling id or a non-integer token is a hard error: a client
//! with a broken roster should fail fast rather than stream a partial
//! country.

use std::fs;
use std::path::Path;

use crate::error::ClientError;

/// Loads `<id> <score>` pairs from the given file.
pub fn load_roster(path: &Path) -> Result<Vec<(i32, i32)>, ClientError> {
    let contents = fs::read_to_string(path)?;
    let mut tokens = contents.split_whitespace();
    let mut roster = Vec::new();

    while let Some(id) = tokens.next() {
        let score = tokens
            .next()
            .ok_or_else(|| ClientError::Roster(format!("dangling competitor id {id:?}")))?;
        let id: i32 = id
            .parse()
            .map_err(|_| ClientError::Roster(id.to_string()))?;
        let score: i32 = score
            .parse()
            .map_err(|_| ClientError::Roster(score.to_string()))?;
        roster.push((id, score));
    }

    Ok(roster)
}
