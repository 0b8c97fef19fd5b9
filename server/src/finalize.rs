//! Finalized competition dumps.
//!
//! Triggered by `FINAL_REQUEST`: takes one consistent snapshot of the score
//! store, rewrites the two flat dump files, and returns the concatenated
//! payload (competitor body, blank line, country body) for the requesting
//! connection. The whole sequence, including reading the files back, runs
//! under the ranking lock so concurrent finalization requests serialize and
//! a client receives exactly what its own request persisted.

use std::fs;
use std::io;
use std::path::Path;

use shared::{ranking_entry, FINAL_COMPETITORS_FILE, FINAL_COUNTRIES_FILE};

use crate::ranking::RankingEngine;

/// Writes `final_competitors.txt` and `final_countries.txt` under `out_dir`
/// and returns the combined dump payload.
///
/// The competitor file is score-descending; the country file is an unordered
/// set of per-country totals. Both files are rewritten on every call, and
/// the ranking lock is held until both have been read back: two connections
/// finalizing at once must not interleave their writes to the shared paths.
/// A filesystem error aborts the request; the caller logs it and shuts the
/// connection, and the server keeps running.
pub fn write_final_results(engine: &RankingEngine, out_dir: &Path) -> io::Result<String> {
    engine.with_final_snapshot(|snapshot| {
        let mut competitor_body = String::new();
        for competitor in &snapshot.competitors {
            competitor_body.push_str(&competitor.csv_row());
        }

        let mut country_body = String::new();
        for (country_id, total) in &snapshot.totals {
            country_body.push_str(&ranking_entry(*country_id, *total));
        }

        let competitors_path = out_dir.join(FINAL_COMPETITORS_FILE);
        let countries_path = out_dir.join(FINAL_COUNTRIES_FILE);
        fs::write(&competitors_path, &competitor_body)?;
        fs::write(&countries_path, &country_body)?;

        let competitor_data = fs::read_to_string(&competitors_path)?;
        let country_data = fs::read_to_string(&countries_path)?;
        Ok(format!("{competitor_data}\n{country_data}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Competitor;

    fn engine_with(records: &[(i32, i32, i32)]) -> RankingEngine {
        let engine = RankingEngine::new(0);
        for &(country_id, competitor_id, score) in records {
            engine.append(Competitor {
                country_id,
                competitor_id,
                score,
            });
        }
        engine
    }

    #[test]
    fn test_dump_files_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&[(9, 100, 1), (9, 101, 3), (9, 101, 3)]);

        let payload = write_final_results(&engine, dir.path()).unwrap();

        let competitors =
            fs::read_to_string(dir.path().join(FINAL_COMPETITORS_FILE)).unwrap();
        assert_eq!(competitors, "9,101,3\n9,101,3\n9,100,1\n");

        let countries = fs::read_to_string(dir.path().join(FINAL_COUNTRIES_FILE)).unwrap();
        assert_eq!(countries, "9,7\n");

        assert_eq!(payload, format!("{competitors}\n{countries}"));
    }

    #[test]
    fn test_competitor_rows_non_increasing_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&[(1, 1, 5), (2, 2, 40), (1, 3, 12), (3, 4, 40)]);

        write_final_results(&engine, dir.path()).unwrap();

        let competitors =
            fs::read_to_string(dir.path().join(FINAL_COMPETITORS_FILE)).unwrap();
        let scores: Vec<i32> = competitors
            .lines()
            .map(|l| l.rsplit(',').next().unwrap().parse().unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_country_totals_conserve_competitor_scores() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&[(1, 1, 10), (1, 2, 15), (2, 3, 7), (2, 4, -2)]);

        write_final_results(&engine, dir.path()).unwrap();

        let countries = fs::read_to_string(dir.path().join(FINAL_COUNTRIES_FILE)).unwrap();
        let mut totals: Vec<(i32, i32)> = countries
            .lines()
            .map(|l| {
                let (c, s) = l.split_once(',').unwrap();
                (c.parse().unwrap(), s.parse().unwrap())
            })
            .collect();
        totals.sort();
        assert_eq!(totals, vec![(1, 25), (2, 5)]);
    }

    #[test]
    fn test_files_rewritten_on_each_request() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(&[(5, 1, 1)]);

        write_final_results(&engine, dir.path()).unwrap();
        engine.append(Competitor {
            country_id: 5,
            competitor_id: 2,
            score: 9,
        });
        write_final_results(&engine, dir.path()).unwrap();

        let competitors =
            fs::read_to_string(dir.path().join(FINAL_COMPETITORS_FILE)).unwrap();
        assert_eq!(competitors, "5,2,9\n5,1,1\n");
    }

    #[test]
    fn test_missing_output_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_subdir");
        let engine = engine_with(&[(1, 1, 1)]);

        assert!(write_final_results(&engine, &missing).is_err());
    }

    /// Concurrent finalizations serialize on the ranking lock: every caller
    /// reads back the files its own snapshot wrote, so each payload is
    /// internally consistent even while records keep arriving.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_finalizations_stay_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = std::sync::Arc::new(engine_with(&[(1, 1, 5)]));

        let mut tasks = Vec::new();
        for round in 0..8 {
            let engine = std::sync::Arc::clone(&engine);
            let out_dir = dir.path().to_path_buf();
            tasks.push(tokio::spawn(async move {
                engine.append(Competitor {
                    country_id: 1,
                    competitor_id: 100 + round,
                    score: round,
                });
                write_final_results(&engine, &out_dir).unwrap()
            }));
        }

        for task in tasks {
            let payload = task.await.unwrap();
            let (rows, totals) = payload.split_once("\n\n").unwrap();
            let row_sum: i32 = rows
                .lines()
                .map(|l| l.rsplit(',').next().unwrap().parse::<i32>().unwrap())
                .sum();
            let total_sum: i32 = totals
                .lines()
                .map(|l| l.rsplit(',').next().unwrap().parse::<i32>().unwrap())
                .sum();
            assert_eq!(row_sum, total_sum);
        }
    }
}
