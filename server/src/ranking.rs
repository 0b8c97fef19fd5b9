//! Authoritative score store and cached country ranking.
//!
//! Aggregation workers append competitor records here in insertion order;
//! they never sort. Reduction to per-country totals happens on demand in
//! [`RankingEngine::request_ranking`], which serves a cached payload while it
//! is younger than `delta_t` milliseconds and otherwise recomputes once for
//! all concurrent callers (single-flight): every waiter registered while a
//! recompute is in flight resolves with the same freshly rendered payload.
//!
//! Locking: the ranking state and the waiter list are two independent lock
//! domains; neither is held while the other is taken, and neither is held
//! across an await point.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, error, warn};
use shared::{ranking_entry, Competitor};
use tokio::sync::oneshot;

use crate::error::ServerError;

/// Rendered ranking payload with the monotonic instant it was computed.
struct RankingCache {
    timestamp: Instant,
    payload: String,
}

struct RankingState {
    /// Append-only store of every accepted record, in insertion order.
    records: Vec<Competitor>,
    /// Per-country totals, rebuilt from `records` on each recompute.
    country_scores: HashMap<i32, i32>,
    cache: Option<RankingCache>,
}

struct Pending {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<String>>,
}

/// Consistent snapshot used by the finalizer.
///
/// Both fields derive from the same lock acquisition, so the per-country
/// totals always equal the column sums of the competitor rows.
pub struct FinalSnapshot {
    /// All records, sorted score-descending.
    pub competitors: Vec<Competitor>,
    /// Per-country totals, unordered.
    pub totals: Vec<(i32, i32)>,
}

/// Country ranking engine with a time-windowed cache.
pub struct RankingEngine {
    delta_t_ms: i64,
    state: Mutex<RankingState>,
    pending: Mutex<Pending>,
    computes: AtomicU64,
}

impl RankingEngine {
    /// Creates an engine whose cache stays valid for `delta_t_ms`
    /// milliseconds. A window of zero or less forces a recompute on every
    /// request.
    pub fn new(delta_t_ms: i64) -> Self {
        Self {
            delta_t_ms,
            state: Mutex::new(RankingState {
                records: Vec::new(),
                country_scores: HashMap::new(),
                cache: None,
            }),
            pending: Mutex::new(Pending {
                in_flight: false,
                waiters: Vec::new(),
            }),
            computes: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RankingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends one accepted record to the authoritative store.
    pub fn append(&self, competitor: Competitor) {
        self.lock_state().records.push(competitor);
    }

    /// Number of records ingested so far.
    pub fn record_count(&self) -> usize {
        self.lock_state().records.len()
    }

    /// How many recomputes have run. Diagnostic only.
    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::SeqCst)
    }

    /// Returns the country ranking payload, score-descending.
    ///
    /// Serves the cache while it is fresh. On a stale cache the caller joins
    /// the waiter list; the first waiter in spawns the recompute task, and
    /// every waiter resolves with the same payload once it lands.
    pub async fn request_ranking(self: Arc<Self>) -> Result<String, ServerError> {
        if let Some(payload) = self.cached() {
            return Ok(payload);
        }

        let (tx, rx) = oneshot::channel();
        let spawn_compute = {
            let mut pending = self.lock_pending();
            pending.waiters.push(tx);
            !std::mem::replace(&mut pending.in_flight, true)
        };

        if spawn_compute {
            let engine = Arc::clone(&self);
            tokio::spawn(async move { engine.recompute() });
        }

        rx.await.map_err(|_| ServerError::RankingAborted)
    }

    fn cached(&self) -> Option<String> {
        let state = self.lock_state();
        state
            .cache
            .as_ref()
            .filter(|cache| (cache.timestamp.elapsed().as_millis() as i64) < self.delta_t_ms)
            .map(|cache| cache.payload.clone())
    }

    /// Rebuilds the country totals, renders the payload, refreshes the cache,
    /// and resolves every registered waiter.
    ///
    /// The in-flight flag is cleared and the waiter list drained even when
    /// the computation panics, so one failed recompute breaks only the
    /// promises registered for it; the next request starts a fresh one.
    fn recompute(&self) {
        let result = catch_unwind(AssertUnwindSafe(|| self.render_ranking()));

        let waiters = {
            let mut pending = self.lock_pending();
            pending.in_flight = false;
            std::mem::take(&mut pending.waiters)
        };

        match result {
            Ok(payload) => {
                self.computes.fetch_add(1, Ordering::SeqCst);
                debug!("ranking recomputed for {} waiter(s)", waiters.len());
                for waiter in waiters {
                    // A receiver may be gone if its client disappeared
                    // mid-request.
                    let _ = waiter.send(payload.clone());
                }
            }
            Err(_) => {
                // Dropping the senders breaks every pending promise.
                error!(
                    "ranking recompute failed; breaking {} pending waiter(s)",
                    waiters.len()
                );
            }
        }
    }

    fn render_ranking(&self) -> String {
        let mut state = self.lock_state();
        let state = &mut *state;
        state.country_scores.clear();
        for competitor in &state.records {
            *state.country_scores.entry(competitor.country_id).or_insert(0) +=
                competitor.score;
        }

        let mut totals: Vec<(i32, i32)> =
            state.country_scores.iter().map(|(&c, &s)| (c, s)).collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1));

        let mut payload = String::new();
        for (country_id, total) in totals {
            payload.push_str(&ranking_entry(country_id, total));
        }

        state.cache = Some(RankingCache {
            timestamp: Instant::now(),
            payload: payload.clone(),
        });
        payload
    }

    /// Breaks any pending waiters. Called once during server shutdown.
    pub fn abandon_pending(&self) {
        let mut pending = self.lock_pending();
        if !pending.waiters.is_empty() {
            warn!("abandoning {} pending ranking waiter(s)", pending.waiters.len());
        }
        pending.in_flight = false;
        pending.waiters.clear();
    }

    /// Takes a consistent snapshot for finalization.
    ///
    /// The competitor list is a sorted copy; the store itself stays in
    /// insertion order. Totals are recomputed from the same records under
    /// the same lock acquisition.
    pub fn final_snapshot(&self) -> FinalSnapshot {
        let mut state = self.lock_state();
        Self::build_snapshot(&mut state)
    }

    /// Runs `f` against a fresh snapshot while still holding the ranking
    /// lock.
    ///
    /// Finalization keeps the lock across writing and re-reading the dump
    /// files so concurrent finalization requests serialize and each response
    /// matches exactly the files it wrote. `f` must not block on anything
    /// that needs the ranking lock.
    pub fn with_final_snapshot<T>(&self, f: impl FnOnce(&FinalSnapshot) -> T) -> T {
        let mut state = self.lock_state();
        let snapshot = Self::build_snapshot(&mut state);
        f(&snapshot)
    }

    fn build_snapshot(state: &mut RankingState) -> FinalSnapshot {
        let mut competitors = state.records.clone();
        competitors.sort_by(|a, b| b.score.cmp(&a.score));

        state.country_scores.clear();
        for competitor in &state.records {
            *state.country_scores.entry(competitor.country_id).or_insert(0) +=
                competitor.score;
        }
        let totals = state.country_scores.iter().map(|(&c, &s)| (c, s)).collect();

        FinalSnapshot { competitors, totals }
    }
}
