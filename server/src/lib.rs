//! # Competition Server Library
//!
//! This library implements the server side of the networked competition
//! aggregator. Many clients, each representing a country, stream batches of
//! `(competitor_id, score)` records over TCP; the server ingests them,
//! answers cached ranking queries, and produces the finalized dumps.
//!
//! ## Architecture
//!
//! The data flow is a pipeline:
//!
//! ```text
//! accept → session task (parse lines) → BoundedQueue → aggregation workers
//!                                   ↘ ranking engine (cached, single-flight)
//!                                   ↘ finalizer (flat CSV dumps)
//! ```
//!
//! Socket reading and parsing happen on per-connection session tasks; a
//! bounded, timeout-aware queue decouples them from the aggregation workers
//! that maintain the authoritative score store. Ranking reduction is deferred
//! to the ranking engine, which caches the rendered payload for a configured
//! validity window and coalesces concurrent recomputes into one.
//!
//! ## Module Organization
//!
//! - [`queue`]: bounded FIFO with shutdown, the back-pressure boundary
//! - [`connection`]: per-socket write serialization and the live-connection
//!   registry used for broadcast shutdown
//! - [`ranking`]: append-only score store, country totals, cached ranking
//! - [`finalize`]: finalized competitor/country dump files
//! - [`event_log`]: the persisted, timestamped `server_log.txt` sink
//! - [`network`]: acceptor, session dispatch, workers, shutdown sequencing
//!
//! ## Shared-State Policy
//!
//! The ranking state, the pending-waiter list, the connection registry, and
//! the queue internals are four independent lock domains; none is held while
//! acquiring another. Finalization is the one place a lock is held across
//! file I/O: the ranking lock covers writing and re-reading the dump files
//! so concurrent finalization requests serialize on the shared paths.

pub mod connection;
pub mod error;
pub mod event_log;
pub mod finalize;
pub mod network;
pub mod queue;
pub mod ranking;
