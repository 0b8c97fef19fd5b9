//! # Competition Client Library
//!
//! The client side of the networked competition aggregator. Each client
//! process represents one country: it loads a competitor roster from a local
//! file, streams it to the server in paced batches, then consumes the
//! intermediate ranking and the finalized dump.
//!
//! ## Module Organization
//!
//! - [`roster`]: loads the whitespace-separated `<id> <score>` input file
//! - [`network`]: the TCP driver with per-interaction deadlines
//! - [`error`]: client error kinds
//!
//! Every interaction with the server runs under a fixed deadline; a missed
//! deadline or transport error aborts the run, and the binary exits non-zero.

pub mod error;
pub mod network;
pub mod roster;
