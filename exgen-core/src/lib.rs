//! Weighted Markov expression generation engine.
//!
//! This crate provides everything needed to serve novel expressions
//! for a language variety:
//! - A character-level weighted Markov chain with exact probability scoring
//! - An expression generator with novelty filtering and prefix continuation
//! - A model store combining an LFU cache, durable snapshots and rebuilds
//! - A bounded worker pool for CPU-heavy work
//!
//! HTTP serving lives in `exgen-server`; this crate has no knowledge of it.

/// Error types.
pub mod error;

/// Chain engine, expression generator and probability search.
pub mod model;

/// Corpus providers (Postgres, directory of TSV files).
pub mod corpus;

/// Durable snapshot store.
pub mod store;

/// Bounded least-frequently-used cache.
pub mod cache;

/// Bounded pool for blocking, CPU-heavy jobs.
pub mod pool;

/// Model store: three-tier model resolution and retention sweep.
pub mod service;

/// File helpers (line reading, atomic writes, directory listing).
///
/// Not exposed
pub(crate) mod io;

pub use error::Error;
