//! Top-level module for the chain engine.
//!
//! - Symbols and context windows (`symbol`)
//! - Frozen per-context distributions (`State`)
//! - The transition table (`Chain`)
//! - Generation options (`GenerateOptions`)
//! - The novelty-filtering wrapper (`ExpressionGenerator`)
//! - Best-probability search (`search`)

/// Sentinel-aware symbol alphabet and Unicode normalization helpers.
pub mod symbol;

/// Internal representation of a single context's outgoing transitions.
///
/// Holds the sorted choice list and cumulative weights used for sampling.
pub mod state;

/// Weighted transition table with sampling, walking and probability scoring.
pub mod chain;

/// Options controlling a single generation call.
pub mod generate_options;

/// Expression generator wrapping a chain with a known-expression set.
pub mod generator;

/// Branch-and-bound search for the most probable expressions.
pub mod search;
