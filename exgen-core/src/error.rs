//! Error types shared across the engine.

use std::time::Duration;

use thiserror::Error;

use crate::model::symbol::Context;

/// Failures of the chain engine itself.
#[derive(Debug, Error)]
pub enum ChainError {
	#[error("chain order must be >= 1, got {0}")]
	InvalidOrder(usize),

	#[error("unknown context: {0:?}")]
	UnknownContext(Context),
}

/// Failures of a corpus provider. Surfaced unmodified to the generation caller.
#[derive(Debug, Error)]
pub enum CorpusError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("corpus query timed out after {0:?}")]
	Timeout(Duration),

	#[error("no corpus for identifier '{0}'")]
	NotFound(String),

	#[error("malformed corpus line {line}: {reason}")]
	Parse { line: usize, reason: String },

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Failures of the durable snapshot store.
///
/// `Absent` and `Corrupt` are distinct so callers can log them differently,
/// but both are treated as a cache miss.
#[derive(Debug, Error)]
pub enum SnapshotError {
	#[error("snapshot absent")]
	Absent,

	#[error("snapshot corrupt: {0}")]
	Corrupt(String),

	#[error("invalid identifier '{0}'")]
	InvalidIdentifier(String),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

/// Top-level error returned by the model store.
#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Chain(#[from] ChainError),

	#[error(transparent)]
	Corpus(#[from] CorpusError),

	#[error(transparent)]
	Snapshot(#[from] SnapshotError),

	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("worker failed: {0}")]
	Worker(String),
}
