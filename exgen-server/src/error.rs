//! Server start-up errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
	#[error("config error: {0}")]
	Config(String),

	#[error("logger error: {0}")]
	Logger(String),

	#[error("corpus error: {0}")]
	Corpus(#[from] exgen_core::error::CorpusError),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}
