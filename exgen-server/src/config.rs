//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the file given with `-f`), then applies
//! `EXGEN_DATA_DIR`, `EXGEN_LOG_LEVEL` and `EXGEN_DATABASE_URL`.

use std::{env, fs, path::Path, time::Duration};

use serde::Deserialize;

use exgen_core::corpus::{DEFAULT_QUERY, PgSettings};
use exgen_core::model::generate_options::DEFAULT_MAX_ATTEMPTS;
use exgen_core::service::{DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_ORDER};

use crate::error::AppError;

/// Where corpora come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorpusSource {
	Postgres,
	Directory,
}

/// Fully-resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
	pub bind: String,
	/// Number of HTTP request loops.
	pub http_workers: usize,
	pub cors: bool,
	pub log_level: String,
	/// Root of the snapshot store.
	pub data_dir: String,
	pub cache_capacity: usize,
	/// Retention used by `/cleanup` when no `max_age` is given.
	pub cleanup_max_age: Duration,
	/// Size of the CPU worker pool; 0 means one per core.
	pub worker_pool_size: usize,
	pub max_attempts: usize,
	/// Upper bound for the `count` parameter.
	pub max_count: usize,
	/// Upper bound for the `order` parameter.
	pub max_order: usize,
	pub corpus_source: CorpusSource,
	pub corpus_directory: String,
	pub postgres: PgSettings,
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
	#[serde(default)]
	server: RawServer,
	#[serde(default)]
	log: RawLog,
	#[serde(default)]
	store: RawStore,
	#[serde(default)]
	workers: RawWorkers,
	#[serde(default)]
	generation: RawGeneration,
	#[serde(default)]
	corpus: RawCorpus,
}

#[derive(Deserialize)]
struct RawServer {
	#[serde(default = "default_bind")]
	bind: String,
	#[serde(default = "default_http_workers")]
	workers: usize,
	#[serde(default = "default_true")]
	cors: bool,
}

#[derive(Deserialize)]
struct RawLog {
	#[serde(default = "default_log_level")]
	level: String,
}

#[derive(Deserialize)]
struct RawStore {
	#[serde(default = "default_data_dir")]
	data_dir: String,
	#[serde(default = "default_cache_capacity")]
	cache_capacity: usize,
	#[serde(default = "default_cleanup_max_age_secs")]
	cleanup_max_age_secs: u64,
}

#[derive(Deserialize, Default)]
struct RawWorkers {
	#[serde(default)]
	size: usize,
}

#[derive(Deserialize)]
struct RawGeneration {
	#[serde(default = "default_max_attempts")]
	max_attempts: usize,
	#[serde(default = "default_max_count")]
	max_count: usize,
	#[serde(default = "default_max_order")]
	max_order: usize,
}

#[derive(Deserialize)]
struct RawCorpus {
	#[serde(default = "default_corpus_source")]
	source: CorpusSource,
	#[serde(default = "default_corpus_directory")]
	directory: String,
	#[serde(default)]
	database_url: String,
	#[serde(default = "default_min_connections")]
	min_connections: u32,
	#[serde(default = "default_max_connections")]
	max_connections: u32,
	#[serde(default = "default_query_timeout_secs")]
	query_timeout_secs: u64,
	#[serde(default)]
	query: Option<String>,
}

impl Default for RawServer {
	fn default() -> Self {
		Self { bind: default_bind(), workers: default_http_workers(), cors: true }
	}
}

impl Default for RawLog {
	fn default() -> Self {
		Self { level: default_log_level() }
	}
}

impl Default for RawStore {
	fn default() -> Self {
		Self {
			data_dir: default_data_dir(),
			cache_capacity: default_cache_capacity(),
			cleanup_max_age_secs: default_cleanup_max_age_secs(),
		}
	}
}

impl Default for RawGeneration {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			max_count: default_max_count(),
			max_order: default_max_order(),
		}
	}
}

impl Default for RawCorpus {
	fn default() -> Self {
		Self {
			source: default_corpus_source(),
			directory: default_corpus_directory(),
			database_url: String::new(),
			min_connections: default_min_connections(),
			max_connections: default_max_connections(),
			query_timeout_secs: default_query_timeout_secs(),
			query: None,
		}
	}
}

fn default_bind() -> String { "127.0.0.1:5000".to_string() }
fn default_http_workers() -> usize { 1 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_data_dir() -> String { "./data".to_string() }
fn default_cache_capacity() -> usize { DEFAULT_CACHE_CAPACITY }
fn default_cleanup_max_age_secs() -> u64 { 604_800 }
fn default_max_attempts() -> usize { DEFAULT_MAX_ATTEMPTS }
fn default_max_count() -> usize { 1000 }
fn default_max_order() -> usize { DEFAULT_MAX_ORDER }
fn default_corpus_source() -> CorpusSource { CorpusSource::Directory }
fn default_corpus_directory() -> String { "./corpus".to_string() }
fn default_min_connections() -> u32 { 1 }
fn default_max_connections() -> u32 { 3 }
fn default_query_timeout_secs() -> u64 { 30 }

/// Env-var overrides applied on top of the file.
#[derive(Debug, Default)]
pub struct Overrides {
	pub data_dir: Option<String>,
	pub log_level: Option<String>,
	pub database_url: Option<String>,
}

impl Overrides {
	pub fn from_env() -> Self {
		Self {
			data_dir: env::var("EXGEN_DATA_DIR").ok(),
			log_level: env::var("EXGEN_LOG_LEVEL").ok(),
			database_url: env::var("EXGEN_DATABASE_URL").ok(),
		}
	}
}

/// Load config from `path` (default `config/default.toml`), then apply env-var overrides.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
	load_from(Path::new(path.unwrap_or("config/default.toml")), Overrides::from_env())
}

/// Loads from an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: Overrides) -> Result<Config, AppError> {
	let raw = fs::read_to_string(path)
		.map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
	parse(&raw, overrides).map_err(|e| match e {
		AppError::Config(msg) => AppError::Config(format!("{} in {}", msg, path.display())),
		other => other,
	})
}

fn parse(raw: &str, overrides: Overrides) -> Result<Config, AppError> {
	let parsed: RawConfig =
		toml::from_str(raw).map_err(|e| AppError::Config(format!("parse error: {e}")))?;

	if parsed.corpus.max_connections == 0 || parsed.corpus.min_connections > parsed.corpus.max_connections {
		return Err(AppError::Config(format!(
			"invalid connection bounds min={} max={}",
			parsed.corpus.min_connections, parsed.corpus.max_connections
		)));
	}

	if parsed.generation.max_order == 0 {
		return Err(AppError::Config("generation.max_order must be >= 1".into()));
	}

	let database_url = overrides.database_url.unwrap_or(parsed.corpus.database_url);
	if parsed.corpus.source == CorpusSource::Postgres && database_url.is_empty() {
		return Err(AppError::Config("corpus.database_url is required for the postgres source".into()));
	}

	Ok(Config {
		bind: parsed.server.bind,
		http_workers: parsed.server.workers.max(1),
		cors: parsed.server.cors,
		log_level: overrides.log_level.unwrap_or(parsed.log.level),
		data_dir: overrides.data_dir.unwrap_or(parsed.store.data_dir),
		cache_capacity: parsed.store.cache_capacity,
		cleanup_max_age: Duration::from_secs(parsed.store.cleanup_max_age_secs),
		worker_pool_size: parsed.workers.size,
		max_attempts: parsed.generation.max_attempts,
		max_count: parsed.generation.max_count,
		max_order: parsed.generation.max_order,
		corpus_source: parsed.corpus.source,
		corpus_directory: parsed.corpus.directory,
		postgres: PgSettings {
			database_url,
			min_connections: parsed.corpus.min_connections,
			max_connections: parsed.corpus.max_connections,
			query_timeout: Duration::from_secs(parsed.corpus.query_timeout_secs),
			query: parsed.corpus.query.unwrap_or_else(|| DEFAULT_QUERY.to_string()),
		},
	})
}
