//! Corpus providers.
//!
//! A corpus is the list of known expressions of a language variety with
//! their aggregate quality weight. The engine only sees the
//! [`CorpusProvider`] trait; two implementations are provided:
//! - [`PgCorpusProvider`]: bounded `sqlx` Postgres pool with a per-query timeout
//! - [`DirectoryCorpusProvider`]: one `<identifier>.tsv` file per variety

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::error::CorpusError;
use crate::io;

/// Default query: every expression of the language variety with its
/// aggregated denotation quality score.
pub const DEFAULT_QUERY: &str = "SELECT expr.txt, \
	grp_quality_score(array_agg(denotationx.grp), array_agg(denotationx.quality))::float8 \
	FROM expr \
	JOIN denotationx ON (denotationx.expr = expr.id) \
	WHERE expr.langvar = uid_langvar($1) \
	GROUP BY expr.id";

/// A known expression and its aggregate weight.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CorpusEntry {
	pub expression: String,
	pub weight: f64,
}

impl CorpusEntry {
	pub fn new(expression: impl Into<String>, weight: f64) -> Self {
		Self { expression: expression.into(), weight }
	}
}

/// A boxed, owned future returned by [`CorpusProvider::fetch`].
pub type CorpusFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Vec<CorpusEntry>, CorpusError>> + Send + 'a>>;

/// Source of training corpora, queried by opaque identifier.
///
/// Called at most once per cold cache; failures are surfaced unmodified
/// to the generation caller.
pub trait CorpusProvider: Send + Sync {
	fn fetch<'a>(&'a self, identifier: &'a str) -> CorpusFuture<'a>;
}

/// Connection settings for [`PgCorpusProvider`].
#[derive(Debug, Clone)]
pub struct PgSettings {
	pub database_url: String,
	pub min_connections: u32,
	pub max_connections: u32,
	/// Applies to both connection acquisition and the query itself.
	pub query_timeout: Duration,
	/// SQL taking the identifier as `$1` and returning `(text, float8)` rows.
	pub query: String,
}

/// Corpus provider backed by a bounded Postgres connection pool.
///
/// Callers queue on the pool when every connection is busy. A query that
/// exceeds `query_timeout` fails with [`CorpusError::Timeout`]; there is no retry.
pub struct PgCorpusProvider {
	pool: PgPool,
	query: String,
	timeout: Duration,
}

impl PgCorpusProvider {
	/// Creates the pool without connecting; connections open on first use.
	pub fn connect_lazy(settings: &PgSettings) -> Result<Self, CorpusError> {
		let pool = PgPoolOptions::new()
			.min_connections(settings.min_connections)
			.max_connections(settings.max_connections)
			.acquire_timeout(settings.query_timeout)
			.connect_lazy(&settings.database_url)?;

		info!(
			min = settings.min_connections,
			max = settings.max_connections,
			"corpus connection pool configured"
		);

		Ok(Self {
			pool,
			query: settings.query.clone(),
			timeout: settings.query_timeout,
		})
	}

	/// Closes every pooled connection.
	pub async fn close(&self) {
		self.pool.close().await;
	}
}

impl CorpusProvider for PgCorpusProvider {
	fn fetch<'a>(&'a self, identifier: &'a str) -> CorpusFuture<'a> {
		Box::pin(async move {
			debug!(identifier, "fetching corpus from database");
			let query = sqlx::query_as::<_, (String, f64)>(&self.query).bind(identifier);
			let rows = tokio::time::timeout(self.timeout, query.fetch_all(&self.pool))
				.await
				.map_err(|_| CorpusError::Timeout(self.timeout))??;

			Ok(rows
				.into_iter()
				.map(|(expression, weight)| CorpusEntry::new(expression, weight))
				.collect())
		})
	}
}

/// Corpus provider reading `<dir>/<identifier>.tsv` files.
///
/// See [`parse_lines`] for the file format.
pub struct DirectoryCorpusProvider {
	dir: PathBuf,
}

impl DirectoryCorpusProvider {
	pub fn new(dir: &str) -> Self {
		Self { dir: io::normalize_folder(dir) }
	}
}

impl CorpusProvider for DirectoryCorpusProvider {
	fn fetch<'a>(&'a self, identifier: &'a str) -> CorpusFuture<'a> {
		Box::pin(async move {
			if !io::is_valid_identifier(identifier) {
				return Err(CorpusError::NotFound(identifier.to_owned()));
			}
			let path = self.dir.join(format!("{identifier}.tsv"));
			debug!(identifier, path = %path.display(), "reading corpus file");

			let lines = tokio::task::spawn_blocking(move || io::read_file(path))
				.await
				.map_err(std::io::Error::other)?;

			match lines {
				Ok(lines) => parse_lines(&lines),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
					Err(CorpusError::NotFound(identifier.to_owned()))
				}
				Err(e) => Err(e.into()),
			}
		})
	}
}

/// Loads a TSV corpus file directly.
pub fn load_tsv<P: AsRef<Path>>(path: P) -> Result<Vec<CorpusEntry>, CorpusError> {
	parse_lines(&io::read_file(path)?)
}

/// Parses corpus lines of the form `expression<TAB>weight`.
///
/// - Blank lines and lines starting with `#` are skipped
/// - A missing weight column means a weight of 1
///
/// # Errors
/// Returns [`CorpusError::Parse`] with the 1-based line number when a weight
/// is not a number.
pub fn parse_lines(lines: &[String]) -> Result<Vec<CorpusEntry>, CorpusError> {
	let mut entries = Vec::with_capacity(lines.len());

	for (index, line) in lines.iter().enumerate() {
		if line.trim().is_empty() || line.starts_with('#') {
			continue;
		}

		let entry = match line.rsplit_once('\t') {
			Some((expression, weight)) => {
				let weight = weight.trim().parse::<f64>().map_err(|e| CorpusError::Parse {
					line: index + 1,
					reason: format!("invalid weight '{weight}': {e}"),
				})?;
				CorpusEntry::new(expression, weight)
			}
			None => CorpusEntry::new(line.as_str(), 1.0),
		};
		entries.push(entry);
	}

	Ok(entries)
}
