//! Model store: resolves expression generators through three tiers.
//!
//! 1. The in-process LFU cache.
//! 2. The durable model snapshot.
//! 3. A rebuild from the corpus (itself a corpus snapshot, else the provider).
//!
//! Snapshots computed along the way are written by fire-and-forget tasks on
//! a [`TaskTracker`]; the caller never waits for them and their failures are
//! only logged.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::LfuCache;
use crate::corpus::{CorpusEntry, CorpusProvider};
use crate::error::{Error, SnapshotError};
use crate::io;
use crate::model::generate_options::GenerateOptions;
use crate::model::generator::ExpressionGenerator;
use crate::pool::WorkerPool;
use crate::store::{self, ArtifactKey, SnapshotStore};

/// Default number of generators kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Default upper bound of the chain order accepted by [`ModelStore::resolve`].
pub const DEFAULT_MAX_ORDER: usize = 16;

/// Cache key of a generator: one per language variety and chain order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelKey {
	pub identifier: String,
	pub order: usize,
}

impl ModelKey {
	pub fn new(identifier: &str, order: usize) -> Self {
		Self { identifier: identifier.to_owned(), order }
	}
}

/// A request for `count` expressions from one generator.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
	pub identifier: String,
	pub order: usize,
	pub count: usize,
	pub options: GenerateOptions,
}

/// Shared owner of the generator cache, the snapshot store and the corpus provider.
///
/// Constructed once at startup and injected where needed. Call
/// [`ModelStore::shutdown`] before exiting to flush pending snapshot writes.
pub struct ModelStore {
	cache: Mutex<LfuCache<ModelKey, Arc<ExpressionGenerator>>>,
	snapshots: Arc<dyn SnapshotStore>,
	corpus: Arc<dyn CorpusProvider>,
	workers: WorkerPool,
	background: TaskTracker,
	runtime: Handle,
	max_order: usize,
}

impl ModelStore {
	/// Creates a model store.
	///
	/// Background snapshot writes are spawned on `runtime`, which must outlive
	/// the request handlers (usually the process's main runtime).
	pub fn new(
		cache_capacity: usize,
		snapshots: Arc<dyn SnapshotStore>,
		corpus: Arc<dyn CorpusProvider>,
		workers: WorkerPool,
		runtime: Handle,
	) -> Self {
		Self {
			cache: Mutex::new(LfuCache::new(cache_capacity)),
			snapshots,
			corpus,
			workers,
			background: TaskTracker::new(),
			runtime,
			max_order: DEFAULT_MAX_ORDER,
		}
	}

	/// Sets the largest order `resolve` accepts.
	///
	/// Every context of a chain holds `order` symbols, so the bound caps the
	/// memory a single request can ask for.
	pub fn with_max_order(mut self, max_order: usize) -> Self {
		self.max_order = max_order;
		self
	}

	pub fn max_order(&self) -> usize {
		self.max_order
	}

	pub fn workers(&self) -> &WorkerPool {
		&self.workers
	}

	/// Keys currently held in the in-process cache.
	pub fn cached_keys(&self) -> Vec<ModelKey> {
		self.lock_cache().keys().cloned().collect()
	}

	/// Number of snapshot writes not finished yet.
	pub fn pending_writes(&self) -> usize {
		self.background.len()
	}

	fn lock_cache(&self) -> MutexGuard<'_, LfuCache<ModelKey, Arc<ExpressionGenerator>>> {
		// Entries are replaced whole, so a poisoned lock still guards a valid cache.
		self.cache.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn remember(&self, key: ModelKey, model: Arc<ExpressionGenerator>) {
		if let Some((evicted, _)) = self.lock_cache().insert(key, model) {
			debug!(identifier = %evicted.identifier, order = evicted.order, "evicted generator from cache");
		}
	}

	/// Resolves the generator for `(identifier, order)`.
	///
	/// # Errors
	/// - [`Error::InvalidRequest`] for an unusable identifier, order 0 or an
	///   order above the configured maximum
	/// - the corpus provider's error when a rebuild needs a fresh corpus
	pub async fn resolve(&self, identifier: &str, order: usize) -> Result<Arc<ExpressionGenerator>, Error> {
		if !io::is_valid_identifier(identifier) {
			return Err(Error::InvalidRequest(format!("invalid identifier '{identifier}'")));
		}
		if order < 1 {
			return Err(Error::InvalidRequest("order must be >= 1".to_owned()));
		}
		if order > self.max_order {
			return Err(Error::InvalidRequest(format!("order must be <= {}", self.max_order)));
		}

		let key = ModelKey::new(identifier, order);
		let cached = self.lock_cache().get(&key).cloned();
		if let Some(model) = cached {
			debug!(identifier, order, "generator cache hit");
			return Ok(model);
		}

		if let Some(model) = self.load_model(&key).await {
			let model = Arc::new(model);
			self.remember(key, model.clone());
			return Ok(model);
		}

		let corpus = self.load_corpus(identifier).await?;

		info!(identifier, order, entries = corpus.len(), "building generator");
		let owned_identifier = identifier.to_owned();
		let model = self
			.workers
			.run(move || ExpressionGenerator::new(&owned_identifier, order, &corpus))
			.await??;
		let model = Arc::new(model);

		self.remember(key, model.clone());
		self.persist(ArtifactKey::Model(identifier.to_owned(), order), model.clone());
		Ok(model)
	}

	/// Loads a model snapshot. Absent, corrupt or mismatching snapshots are a miss.
	async fn load_model(&self, key: &ModelKey) -> Option<ExpressionGenerator> {
		let snapshots = self.snapshots.clone();
		let artifact = ArtifactKey::Model(key.identifier.clone(), key.order);
		let loaded = self
			.workers
			.run(move || {
				snapshots
					.get(&artifact)
					.and_then(|bytes| store::decode::<ExpressionGenerator>(&bytes))
			})
			.await;

		match loaded {
			Ok(Ok(model)) if model.identifier() == key.identifier && model.order() == key.order => {
				debug!(identifier = %key.identifier, order = key.order, "generator loaded from snapshot");
				Some(model)
			}
			Ok(Ok(_)) => {
				warn!(identifier = %key.identifier, order = key.order, "snapshot belongs to another model, rebuilding");
				None
			}
			Ok(Err(SnapshotError::Absent)) => None,
			Ok(Err(e)) => {
				warn!(identifier = %key.identifier, order = key.order, error = %e, "discarding model snapshot");
				None
			}
			Err(e) => {
				warn!(identifier = %key.identifier, error = %e, "model snapshot load failed");
				None
			}
		}
	}

	/// Resolves the corpus of `identifier`: snapshot first, then the provider.
	///
	/// A freshly fetched corpus is persisted in the background.
	async fn load_corpus(&self, identifier: &str) -> Result<Arc<Vec<CorpusEntry>>, Error> {
		let snapshots = self.snapshots.clone();
		let artifact = ArtifactKey::Corpus(identifier.to_owned());
		let loaded = self
			.workers
			.run(move || {
				snapshots
					.get(&artifact)
					.and_then(|bytes| store::decode::<Vec<CorpusEntry>>(&bytes))
			})
			.await?;

		match loaded {
			Ok(corpus) => {
				debug!(identifier, entries = corpus.len(), "corpus loaded from snapshot");
				return Ok(Arc::new(corpus));
			}
			Err(SnapshotError::Absent) => {}
			Err(e) => warn!(identifier, error = %e, "discarding corpus snapshot"),
		}

		info!(identifier, "fetching corpus");
		let corpus = Arc::new(self.corpus.fetch(identifier).await?);
		self.persist(ArtifactKey::Corpus(identifier.to_owned()), corpus.clone());
		Ok(corpus)
	}

	/// Encodes and writes `value` in the background. Never fails the caller.
	fn persist<T>(&self, key: ArtifactKey, value: Arc<T>)
	where
		T: Serialize + Send + Sync + 'static,
	{
		let snapshots = self.snapshots.clone();
		let workers = self.workers.clone();

		self.background.spawn_on(
			async move {
				let written = workers
					.run({
						let key = key.clone();
						move || snapshots.put(&key, &store::encode(value.as_ref())?)
					})
					.await;

				match written {
					Ok(Ok(())) => debug!(artifact = ?key, "snapshot written"),
					Ok(Err(e)) => warn!(artifact = ?key, error = %e, "snapshot write failed"),
					Err(e) => warn!(artifact = ?key, error = %e, "snapshot write failed"),
				}
			},
			&self.runtime,
		);
	}

	/// Generates up to `request.count` expressions.
	///
	/// Slots whose attempts are exhausted are dropped, so the result may be
	/// shorter than `count`; that is not an error.
	pub async fn generate(&self, request: GenerateRequest) -> Result<Vec<String>, Error> {
		let model = self.resolve(&request.identifier, request.order).await?;
		if request.count == 0 {
			return Ok(Vec::new());
		}

		let GenerateRequest { count, options, .. } = request;
		self.workers
			.run(move || {
				let mut rng = rand::rng();
				(0..count)
					.filter_map(|_| model.generate(&options, &mut rng))
					.collect()
			})
			.await
	}

	/// Deletes every artifact older than `max_age` and evicts the matching
	/// generators, whatever their order.
	///
	/// The age of an identifier is the age of its corpus snapshot, or of its
	/// newest model snapshot when the corpus one was never written. Identifiers
	/// whose age cannot be read are skipped; the sweep always covers the rest.
	///
	/// Returns the identifiers that were removed.
	pub async fn cleanup(&self, max_age: Duration) -> Result<Vec<String>, Error> {
		let snapshots = self.snapshots.clone();
		let removed = self
			.workers
			.run(move || -> Result<Vec<String>, SnapshotError> {
				let mut removed = Vec::new();
				for identifier in snapshots.identifiers()? {
					let age = match identifier_age(snapshots.as_ref(), &identifier) {
						Ok(age) => age,
						Err(e) => {
							debug!(identifier = %identifier, error = %e, "skipping identifier during cleanup");
							continue;
						}
					};
					if age <= max_age {
						continue;
					}
					match snapshots.remove_all(&identifier) {
						Ok(()) | Err(SnapshotError::Absent) => removed.push(identifier),
						Err(e) => warn!(identifier = %identifier, error = %e, "failed to remove snapshots"),
					}
				}
				Ok(removed)
			})
			.await??;

		if !removed.is_empty() {
			let evicted = self
				.lock_cache()
				.retain(|key| !removed.iter().any(|identifier| *identifier == key.identifier));
			info!(identifiers = ?removed, evicted, "cleanup removed expired snapshots");
		}

		Ok(removed)
	}

	/// Stops accepting background writes and waits up to `grace` for the pending ones.
	pub async fn shutdown(&self, grace: Duration) {
		self.background.close();
		if tokio::time::timeout(grace, self.background.wait()).await.is_err() {
			warn!(pending = self.background.len(), "abandoning pending snapshot writes");
		}
	}
}

/// Age of the artifacts of `identifier`.
///
/// Falls back to the youngest model snapshot when the corpus snapshot is absent.
fn identifier_age(snapshots: &dyn SnapshotStore, identifier: &str) -> Result<Duration, SnapshotError> {
	match snapshots.age(&ArtifactKey::Corpus(identifier.to_owned())) {
		Err(SnapshotError::Absent) => {}
		other => return other,
	}

	snapshots
		.artifacts(identifier)?
		.iter()
		.filter(|key| matches!(key, ArtifactKey::Model(..)))
		.filter_map(|key| snapshots.age(key).ok())
		.min()
		.ok_or(SnapshotError::Absent)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::corpus::CorpusFuture;
	use crate::error::CorpusError;
	use crate::store::FsSnapshotStore;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::SystemTime;
	use tempfile::TempDir;

	/// In-memory provider counting how often it is asked.
	struct StaticCorpus {
		entries: Vec<CorpusEntry>,
		fetches: AtomicUsize,
		fail: bool,
	}

	impl StaticCorpus {
		fn new(pairs: &[(&str, f64)]) -> Arc<Self> {
			Arc::new(Self {
				entries: pairs.iter().map(|(e, w)| CorpusEntry::new(*e, *w)).collect(),
				fetches: AtomicUsize::new(0),
				fail: false,
			})
		}

		fn failing() -> Arc<Self> {
			Arc::new(Self { entries: Vec::new(), fetches: AtomicUsize::new(0), fail: true })
		}

		fn fetches(&self) -> usize {
			self.fetches.load(Ordering::SeqCst)
		}
	}

	impl CorpusProvider for StaticCorpus {
		fn fetch<'a>(&'a self, identifier: &'a str) -> CorpusFuture<'a> {
			self.fetches.fetch_add(1, Ordering::SeqCst);
			Box::pin(async move {
				if self.fail {
					Err(CorpusError::NotFound(identifier.to_owned()))
				} else {
					Ok(self.entries.clone())
				}
			})
		}
	}

	const WORDS: &[(&str, f64)] = &[
		("banana", 2.0),
		("bandana", 1.0),
		("cabana", 1.5),
		("ananas", 0.7),
		("canal", 1.2),
	];

	fn model_store(dir: &TempDir, corpus: Arc<StaticCorpus>, capacity: usize) -> ModelStore {
		ModelStore::new(
			capacity,
			Arc::new(FsSnapshotStore::new(dir.path().to_str().unwrap())),
			corpus,
			WorkerPool::new(2),
			Handle::current(),
		)
	}

	async fn flush(store: &ModelStore) {
		store.shutdown(Duration::from_secs(5)).await;
	}

	fn age_artifact(dir: &TempDir, relative: &str, age: Duration) {
		let file = std::fs::File::options().write(true).open(dir.path().join(relative)).unwrap();
		file.set_modified(SystemTime::now() - age).unwrap();
	}

	#[tokio::test]
	async fn second_resolve_is_a_cache_hit() {
		let dir = TempDir::new().unwrap();
		let corpus = StaticCorpus::new(WORDS);
		let store = model_store(&dir, corpus.clone(), DEFAULT_CACHE_CAPACITY);

		let first = store.resolve("tst-000", 2).await.unwrap();
		let second = store.resolve("tst-000", 2).await.unwrap();
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(corpus.fetches(), 1);
		assert_eq!(store.cached_keys(), vec![ModelKey::new("tst-000", 2)]);
	}

	#[tokio::test]
	async fn rebuild_persists_corpus_and_model() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		store.resolve("tst-000", 3).await.unwrap();
		flush(&store).await;

		assert!(dir.path().join("tst-000/corpus.bin").is_file());
		assert!(dir.path().join("tst-000/3.bin").is_file());
		assert_eq!(store.pending_writes(), 0);
	}

	#[tokio::test]
	async fn snapshots_serve_a_fresh_store_without_the_provider() {
		let dir = TempDir::new().unwrap();
		let warm = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		let built = warm.resolve("tst-000", 2).await.unwrap();
		flush(&warm).await;

		let failing = StaticCorpus::failing();
		let cold = model_store(&dir, failing.clone(), DEFAULT_CACHE_CAPACITY);
		let loaded = cold.resolve("tst-000", 2).await.unwrap();
		assert_eq!(loaded.chain(), built.chain());

		// another order rebuilds from the corpus snapshot, still without the provider
		cold.resolve("tst-000", 1).await.unwrap();
		assert_eq!(failing.fetches(), 0);
	}

	#[tokio::test]
	async fn corrupt_model_snapshot_triggers_rebuild() {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir_all(dir.path().join("tst-000")).unwrap();
		std::fs::write(dir.path().join("tst-000/2.bin"), b"EXG1\xff\xff\xff").unwrap();

		let corpus = StaticCorpus::new(WORDS);
		let store = model_store(&dir, corpus.clone(), DEFAULT_CACHE_CAPACITY);
		let model = store.resolve("tst-000", 2).await.unwrap();
		assert_eq!(model.order(), 2);
		assert_eq!(corpus.fetches(), 1);
	}

	#[tokio::test]
	async fn provider_failure_reaches_the_caller() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::failing(), DEFAULT_CACHE_CAPACITY);
		let err = store.resolve("tst-000", 2).await.unwrap_err();
		assert!(matches!(err, Error::Corpus(CorpusError::NotFound(_))));
		assert!(store.cached_keys().is_empty());
	}

	#[tokio::test]
	async fn invalid_arguments_are_rejected() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		assert!(matches!(store.resolve("../x", 2).await, Err(Error::InvalidRequest(_))));
		assert!(matches!(store.resolve("tst-000", 0).await, Err(Error::InvalidRequest(_))));
	}

	#[tokio::test]
	async fn orders_above_the_maximum_are_rejected_before_building() {
		let dir = TempDir::new().unwrap();
		let corpus = StaticCorpus::new(WORDS);
		let store = model_store(&dir, corpus.clone(), DEFAULT_CACHE_CAPACITY).with_max_order(4);

		assert!(store.resolve("tst-000", 4).await.is_ok());
		assert!(matches!(store.resolve("tst-000", 5).await, Err(Error::InvalidRequest(_))));
		assert!(matches!(
			store.resolve("tst-000", 100_000_000_000_000_000).await,
			Err(Error::InvalidRequest(_))
		));
		assert_eq!(store.cached_keys(), vec![ModelKey::new("tst-000", 4)]);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_cold_resolves_agree() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);

		let (a, b) = tokio::join!(store.resolve("tst-000", 2), store.resolve("tst-000", 2));
		let (a, b) = (a.unwrap(), b.unwrap());
		assert_eq!(a.chain(), b.chain());
		flush(&store).await;

		assert_eq!(store.cached_keys(), vec![ModelKey::new("tst-000", 2)]);
		let snapshots = FsSnapshotStore::new(dir.path().to_str().unwrap());
		let bytes = snapshots.get(&ArtifactKey::Model("tst-000".into(), 2)).unwrap();
		let restored: ExpressionGenerator = store::decode(&bytes).unwrap();
		assert_eq!(restored.chain(), a.chain());
		let bytes = snapshots.get(&ArtifactKey::Corpus("tst-000".into())).unwrap();
		assert_eq!(store::decode::<Vec<CorpusEntry>>(&bytes).unwrap().len(), WORDS.len());
	}

	#[tokio::test]
	async fn cache_is_bounded() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), 2);
		store.resolve("tst-000", 1).await.unwrap();
		store.resolve("tst-000", 1).await.unwrap();
		store.resolve("tst-000", 2).await.unwrap();
		store.resolve("tst-000", 3).await.unwrap();

		let keys = store.cached_keys();
		assert_eq!(keys.len(), 2);
		assert!(keys.contains(&ModelKey::new("tst-000", 1)));
		assert!(keys.contains(&ModelKey::new("tst-000", 3)));
	}

	#[tokio::test]
	async fn generate_returns_novel_expressions() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		let request = GenerateRequest {
			identifier: "tst-000".into(),
			order: 1,
			count: 20,
			options: GenerateOptions::default(),
		};
		let expressions = store.generate(request).await.unwrap();
		assert!(expressions.len() <= 20);
		assert!(!expressions.is_empty());
		for expression in &expressions {
			assert!(!WORDS.iter().any(|(known, _)| known == expression));
		}
	}

	#[tokio::test]
	async fn zero_count_generates_nothing() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		let request = GenerateRequest {
			identifier: "tst-000".into(),
			order: 2,
			count: 0,
			options: GenerateOptions::default(),
		};
		assert!(store.generate(request).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn cleanup_removes_only_expired_identifiers() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		for identifier in ["old-000", "new-000"] {
			store.resolve(identifier, 1).await.unwrap();
			store.resolve(identifier, 2).await.unwrap();
		}
		// drain writes without closing the tracker for good
		while store.pending_writes() > 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		age_artifact(&dir, "old-000/corpus.bin", Duration::from_secs(700_000));
		age_artifact(&dir, "new-000/corpus.bin", Duration::from_secs(500_000));
		// a directory without a corpus snapshot is skipped, not fatal
		std::fs::create_dir_all(dir.path().join("orphan-000")).unwrap();

		let removed = store.cleanup(Duration::from_secs(604_800)).await.unwrap();
		assert_eq!(removed, vec!["old-000".to_string()]);

		assert!(!dir.path().join("old-000").exists());
		assert!(dir.path().join("new-000/corpus.bin").is_file());
		assert!(dir.path().join("new-000/2.bin").is_file());

		let keys = store.cached_keys();
		assert_eq!(keys.len(), 2);
		assert!(keys.iter().all(|key| key.identifier == "new-000"));
	}

	#[tokio::test]
	async fn cleanup_falls_back_to_model_snapshots_without_a_corpus_snapshot() {
		let dir = TempDir::new().unwrap();
		let store = model_store(&dir, StaticCorpus::new(WORDS), DEFAULT_CACHE_CAPACITY);
		for identifier in ["old-000", "new-000"] {
			store.resolve(identifier, 1).await.unwrap();
			store.resolve(identifier, 3).await.unwrap();
		}
		while store.pending_writes() > 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}

		// corpus snapshots lost, only model snapshots remain
		for identifier in ["old-000", "new-000"] {
			std::fs::remove_file(dir.path().join(format!("{identifier}/corpus.bin"))).unwrap();
		}
		age_artifact(&dir, "old-000/1.bin", Duration::from_secs(800_000));
		age_artifact(&dir, "old-000/3.bin", Duration::from_secs(700_000));
		// the youngest model snapshot decides
		age_artifact(&dir, "new-000/1.bin", Duration::from_secs(800_000));
		age_artifact(&dir, "new-000/3.bin", Duration::from_secs(500_000));

		let removed = store.cleanup(Duration::from_secs(604_800)).await.unwrap();
		assert_eq!(removed, vec!["old-000".to_string()]);
		assert!(!dir.path().join("old-000").exists());
		assert!(dir.path().join("new-000/1.bin").is_file());
		assert!(store.cached_keys().iter().all(|key| key.identifier == "new-000"));
	}
}
