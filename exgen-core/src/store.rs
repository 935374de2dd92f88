//! Durable snapshot store.
//!
//! Snapshots are advisory: a missing or corrupt one is only ever a cache
//! miss. Values are encoded with `postcard` behind a short magic header so a
//! truncated or foreign file is rejected as [`SnapshotError::Corrupt`].

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::SnapshotError;
use crate::io;

const MAGIC: &[u8; 4] = b"EXG1";

/// Key of a persisted artifact.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKey {
	/// Raw corpus of an identifier, saves a round trip to the corpus provider.
	Corpus(String),
	/// Built expression generator of an identifier for one chain order.
	Model(String, usize),
}

impl ArtifactKey {
	pub fn identifier(&self) -> &str {
		match self {
			ArtifactKey::Corpus(identifier) | ArtifactKey::Model(identifier, _) => identifier,
		}
	}
}

/// Byte-addressable persistence for corpus and model snapshots.
///
/// Implementations are blocking; callers run them on the worker pool.
pub trait SnapshotStore: Send + Sync {
	fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), SnapshotError>;

	/// Fails with `Absent` when nothing was stored and `Corrupt` when the
	/// stored bytes cannot be what a `put` wrote.
	fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>, SnapshotError>;

	/// Deletes every artifact of `identifier`, whatever its kind or order.
	fn remove_all(&self, identifier: &str) -> Result<(), SnapshotError>;

	/// Time elapsed since the artifact was last written.
	fn age(&self, key: &ArtifactKey) -> Result<Duration, SnapshotError>;

	/// Every identifier that currently has at least one artifact.
	fn identifiers(&self) -> Result<Vec<String>, SnapshotError>;

	/// Every artifact stored for `identifier`, in no particular order.
	fn artifacts(&self, identifier: &str) -> Result<Vec<ArtifactKey>, SnapshotError>;
}

/// Encodes a value into snapshot bytes.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SnapshotError> {
	let mut bytes = MAGIC.to_vec();
	let payload = postcard::to_stdvec(value).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;
	bytes.extend_from_slice(&payload);
	Ok(bytes)
}

/// Decodes snapshot bytes written by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SnapshotError> {
	let payload = bytes
		.strip_prefix(MAGIC.as_slice())
		.ok_or_else(|| SnapshotError::Corrupt("missing snapshot header".to_owned()))?;
	postcard::from_bytes(payload).map_err(|e| SnapshotError::Corrupt(e.to_string()))
}

/// Filesystem snapshot store.
///
/// Layout: `<root>/<identifier>/corpus.bin` and `<root>/<identifier>/<order>.bin`.
/// Writes go through a temporary file and a rename.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
	root: PathBuf,
}

impl FsSnapshotStore {
	/// Creates a store rooted at `root` (`"."` means the working directory).
	/// The directory is created lazily on first write.
	pub fn new(root: &str) -> Self {
		Self { root: io::normalize_folder(root) }
	}

	fn dir(&self, identifier: &str) -> Result<PathBuf, SnapshotError> {
		if !io::is_valid_identifier(identifier) {
			return Err(SnapshotError::InvalidIdentifier(identifier.to_owned()));
		}
		Ok(self.root.join(identifier))
	}

	pub(crate) fn path(&self, key: &ArtifactKey) -> Result<PathBuf, SnapshotError> {
		let dir = self.dir(key.identifier())?;
		Ok(match key {
			ArtifactKey::Corpus(_) => dir.join("corpus.bin"),
			ArtifactKey::Model(_, order) => dir.join(format!("{order}.bin")),
		})
	}
}

fn absent_if_missing(e: std::io::Error) -> SnapshotError {
	if e.kind() == std::io::ErrorKind::NotFound {
		SnapshotError::Absent
	} else {
		SnapshotError::Io(e)
	}
}

impl SnapshotStore for FsSnapshotStore {
	fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<(), SnapshotError> {
		let path = self.path(key)?;
		fs::create_dir_all(self.dir(key.identifier())?)?;
		io::write_atomic(path, bytes)?;
		Ok(())
	}

	fn get(&self, key: &ArtifactKey) -> Result<Vec<u8>, SnapshotError> {
		let bytes = fs::read(self.path(key)?).map_err(absent_if_missing)?;
		if bytes.len() <= MAGIC.len() {
			return Err(SnapshotError::Corrupt(format!("truncated snapshot ({} bytes)", bytes.len())));
		}
		Ok(bytes)
	}

	fn remove_all(&self, identifier: &str) -> Result<(), SnapshotError> {
		fs::remove_dir_all(self.dir(identifier)?).map_err(absent_if_missing)
	}

	fn age(&self, key: &ArtifactKey) -> Result<Duration, SnapshotError> {
		let modified = fs::metadata(self.path(key)?)
			.map_err(absent_if_missing)?
			.modified()?;
		Ok(SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO))
	}

	fn identifiers(&self) -> Result<Vec<String>, SnapshotError> {
		Ok(io::list_dirs(&self.root)?)
	}

	fn artifacts(&self, identifier: &str) -> Result<Vec<ArtifactKey>, SnapshotError> {
		let stems = io::list_files(self.dir(identifier)?, "bin")?;
		Ok(stems
			.into_iter()
			.filter_map(|stem| match stem.as_str() {
				"corpus" => Some(ArtifactKey::Corpus(identifier.to_owned())),
				order => order
					.parse::<usize>()
					.ok()
					.map(|order| ArtifactKey::Model(identifier.to_owned(), order)),
			})
			.collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::corpus::CorpusEntry;
	use tempfile::TempDir;

	fn store() -> (TempDir, FsSnapshotStore) {
		let dir = TempDir::new().unwrap();
		let store = FsSnapshotStore::new(dir.path().to_str().unwrap());
		(dir, store)
	}

	#[test]
	fn put_then_get_round_trips_a_corpus() {
		let (_dir, store) = store();
		let corpus = vec![CorpusEntry::new("ab", 3.0), CorpusEntry::new("ac", 1.0)];
		let key = ArtifactKey::Corpus("eng-000".into());

		store.put(&key, &encode(&corpus).unwrap()).unwrap();
		let restored: Vec<CorpusEntry> = decode(&store.get(&key).unwrap()).unwrap();
		assert_eq!(restored, corpus);
	}

	#[test]
	fn missing_and_corrupt_snapshots_are_distinct() {
		let (dir, store) = store();
		let key = ArtifactKey::Model("eng-000".into(), 2);
		assert!(matches!(store.get(&key), Err(SnapshotError::Absent)));

		fs::create_dir_all(dir.path().join("eng-000")).unwrap();
		fs::write(dir.path().join("eng-000/2.bin"), b"EX").unwrap();
		assert!(matches!(store.get(&key), Err(SnapshotError::Corrupt(_))));

		fs::write(dir.path().join("eng-000/2.bin"), b"garbage-bytes").unwrap();
		let bytes = store.get(&key).unwrap();
		assert!(matches!(decode::<Vec<CorpusEntry>>(&bytes), Err(SnapshotError::Corrupt(_))));
	}

	#[test]
	fn truncated_payload_fails_to_decode() {
		let corpus = vec![CorpusEntry::new("abcdef", 3.0); 4];
		let bytes = encode(&corpus).unwrap();
		let truncated = &bytes[..bytes.len() - 3];
		assert!(decode::<Vec<CorpusEntry>>(truncated).is_err());
	}

	#[test]
	fn remove_all_deletes_every_kind() {
		let (_dir, store) = store();
		let bytes = encode(&vec![CorpusEntry::new("x", 1.0)]).unwrap();
		store.put(&ArtifactKey::Corpus("fra-000".into()), &bytes).unwrap();
		store.put(&ArtifactKey::Model("fra-000".into(), 1), &bytes).unwrap();
		store.put(&ArtifactKey::Model("fra-000".into(), 3), &bytes).unwrap();
		assert_eq!(store.identifiers().unwrap(), vec!["fra-000".to_string()]);

		store.remove_all("fra-000").unwrap();
		assert!(store.identifiers().unwrap().is_empty());
		assert!(matches!(store.remove_all("fra-000"), Err(SnapshotError::Absent)));
	}

	#[test]
	fn age_reflects_modification_time() {
		let (_dir, store) = store();
		let key = ArtifactKey::Corpus("deu-000".into());
		assert!(matches!(store.age(&key), Err(SnapshotError::Absent)));

		store.put(&key, &encode(&Vec::<CorpusEntry>::new()).unwrap()).unwrap();
		let file = fs::File::options().write(true).open(store.path(&key).unwrap()).unwrap();
		file.set_modified(SystemTime::now() - Duration::from_secs(700_000)).unwrap();

		let age = store.age(&key).unwrap();
		assert!(age >= Duration::from_secs(700_000));
		assert!(age < Duration::from_secs(700_060));
	}

	#[test]
	fn artifacts_lists_corpus_and_model_snapshots() {
		let (dir, store) = store();
		let bytes = encode(&vec![CorpusEntry::new("x", 1.0)]).unwrap();
		store.put(&ArtifactKey::Corpus("ita-000".into()), &bytes).unwrap();
		store.put(&ArtifactKey::Model("ita-000".into(), 2), &bytes).unwrap();
		fs::write(dir.path().join("ita-000/readme.txt"), "x").unwrap();

		let artifacts = store.artifacts("ita-000").unwrap();
		assert_eq!(artifacts.len(), 2);
		assert!(artifacts.contains(&ArtifactKey::Corpus("ita-000".into())));
		assert!(artifacts.contains(&ArtifactKey::Model("ita-000".into(), 2)));
		assert!(store.artifacts("spa-000").unwrap().is_empty());
	}

	#[test]
	fn unsafe_identifiers_are_refused() {
		let (_dir, store) = store();
		let key = ArtifactKey::Corpus("../outside".into());
		assert!(matches!(store.put(&key, b"EXG1x"), Err(SnapshotError::InvalidIdentifier(_))));
	}
}
