use std::collections::HashMap;
use std::hash::Hash;

/// Bounded least-frequently-used cache.
///
/// Every `get` hit and every `insert` counts as a use of the key. When a new
/// key is inserted into a full cache, the entry with the fewest uses is
/// evicted; ties go to the entry inserted first.
///
/// Values are replaced whole, never mutated in place. The cache itself is
/// not synchronized; the model store guards it with a mutex.
#[derive(Debug)]
pub struct LfuCache<K, V> {
	capacity: usize,
	entries: HashMap<K, Slot<V>>,
	clock: u64,
}

#[derive(Debug)]
struct Slot<V> {
	value: V,
	uses: u64,
	inserted: u64,
}

impl<K: Eq + Hash + Clone, V> LfuCache<K, V> {
	/// Creates an empty cache. A capacity of 0 disables caching.
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			entries: HashMap::with_capacity(capacity),
			clock: 0,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.entries.contains_key(key)
	}

	/// Looks up `key` and records the use.
	pub fn get(&mut self, key: &K) -> Option<&V> {
		let slot = self.entries.get_mut(key)?;
		slot.uses += 1;
		Some(&slot.value)
	}

	/// Inserts or replaces `key`, returning the evicted entry if any.
	pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
		if self.capacity == 0 {
			return Some((key, value));
		}

		if let Some(slot) = self.entries.get_mut(&key) {
			slot.value = value;
			slot.uses += 1;
			return None;
		}

		let evicted = if self.entries.len() >= self.capacity { self.evict() } else { None };

		self.clock += 1;
		self.entries.insert(key, Slot { value, uses: 1, inserted: self.clock });
		evicted
	}

	pub fn remove(&mut self, key: &K) -> Option<V> {
		self.entries.remove(key).map(|slot| slot.value)
	}

	/// Removes every entry whose key does not satisfy `keep`.
	/// Returns the number of removed entries.
	pub fn retain<F: FnMut(&K) -> bool>(&mut self, mut keep: F) -> usize {
		let before = self.entries.len();
		self.entries.retain(|key, _| keep(key));
		before - self.entries.len()
	}

	pub fn keys(&self) -> impl Iterator<Item = &K> {
		self.entries.keys()
	}

	fn evict(&mut self) -> Option<(K, V)> {
		let victim = self
			.entries
			.iter()
			.min_by_key(|(_, slot)| (slot.uses, slot.inserted))
			.map(|(key, _)| key.clone())?;
		self.entries.remove(&victim).map(|slot| (victim, slot.value))
	}
}
