use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::contact::ContactKey;

const DEFAULT_SHARD_COUNT: usize = 16;

/// Lock-striped per-contact map. Each closure runs under a single shard lock,
/// so callers must never hold it across an await point.
#[derive(Debug)]
pub(crate) struct KeyedShards<V> {
    shards: Vec<Mutex<HashMap<ContactKey, V>>>,
}

impl<V> Default for KeyedShards<V> {
    fn default() -> Self {
        Self::with_shard_count(DEFAULT_SHARD_COUNT)
    }
}

impl<V> KeyedShards<V> {
    pub(crate) fn with_shard_count(count: usize) -> Self {
        let count = count.max(1);
        Self {
            shards: (0..count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    pub(crate) fn with_key<R>(
        &self,
        key: &ContactKey,
        apply: impl FnOnce(&mut HashMap<ContactKey, V>) -> R,
    ) -> R {
        let mut shard = self.lock_shard(self.shard_index(key));
        apply(&mut shard)
    }

    pub(crate) fn for_each_shard(&self, mut apply: impl FnMut(&mut HashMap<ContactKey, V>)) {
        for index in 0..self.shards.len() {
            let mut shard = self.lock_shard(index);
            apply(&mut shard);
        }
    }

    pub(crate) fn len(&self) -> usize {
        let mut total = 0;
        self.for_each_shard(|shard| total += shard.len());
        total
    }

    fn shard_index(&self, key: &ContactKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn lock_shard(&self, index: usize) -> MutexGuard<'_, HashMap<ContactKey, V>> {
        // A panic inside a closure leaves plain map data behind; keep serving it.
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
