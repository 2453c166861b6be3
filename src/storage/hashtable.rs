use std::collections::hash_map::DefaultHasher;
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Directory growth stops at this depth. A bucket that is still full when
/// its local depth reaches the cap means the colliding keys share too long
/// a hash suffix to ever separate, so the insert fails instead of looping.
const MAX_GLOBAL_DEPTH: u32 = 16;

/// A bucket holds up to the table's bucket_size key/value pairs with unique
/// keys. local_depth is the number of low hash bits shared by every key the
/// bucket can receive.
struct Bucket<K, V> {
    local_depth: u32,
    items: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V>
where
    K: Eq,
    V: Copy,
{
    fn new(local_depth: u32) -> Self {
        Bucket { local_depth, items: Vec::new() }
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }
}

/// ExtendibleHashTable maps keys to values through a directory of hash
/// suffixes. The directory has 2^global_depth slots, each referencing a
/// bucket; a bucket of local depth l is shared by exactly 2^(global - l)
/// slots, the ones whose low l bits agree. A full bucket splits into two
/// buckets one bit deeper, doubling the directory first when the split
/// needs a bit the directory does not discriminate yet.
///
/// Buckets live in an arena and the directory stores arena indexes. That is
/// the index-based equivalent of sharing bucket references from every
/// directory slot, and it keeps the table Send without reference counting.
///
/// Empty buckets are retained; the table never merges buckets on removal.
pub struct ExtendibleHashTable<K, V, S = BuildHasherDefault<DefaultHasher>> {
    global_depth: u32,
    bucket_size: usize,
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    hash_builder: S,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Copy,
{
    pub fn new(bucket_size: usize) -> Self {
        Self::with_hasher(bucket_size, BuildHasherDefault::default())
    }
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Hash + Eq,
    V: Copy,
    S: BuildHasher,
{
    pub fn with_hasher(bucket_size: usize, hash_builder: S) -> Self {
        assert!(bucket_size > 0, "bucket size should be larger than zero");
        ExtendibleHashTable {
            global_depth: 0,
            bucket_size,
            dir: vec![0],
            buckets: vec![Bucket::new(0)],
            hash_builder,
        }
    }

    /// Directory slot of the key: the low global_depth bits of its hash.
    fn index_of(&self, key: &K) -> usize {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & ((1 << self.global_depth) - 1)
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> u32 {
        self.buckets[self.dir[dir_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Find the value associated with the key.
    pub fn find(&self, key: &K) -> Option<V> {
        self.buckets[self.dir[self.index_of(key)]].find(key)
    }

    /// Remove the entry of the key, return whether a deletion occurred.
    pub fn remove(&mut self, key: &K) -> bool {
        let slot = self.index_of(key);
        let bucket_id = self.dir[slot];
        self.buckets[bucket_id].remove(key)
    }

    /// Insert a key/value pair, overwriting the value of an existing key.
    /// A full target bucket splits into two buckets one bit deeper and its
    /// items are re-inserted through the normal path; the pair then retries
    /// on the grown table. Splits cascade when the redistributed items keep
    /// colliding, so the retry is a work list rather than recursion.
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        let mut pending = vec![(key, value)];
        while let Some((key, value)) = pending.pop() {
            let slot = self.index_of(&key);
            let bucket_id = self.dir[slot];
            let bucket = &mut self.buckets[bucket_id];

            if let Some(item) = bucket.items.iter_mut().find(|(k, _)| k == &key) {
                item.1 = value;
                continue;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                continue;
            }
            if bucket.local_depth >= MAX_GLOBAL_DEPTH {
                return Err(Error::CapacityExhausted);
            }
            let items = self.split(slot);
            pending.push((key, value));
            pending.extend(items);
        }
        Ok(())
    }

    /// Split the bucket referenced by directory slot `slot` into two buckets
    /// of one deeper local depth, growing the directory first when the new
    /// depth exceeds the global depth. Returns the split bucket's items for
    /// re-insertion by the caller.
    fn split(&mut self, slot: usize) -> Vec<(K, V)> {
        let old_id = self.dir[slot];
        let old_depth = self.buckets[old_id].local_depth;

        if old_depth + 1 > self.global_depth {
            // Double the directory by appending a copy of itself. Slots that
            // differ only in the new high bit keep referencing the same
            // bucket until the reassignment below.
            let copy = self.dir.clone();
            self.dir.extend(copy);
            self.global_depth += 1;
        }

        // The split bucket's arena index becomes the low child and the high
        // child is appended, so every split grows the bucket count by one.
        let items = std::mem::take(&mut self.buckets[old_id].items);
        self.buckets[old_id].local_depth = old_depth + 1;
        self.buckets.push(Bucket::new(old_depth + 1));
        let high_id = self.buckets.len() - 1;

        // Reassign every slot that referenced the split bucket, i.e. the
        // slots sharing its low old_depth bits; bit old_depth of the slot
        // index picks the child.
        let low_bits = slot & ((1 << old_depth) - 1);
        let step = 1 << old_depth;
        let mut i = low_bits;
        while i < self.dir.len() {
            self.dir[i] = if i & step == 0 { old_id } else { high_id };
            i += step;
        }

        items
    }
}

/// Thread-safe extendible hash table; every operation takes the table's
/// exclusive lock, the heavy lifting happens in the ExtendibleHashTable.
pub struct SyncExtendibleHashTable<K, V> {
    inner: Mutex<ExtendibleHashTable<K, V>>,
}

impl<K, V> SyncExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Copy,
{
    pub fn new(bucket_size: usize) -> Self {
        SyncExtendibleHashTable { inner: Mutex::new(ExtendibleHashTable::new(bucket_size)) }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let guard = self.inner.lock().unwrap();
        guard.find(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut guard = self.inner.lock().unwrap();
        guard.remove(key)
    }

    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut guard = self.inner.lock()?;
        guard.insert(key, value)
    }

    pub fn global_depth(&self) -> u32 {
        let guard = self.inner.lock().unwrap();
        guard.global_depth()
    }

    pub fn num_buckets(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.num_buckets()
    }
}
