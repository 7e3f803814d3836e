//! An LRU (Least Recently Used) cache of opened indexes.
//!
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    codec::{self, Variant},
    collection::CollectionIndex,
    errors::Result,
};

/// An LRU (least recently used) cache.
///
/// Values must implement ``Cacheable``, which self reports size, intended to be the number of
/// bytes (more or less) an object takes up in memory. For indexes we use the size of the encoded
/// header, which is close enough to the size of the decoded structure.
///
/// The ``limit`` is passed in when instantiating the Cache. When an object is added to the cache
/// which causes the total size of objects stored in the cache to exceed the limit, objects are
/// evicted from the cache until the total size is back under the limit. Objects are evicted in
/// least recently used order.
///
/// The ``Cache`` is thread safe. When interrogating the cache with ``get``, a ``load`` function
/// is passed in to load the object in the event of a cache miss. If several threads miss on the
/// same key at once, only one of them loads it and the others wait for the result. Failed loads
/// are not cached.
///
pub struct Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Cacheable,
{
    /// The actual cache
    recent: Mutex<Entries<K, V>>,

    /// One lock per key currently being loaded
    loaders: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

/// A trait for objects that can be cached
///
/// Cacheable objects must be able to self report their size via the ``size`` method.
///
pub trait Cacheable: Sized {
    /// Return the number of bytes in the serialized representation
    fn size(&self) -> u64;
}

/// A structure containing the entries stored in this cache.
///
/// Entries are directly accessible via ``map`` and also stored in a doubly
/// linked list where ``most_recent`` and ``least_recent`` are the two ends.
///
struct Entries<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Cacheable,
{
    /// Sum of sizes of all entries must stay below this limit.
    limit: u64,

    /// Current sum of sizes of all entries.
    size: u64,

    /// Direct mapping from key to cache entry
    map: HashMap<K, CacheEntry<K, V>>,

    /// The most recently used key
    most_recent: Option<K>,

    /// The least recently used key
    least_recent: Option<K>,
}

/// An entry in the cache
struct CacheEntry<K, V> {
    /// The object stored by this entry
    object: Arc<V>,

    /// The next more recent key
    more_recent: Option<K>,

    /// The next less recent key
    less_recent: Option<K>,

    /// The size of this entry, as reported by the object's ``Cacheable::size`` method
    size: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Cacheable,
{
    /// Instantiate an empty cache with given size limit.
    ///
    pub fn new(limit: u64) -> Self {
        let recent = Mutex::new(Entries {
            limit,
            size: 0,
            map: HashMap::new(),
            most_recent: None,
            least_recent: None,
        });
        let loaders = Mutex::new(HashMap::new());

        Self { recent, loaders }
    }

    /// Get an object by key
    ///
    /// If object isn't in the cache, will call ``load`` to load the object and then store it in
    /// the cache. If the same object is already being loaded in another thread, this will wait for
    /// that load to finish.
    ///
    pub fn get<L>(&self, key: &K, load: L) -> Result<Arc<V>>
    where
        L: FnOnce(&K) -> Result<V>,
    {
        if let Some(object) = self.lookup(key) {
            return Ok(object);
        }

        let loader = Arc::clone(self.loaders.lock().entry(key.clone()).or_default());
        let _loading = loader.lock();

        // Another thread may have loaded it while we waited
        if let Some(object) = self.lookup(key) {
            return Ok(object);
        }

        let result = load(key).map(|object| {
            let object = Arc::new(object);
            self.recent.lock().insert(key.clone(), &object);
            object
        });
        self.loaders.lock().remove(key);

        result
    }

    /// Drop an object from the cache, if it is there.
    ///
    pub fn remove(&self, key: &K) {
        let mut entries = self.recent.lock();
        if let Some(entry) = entries.remove(key) {
            entries.size -= entry.size;
        }
    }

    /// Check if an object is already stored in the cache. If it is, move it to the most recently
    /// used position in the linked list and then return a new reference to it.
    ///
    fn lookup(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.recent.lock();
        let entry = entries.remove(key)?;
        let object = Arc::clone(&entry.object);
        entries.push_most_recent(key.clone(), entry);

        Some(object)
    }
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Cacheable,
{
    /// Put an entry, not currently linked, at the most recently used end of the linked list.
    ///
    fn push_most_recent(&mut self, key: K, mut entry: CacheEntry<K, V>) {
        let old_head = self.most_recent.replace(key.clone());
        if let Some(old_head) = &old_head {
            if let Some(head) = self.map.get_mut(old_head) {
                head.more_recent = Some(key.clone());
            }
        }
        if self.least_recent.is_none() {
            // This is only object in the list, so it is also the tail
            self.least_recent = Some(key.clone());
        }

        entry.more_recent = None;
        entry.less_recent = old_head;
        self.map.insert(key, entry);
    }

    /// Unlink an entry and remove it from the map. Doesn't adjust ``size``.
    ///
    fn remove(&mut self, key: &K) -> Option<CacheEntry<K, V>> {
        let entry = self.map.remove(key)?;
        if self.most_recent.as_ref() == Some(key) {
            self.most_recent = entry.less_recent.clone();
        }
        if self.least_recent.as_ref() == Some(key) {
            self.least_recent = entry.more_recent.clone();
        }
        if let Some(less_recent) = &entry.less_recent {
            if let Some(neighbor) = self.map.get_mut(less_recent) {
                neighbor.more_recent = entry.more_recent.clone();
            }
        }
        if let Some(more_recent) = &entry.more_recent {
            if let Some(neighbor) = self.map.get_mut(more_recent) {
                neighbor.less_recent = entry.less_recent.clone();
            }
        }

        Some(entry)
    }

    /// Add a new object to the cache.
    ///
    /// If the addition of this object causes ``size`` to exceed ``limit``, entries will be evicted
    /// until ``size`` is at or below ``limit`` again before returning.
    ///
    fn insert(&mut self, key: K, object: &Arc<V>) {
        if let Some(old) = self.remove(&key) {
            self.size -= old.size;
        }

        let entry = CacheEntry {
            object: Arc::clone(object),
            more_recent: None,
            less_recent: None,
            size: object.size(),
        };
        self.size += entry.size;
        self.push_most_recent(key, entry);

        // Enforce size limit by removing objects from tail (least recent) until size is within
        // limit
        while self.size > self.limit {
            let evicted = match self.least_recent.clone() {
                Some(tail) => self.remove(&tail),
                None => None,
            };
            match evicted {
                Some(evicted) => self.size -= evicted.size,
                None => break,
            }
        }
    }
}

/// Opened indexes, keyed by path.
///
/// Indexes are immutable once read, so a cached index stays valid until the file at its path is
/// rewritten. Callers that rewrite an index should ``invalidate`` it.
///
pub struct IndexCache {
    cache: Cache<PathBuf, CollectionIndex>,
}

impl IndexCache {
    pub fn new(limit: u64) -> Self {
        Self {
            cache: Cache::new(limit),
        }
    }

    /// Get the index at `path`, reading it on a miss.
    ///
    pub fn get(&self, path: &Path, variant: Variant) -> Result<Arc<CollectionIndex>> {
        self.cache.get(&path.to_path_buf(), |path| {
            debug!(path = %path.display(), %variant, "index cache miss");
            codec::read_index(path, variant)
        })
    }

    pub fn invalidate(&self, path: &Path) {
        self.cache.remove(&path.to_path_buf());
    }
}
