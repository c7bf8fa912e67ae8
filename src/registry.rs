//! Process-wide cache of loaded stores.
//!
//! Loading a large lexicon is expensive, so gazetteers that ask for the same configuration
//! share one [`GazStore`]. The cache counts the handles it gave out for each key and drops a
//! store when the last [`SharedStore`] for it is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::errors::Result;
use crate::store::GazStore;

static GLOBAL: Lazy<StoreCache> = Lazy::new(StoreCache::new);

/// Identity of a loaded configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: String,
    case_sensitive: bool,
    locale: String,
}

impl CacheKey {
    /// Creates a key from the config location, case sensitivity, and locale.
    pub fn new<S, L>(source: S, case_sensitive: bool, locale: L) -> Self
    where
        S: Into<String>,
        L: Into<String>,
    {
        Self {
            source: source.into(),
            case_sensitive,
            locale: locale.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "cs={} url={} lang={}",
            self.case_sensitive, self.source, self.locale
        )
    }
}

struct Entry {
    store: Arc<GazStore>,
    refs: usize,
}

/// Reference-counted stores keyed by [`CacheKey`].
///
/// All lookups and updates happen under one lock, including the load of a missing store, so
/// two callers never build the same store twice.
#[derive(Clone, Default)]
pub struct StoreCache {
    entries: Arc<Mutex<FxHashMap<CacheKey, Entry>>>,
}

impl StoreCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache shared by the whole process.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Returns the store for `key`, calling `load` if it is not cached yet.
    ///
    /// # Errors
    ///
    /// Errors from `load` are returned and nothing is cached.
    pub fn acquire<F>(&self, key: CacheKey, load: F) -> Result<SharedStore>
    where
        F: FnOnce() -> Result<GazStore>,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            tracing::debug!(key = %key, refs = entry.refs, "reusing gazetteer store");
            return Ok(SharedStore {
                store: Arc::clone(&entry.store),
                lease: Some((self.clone(), key)),
            });
        }
        let store = Arc::new(load()?);
        tracing::debug!(key = %key, "cached gazetteer store");
        entries.insert(
            key.clone(),
            Entry {
                store: Arc::clone(&store),
                refs: 1,
            },
        );
        Ok(SharedStore {
            store,
            lease: Some((self.clone(), key)),
        })
    }

    /// Drops one reference to the store for `key`. Returns `true` if the entry was evicted.
    fn release(&self, key: &CacheKey, store: &Arc<GazStore>) -> bool {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        // A handle obtained before a forced removal must not touch its replacement.
        if !Arc::ptr_eq(&entry.store, store) {
            return false;
        }
        entry.refs -= 1;
        if entry.refs == 0 {
            entries.remove(key);
            tracing::debug!(key = %key, "released gazetteer store");
            true
        } else {
            false
        }
    }

    /// Evicts `key` regardless of outstanding handles, so the next acquire reloads it.
    /// Returns `true` if an entry was removed.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Returns the number of handles given out for `key`.
    pub fn ref_count(&self, key: &CacheKey) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.refs)
    }

    /// Returns the number of cached stores.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Checks if no store is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for StoreCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StoreCache")
            .field("len", &self.len())
            .finish()
    }
}

/// A handle to a compacted store, possibly shared through a [`StoreCache`].
pub struct SharedStore {
    store: Arc<GazStore>,
    lease: Option<(StoreCache, CacheKey)>,
}

impl SharedStore {
    /// Wraps a store that is not registered in any cache.
    pub fn detached(store: GazStore) -> Self {
        Self {
            store: Arc::new(store),
            lease: None,
        }
    }

    /// Returns the cache key, if the store came from a cache.
    pub fn key(&self) -> Option<&CacheKey> {
        self.lease.as_ref().map(|(_, key)| key)
    }
}

impl Deref for SharedStore {
    type Target = GazStore;

    fn deref(&self) -> &GazStore {
        &self.store
    }
}

impl Drop for SharedStore {
    fn drop(&mut self) {
        if let Some((cache, key)) = self.lease.take() {
            cache.release(&key, &self.store);
        }
    }
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SharedStore")
            .field("key", &self.key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::features::FeatureMap;

    fn tiny() -> Result<GazStore> {
        let mut store = GazStore::new();
        let list = store.add_list_info("Lookup", "tiny", FeatureMap::new()).unwrap();
        store.add_lookup("tiny", list, &[("k", "v")])?;
        store.compact()?;
        Ok(store)
    }

    #[test]
    fn test_share_and_release() {
        let cache = StoreCache::new();
        let key = CacheKey::new("/tmp/a.def", true, "en");
        let mut loads = 0;
        let a = cache
            .acquire(key.clone(), || {
                loads += 1;
                tiny()
            })
            .unwrap();
        let b = cache
            .acquire(key.clone(), || {
                loads += 1;
                tiny()
            })
            .unwrap();
        assert_eq!(loads, 1);
        assert!(std::ptr::eq(&*a, &*b));
        assert_eq!(cache.ref_count(&key), 2);

        drop(a);
        assert_eq!(cache.ref_count(&key), 1);
        drop(b);
        assert_eq!(cache.ref_count(&key), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_differ_by_case_and_locale() {
        let cache = StoreCache::new();
        let _a = cache.acquire(CacheKey::new("x", true, "en"), tiny).unwrap();
        let _b = cache.acquire(CacheKey::new("x", false, "en"), tiny).unwrap();
        let _c = cache.acquire(CacheKey::new("x", false, "de"), tiny).unwrap();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let cache = StoreCache::new();
        let key = CacheKey::new("bad", true, "en");
        let res = cache.acquire(key.clone(), || {
            Err(crate::errors::GazetteerError::config("config", "broken"))
        });
        assert!(res.is_err());
        assert_eq!(cache.ref_count(&key), 0);
    }

    #[test]
    fn test_forced_removal() {
        let cache = StoreCache::new();
        let key = CacheKey::new("y", true, "en");
        let old = cache.acquire(key.clone(), tiny).unwrap();
        assert!(cache.remove(&key));
        let new = cache.acquire(key.clone(), tiny).unwrap();
        assert!(!std::ptr::eq(&*old, &*new));
        drop(old);
        assert_eq!(cache.ref_count(&key), 1);
        drop(new);
        assert!(cache.is_empty());
    }
}
