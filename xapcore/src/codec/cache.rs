use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use once_cell::sync::OnceCell;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};

/// Memoizes built values per key.
///
/// Each key owns a cell. The map lock is only held to find or insert that cell, never while
/// a value is being built, so builds of different keys run concurrently. Concurrent callers
/// of the same key wait on the cell and the value is built at most once. A failed build
/// leaves the cell empty and the next caller builds again.
pub struct CodecCache<K, V> {
    cells: RwLock<HashMap<K, Arc<OnceCell<V>>>>,
    builds: AtomicUsize,
}

impl<K, V> Default for CodecCache<K, V> {
    fn default() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            builds: AtomicUsize::new(0),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> CodecCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &K) -> Arc<OnceCell<V>> {
        let guard = self.cells.upgradable_read();
        if let Some(cell) = guard.get(key) {
            return cell.clone();
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.entry(key.clone()).or_default().clone()
    }

    /// Returns the value stored for `key`, calling `build` first if there is none.
    pub fn get_or_build<E>(&self, key: &K, build: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let cell = self.cell(key);
        cell.get_or_try_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            build()
        })
        .cloned()
    }

    /// Returns the value stored for `key` without building it.
    pub fn peek(&self, key: &K) -> Option<V> {
        self.cells.read().get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.peek(key).is_some()
    }

    /// Number of built values.
    pub fn len(&self) -> usize {
        self.cells
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times a build was started, failed builds included.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_concurrent_callers_build_once() {
        let cache: CodecCache<&'static str, Arc<String>> = CodecCache::new();

        let values: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        cache
                            .get_or_build(&"key", || {
                                thread::sleep(Duration::from_millis(10));
                                Ok::<_, ()>(Arc::new("value".to_string()))
                            })
                            .expect("build never fails")
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect()
        });

        assert_eq!(cache.builds(), 1);
        assert!(values.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[test]
    fn test_failed_build_is_retried() {
        let cache: CodecCache<u32, u32> = CodecCache::new();

        let err = cache.get_or_build(&7, || Err("boom"));
        assert_eq!(err, Err("boom"));
        assert!(!cache.contains(&7));
        assert!(cache.is_empty());

        let value = cache.get_or_build(&7, || Ok::<_, &str>(42));
        assert_eq!(value, Ok(42));
        assert_eq!(cache.peek(&7), Some(42));
        assert_eq!(cache.builds(), 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let cache: CodecCache<u32, u32> = CodecCache::new();
        for key in 0..4 {
            let value = cache
                .get_or_build(&key, || Ok::<_, ()>(key * 10))
                .expect("build never fails");
            assert_eq!(value, key * 10);
        }
        assert_eq!(cache.len(), 4);
    }
}
