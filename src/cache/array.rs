use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use lru::LruCache;

use super::{CacheEngine, CacheEntry, Clock};
use crate::exception::Exception;

/// 进程内存中的缓存后端。
///
/// 以 key 为单位做 LRU 淘汰，容量为可同时保存的 key 数量。
pub struct ArrayEngine {
    cache: Mutex<LruCache<String, Vec<CacheEntry>>>,
    clock: Arc<dyn Clock>,
}

impl ArrayEngine {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Result<Self, Exception> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            Exception::Config("cache.memory.capacity must be greater than 0".to_string())
        })?;
        Ok(Self {
            cache: Mutex::new(LruCache::new(capacity)),
            clock,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Vec<CacheEntry>>> {
        match self.cache.lock() {
            Ok(lock) => lock,
            Err(poisoned) => {
                warn!("缓存锁被污染，恢复并继续");
                poisoned.into_inner()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheEngine for ArrayEngine {
    fn add(&self, key: &str, value: serde_json::Value, ttl: u64) -> Result<(), Exception> {
        let entry = CacheEntry::new(value, ttl, self.clock.now());
        let mut cache = self.lock();
        match cache.get_mut(key) {
            Some(entries) => entries.push(entry),
            None => {
                if let Some((evicted, _)) = cache.push(key.to_string(), vec![entry]) {
                    if evicted != key {
                        debug!("内存缓存已满，淘汰 key: {}", evicted);
                    }
                }
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<CacheEntry>, Exception> {
        let now = self.clock.now();
        let mut cache = self.lock();
        Ok(match cache.get(key) {
            Some(entries) => entries
                .iter()
                .filter(|e| !e.is_expired(now))
                .cloned()
                .collect(),
            None => vec![],
        })
    }

    fn flush(&self) -> Result<(), Exception> {
        self.lock().clear();
        Ok(())
    }
}
