use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};
use sha2::{Digest, Sha256};

use super::{CacheEngine, CacheEntry, Clock};
use crate::exception::Exception;

const CACHE_EXTENSION: &str = "cache";

/// 以文件形式保存的缓存后端。
///
/// 每个 key 对应目录下的一个 `<sha256(key)>.cache` 文件，内容为条目列表的 JSON。
pub struct FileEngine {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    // 串行化同一进程内的读改写
    write_lock: Mutex<()>,
}

impl FileEngine {
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, Exception> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!("创建缓存目录: {}", dir.display());
        }
        Ok(Self {
            dir,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(key), CACHE_EXTENSION))
    }

    fn read_entries(path: &Path) -> Result<Vec<CacheEntry>, Exception> {
        if !path.is_file() {
            return Ok(vec![]);
        }
        let contents = fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }
}

/// 文件名取 key 的摘要：不同 key 不共用文件，任意字符都不会进入路径
fn file_stem(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl CacheEngine for FileEngine {
    fn add(&self, key: &str, value: serde_json::Value, ttl: u64) -> Result<(), Exception> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let path = self.path_for(key);
        let mut entries = Self::read_entries(&path)?;
        entries.push(CacheEntry::new(value, ttl, self.clock.now()));
        fs::write(&path, serde_json::to_vec(&entries)?)?;
        debug!("写入缓存文件: {}", path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<CacheEntry>, Exception> {
        let now = self.clock.now();
        let entries = Self::read_entries(&self.path_for(key))?;
        Ok(entries.into_iter().filter(|e| !e.is_expired(now)).collect())
    }

    fn flush(&self) -> Result<(), Exception> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |e| e == CACHE_EXTENSION) {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!("清空文件缓存，删除 {} 个文件", removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use serde_json::json;

    fn engine() -> (tempfile::TempDir, FileEngine, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = FileEngine::new(dir.path().join("cache"), clock.clone()).unwrap();
        (dir, engine, clock)
    }

    #[test]
    fn test_creates_directory() {
        let (_dir, engine, _) = engine();
        assert!(engine.dir().is_dir());
    }

    #[test]
    fn test_add_appends_and_persists() {
        let (_dir, engine, _) = engine();
        engine.add("user:1", json!({"name": "a"}), 0).unwrap();
        engine.add("user:1", json!({"name": "b"}), 0).unwrap();

        assert!(engine.dir().join(format!("{}.cache", file_stem("user:1"))).is_file());
        let entries = engine.get("user:1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].value, json!({"name": "b"}));
    }

    #[test]
    fn test_expired_entries_are_filtered() {
        let (_dir, engine, clock) = engine();
        engine.add("k", json!(1), 5).unwrap();
        clock.advance(6);
        assert!(engine.get("k").unwrap().is_empty());
    }

    #[test]
    fn test_missing_key_is_empty() {
        let (_dir, engine, _) = engine();
        assert!(engine.get("absent").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let (_dir, engine, _) = engine();
        fs::write(engine.dir().join(format!("{}.cache", file_stem("broken"))), "not json").unwrap();
        assert!(matches!(engine.get("broken"), Err(Exception::Json(_))));
    }

    #[test]
    fn test_flush_only_removes_cache_files() {
        let (_dir, engine, _) = engine();
        engine.add("a", json!(1), 0).unwrap();
        engine.add("b", json!(2), 0).unwrap();
        fs::write(engine.dir().join("keep.txt"), "x").unwrap();

        engine.flush().unwrap();
        assert!(engine.get("a").unwrap().is_empty());
        assert!(engine.dir().join("keep.txt").is_file());
    }

    #[test]
    fn test_similar_keys_stay_distinct() {
        let (_dir, engine, _) = engine();
        engine.add("user:1", json!("alice"), 0).unwrap();
        assert!(engine.get("user/1").unwrap().is_empty());
        assert!(engine.get("user_1").unwrap().is_empty());
        assert_eq!(engine.get("user:1").unwrap().len(), 1);
    }

    #[test]
    fn test_key_never_escapes_directory() {
        let (dir, engine, _) = engine();
        engine.add("../outside", json!(1), 0).unwrap();
        assert!(!dir.path().join("outside.cache").exists());
        assert_eq!(fs::read_dir(engine.dir()).unwrap().count(), 1);
    }

    #[test]
    fn test_empty_key_is_flushed() {
        let (_dir, engine, _) = engine();
        engine.add("", json!(1), 0).unwrap();
        assert_eq!(engine.get("").unwrap().len(), 1);
        engine.flush().unwrap();
        assert!(engine.get("").unwrap().is_empty());
        assert_eq!(fs::read_dir(engine.dir()).unwrap().count(), 0);
    }
}
