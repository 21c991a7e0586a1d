use std::sync::{Arc, Mutex};

use log::{debug, info};

use super::{CacheEngine, CacheEntry, Clock};
use crate::exception::Exception;

/// Redis 缓存后端。
///
/// 每个 key 对应一个列表，条目以 JSON 形式 `RPUSH`。列表本身的过期时间取
/// 所有条目中最长的一个，读取时仍按条目各自的 ttl 过滤。
pub struct RedisEngine {
    connection: Mutex<redis::Connection>,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisEngine {
    pub fn connect(url: &str, prefix: &str, clock: Arc<dyn Clock>) -> Result<Self, Exception> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection()?;
        info!("已连接 Redis 缓存，前缀: {}", prefix);
        Ok(Self {
            connection: Mutex::new(connection),
            prefix: prefix.to_string(),
            clock,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn connection(&self) -> std::sync::MutexGuard<'_, redis::Connection> {
        self.connection.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl CacheEngine for RedisEngine {
    fn add(&self, key: &str, value: serde_json::Value, ttl: u64) -> Result<(), Exception> {
        let key = self.full_key(key);
        let entry = CacheEntry::new(value, ttl, self.clock.now());
        let payload = serde_json::to_string(&entry)?;
        let mut con = self.connection();

        // -2 表示 key 不存在，-1 表示没有过期时间
        let remaining: i64 = redis::cmd("TTL").arg(&key).query(&mut *con)?;
        redis::cmd("RPUSH").arg(&key).arg(payload).query::<()>(&mut *con)?;
        if ttl == 0 {
            redis::cmd("PERSIST").arg(&key).query::<()>(&mut *con)?;
        } else if remaining == -2 || (remaining >= 0 && ttl as i64 > remaining) {
            redis::cmd("EXPIRE").arg(&key).arg(ttl).query::<()>(&mut *con)?;
        }
        debug!("写入 Redis 缓存: {}", key);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<CacheEntry>, Exception> {
        let key = self.full_key(key);
        let raw: Vec<String> = redis::cmd("LRANGE")
            .arg(&key)
            .arg(0)
            .arg(-1)
            .query(&mut *self.connection())?;
        let now = self.clock.now();
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            let entry: CacheEntry = serde_json::from_str(&item)?;
            if !entry.is_expired(now) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn flush(&self) -> Result<(), Exception> {
        let mut con = self.connection();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", self.prefix))
            .query(&mut *con)?;
        if !keys.is_empty() {
            redis::cmd("DEL").arg(&keys).query::<()>(&mut *con)?;
        }
        info!("清空 Redis 缓存，删除 {} 个 key", keys.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use serde_json::json;

    fn engine(prefix: &str) -> RedisEngine {
        RedisEngine::connect("redis://127.0.0.1:6379/", prefix, Arc::new(SystemClock)).unwrap()
    }

    #[test]
    fn test_connect_to_invalid_url_fails() {
        let result = RedisEngine::connect("not-a-url", "x_", Arc::new(SystemClock));
        assert!(matches!(result, Err(Exception::Redis(_))));
    }

    #[test]
    #[ignore = "需要本地 Redis 服务"]
    fn test_add_get_flush() {
        let engine = engine("webframe_test_");
        engine.flush().unwrap();
        engine.add("k", json!("a"), 0).unwrap();
        engine.add("k", json!("b"), 60).unwrap();
        let values: Vec<_> = engine.get("k").unwrap().into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec![json!("a"), json!("b")]);

        engine.flush().unwrap();
        assert!(engine.get("k").unwrap().is_empty());
    }
}
