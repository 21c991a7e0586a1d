//! # 缓存模块
//!
//! 统一的 key -> 条目列表 存储接口。`add` 总是向 key 对应的列表追加条目，
//! `get` 只返回未过期的条目（`ttl = 0` 表示永不过期）。
//!
//! 后端由 `cache.driver` 选择：`file`（默认）、`memory`、`redis`、`null`。

pub mod array;
pub mod file;
pub mod memo;
pub mod null;
pub mod redis_engine;

pub use array::ArrayEngine;
pub use file::FileEngine;
pub use memo::{method_key, route_key, CachePolicy, Memoizer};
pub use null::NullEngine;
pub use redis_engine::RedisEngine;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::{config::Config, exception::Exception};

/// 缓存中的单个条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    /// 存活秒数，0 表示永不过期
    pub ttl: u64,
    /// 写入时的 Unix 时间戳（秒）
    pub stored_at: i64,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, ttl: u64, now: i64) -> Self {
        Self {
            value,
            ttl,
            stored_at: now,
        }
    }

    /// `now - stored_at > ttl` 且 `ttl > 0` 时视为过期
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl > 0 && now - self.stored_at > self.ttl as i64
    }
}

/// 缓存后端需要实现的能力集合
pub trait CacheEngine: Send + Sync {
    fn add(&self, key: &str, value: serde_json::Value, ttl: u64) -> Result<(), Exception>;
    fn get(&self, key: &str) -> Result<Vec<CacheEntry>, Exception>;
    fn flush(&self) -> Result<(), Exception>;
}

/// 缓存读取的时间来源
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// 手动拨动的时钟，测试中用来固定“当前时间”
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// 按配置创建缓存后端
pub fn create(config: &Config) -> Result<Arc<dyn CacheEngine>, Exception> {
    create_with_clock(config, Arc::new(SystemClock))
}

pub fn create_with_clock(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CacheEngine>, Exception> {
    let driver = config.get_str("cache.driver", "file");
    info!("缓存后端: {}", driver);
    let engine: Arc<dyn CacheEngine> = match driver.as_str() {
        "file" => {
            let path = config.get_str("cache.file.path", "tmp/cache");
            Arc::new(FileEngine::new(path, clock)?)
        }
        "memory" => {
            let capacity = config.get_or("cache.memory.capacity", 1024usize);
            Arc::new(ArrayEngine::new(capacity, clock)?)
        }
        "redis" => {
            let host = config.get_str("cache.redis.host", "127.0.0.1");
            let port = config.get_or("cache.redis.port", 6379u16);
            let password = config.get_str("cache.redis.password", "");
            let prefix = config.get_str("cache.redis.prefix", "cache_");
            let url = if password.is_empty() {
                format!("redis://{}:{}/", host, port)
            } else {
                format!("redis://:{}@{}:{}/", password, host, port)
            };
            Arc::new(RedisEngine::connect(&url, &prefix, clock)?)
        }
        "null" => Arc::new(NullEngine),
        other => return Err(Exception::UnsupportedCacheDriver(other.to_string())),
    };
    Ok(engine)
}
