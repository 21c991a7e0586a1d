use super::{CacheEngine, CacheEntry};
use crate::exception::Exception;

/// 什么都不保存的后端，用于关闭缓存
pub struct NullEngine;

impl CacheEngine for NullEngine {
    fn add(&self, _key: &str, _value: serde_json::Value, _ttl: u64) -> Result<(), Exception> {
        Ok(())
    }

    fn get(&self, _key: &str) -> Result<Vec<CacheEntry>, Exception> {
        Ok(vec![])
    }

    fn flush(&self) -> Result<(), Exception> {
        Ok(())
    }
}
