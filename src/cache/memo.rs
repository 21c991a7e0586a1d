//! 方法级与路由级的结果缓存。
//!
//! 方法级 key：`cache_{类型}_{方法}_{sha256(json(参数))}`；
//! 路由级 key：`route_{类型}_{方法}_{sha256(json({path, get}))}`。
//! 命中时取列表中最新的未过期条目。

use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_derive::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use super::CacheEngine;
use crate::exception::Exception;

/// 缓存指令：存活秒数与可选的固定 key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub ttl: u64,
    pub key: Option<String>,
}

impl CachePolicy {
    pub fn ttl(ttl: u64) -> Self {
        Self { ttl, key: None }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn method_key<A: Serialize + ?Sized>(
    type_name: &str,
    method: &str,
    args: &A,
) -> Result<String, Exception> {
    let encoded = serde_json::to_vec(args)?;
    Ok(format!("cache_{}_{}_{}", type_name, method, digest(&encoded)))
}

/// 查询参数按请求中出现的顺序参与哈希
pub fn route_key(
    type_name: &str,
    method: &str,
    path: &str,
    query: &[(String, String)],
) -> Result<String, Exception> {
    let encoded = serde_json::to_vec(&json!({ "path": path, "get": query }))?;
    Ok(format!("route_{}_{}_{}", type_name, method, digest(&encoded)))
}

pub struct Memoizer {
    engine: Arc<dyn CacheEngine>,
}

impl Memoizer {
    pub fn new(engine: Arc<dyn CacheEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn CacheEngine> {
        &self.engine
    }

    /// 命中则返回缓存值，否则执行 `compute` 并写入缓存
    pub fn remember<T, F>(&self, key: &str, ttl: u64, compute: F) -> Result<T, Exception>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, Exception>,
    {
        if let Some(entry) = self.engine.get(key)?.pop() {
            match serde_json::from_value(entry.value) {
                Ok(value) => {
                    debug!("缓存命中: {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("缓存条目无法解析，重新计算 {}: {}", key, e),
            }
        }
        let value = compute()?;
        self.engine.add(key, serde_json::to_value(&value)?, ttl)?;
        debug!("缓存写入: {} (ttl={})", key, ttl);
        Ok(value)
    }

    /// 方法级指令优先于类级指令；两者都没有时直接执行
    pub fn handle_cache<A, T, F>(
        &self,
        type_name: &str,
        method: &str,
        args: &A,
        method_policy: Option<&CachePolicy>,
        class_policy: Option<&CachePolicy>,
        compute: F,
    ) -> Result<T, Exception>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, Exception>,
    {
        let Some(policy) = method_policy.or(class_policy) else {
            return compute();
        };
        let key = match &policy.key {
            Some(key) => key.clone(),
            None => method_key(type_name, method, args)?,
        };
        self.remember(&key, policy.ttl, compute)
    }
}
