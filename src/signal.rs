use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;
use serde_json::Value;

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// 进程内的发布/订阅广播器
#[derive(Default)]
pub struct Signal {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, signal: &str, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut listeners = self.listeners.write().unwrap_or_else(|p| p.into_inner());
        listeners
            .entry(signal.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// 按订阅顺序依次调用。回调在锁外执行，因此回调里可以再订阅或发布。
    pub fn publish(&self, signal: &str, message: &Value) {
        let callbacks = {
            let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
            match listeners.get(signal) {
                Some(callbacks) => callbacks.clone(),
                None => return,
            }
        };
        debug!("发布信号 {}，订阅者 {} 个", signal, callbacks.len());
        for callback in callbacks {
            callback(message);
        }
    }

    pub fn listener_count(&self, signal: &str) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(|p| p.into_inner());
        listeners.get(signal).map_or(0, Vec::len)
    }
}
