use std::sync::Arc;
use std::thread;

use chrono::Utc;
use log::{log, log_enabled, Level};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::exception::Exception;

/// 为每条日志追加 `extra` 字段的处理器
#[derive(Debug, Clone, PartialEq)]
pub enum Processor {
    /// 进程级的短随机标识，用来把同一进程的日志串起来
    Uid(String),
    /// 启动时从配置中取出的变量
    Environment(Map<String, Value>),
    /// 进程号与当前线程名
    Process,
}

impl Processor {
    /// 按名字创建处理器，`args` 来自配置
    pub fn create(
        name: &str,
        args: &toml::Table,
        lookup: impl Fn(&str) -> Option<Value>,
    ) -> Result<Self, Exception> {
        match name {
            "uid" => {
                let length = args
                    .get("length")
                    .and_then(|v| v.as_integer())
                    .unwrap_or(7)
                    .clamp(1, 64) as usize;
                Ok(Processor::Uid(generate_uid(length)))
            }
            "environment" => {
                let mut vars = Map::new();
                if let Some(names) = args.get("vars").and_then(|v| v.as_array()) {
                    for name in names.iter().filter_map(|v| v.as_str()) {
                        if let Some(value) = lookup(name) {
                            vars.insert(name.to_string(), value);
                        }
                    }
                }
                Ok(Processor::Environment(vars))
            }
            "process" => Ok(Processor::Process),
            other => Err(Exception::Config(format!(
                "Invalid log processor: {}",
                other
            ))),
        }
    }

    pub fn apply(&self, extra: &mut Map<String, Value>) {
        match self {
            Processor::Uid(uid) => {
                extra.insert("uid".to_string(), Value::String(uid.clone()));
            }
            Processor::Environment(vars) => {
                extra.insert("env".to_string(), Value::Object(vars.clone()));
            }
            Processor::Process => {
                extra.insert("pid".to_string(), Value::from(std::process::id()));
                let current = thread::current();
                extra.insert(
                    "thread".to_string(),
                    Value::String(current.name().unwrap_or("unnamed").to_string()),
                );
            }
        }
    }
}

fn generate_uid(length: usize) -> String {
    let seed = format!(
        "{}:{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let mut uid = hex::encode(Sha256::digest(seed.as_bytes()));
    uid.truncate(length);
    uid
}

/// 具名日志通道。
///
/// 记录以通道名作为 `target` 交给 `log` 门面，log4rs 按同名 logger 路由到
/// 该通道配置的 appender 上。
#[derive(Debug, Clone)]
pub struct Channel {
    name: String,
    processors: Arc<Vec<Processor>>,
}

impl Channel {
    pub fn new(name: &str, processors: Arc<Vec<Processor>>) -> Self {
        Self {
            name: name.to_string(),
            processors,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self, level: Level) -> bool {
        log_enabled!(target: self.name.as_str(), level)
    }

    pub fn log(&self, level: Level, message: &str) {
        self.log_with(level, message, Map::new());
    }

    /// `context` 与处理器产生的 `extra` 以紧凑 JSON 附在消息之后
    pub fn log_with(&self, level: Level, message: &str, context: Map<String, Value>) {
        if !self.enabled(level) {
            return;
        }
        match self.decorate(context) {
            Some(record) => log!(target: self.name.as_str(), level, "{} {}", message, record),
            None => log!(target: self.name.as_str(), level, "{}", message),
        }
    }

    fn decorate(&self, context: Map<String, Value>) -> Option<Value> {
        let mut extra = Map::new();
        for processor in self.processors.iter() {
            processor.apply(&mut extra);
        }
        if context.is_empty() && extra.is_empty() {
            return None;
        }
        let mut record = Map::new();
        if !context.is_empty() {
            record.insert("context".to_string(), Value::Object(context));
        }
        if !extra.is_empty() {
            record.insert("extra".to_string(), Value::Object(extra));
        }
        Some(Value::Object(record))
    }

    pub fn debug(&self, message: &str) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}
