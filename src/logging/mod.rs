// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 日志模块
//!
//! 按 `logs` 配置段以代码方式构建 log4rs 配置：每个通道对应一个同名 logger，
//! 每个 handler 对应一个带阈值过滤的 appender。默认通道的 appender 同时挂在
//! root 上，未配置的通道名会落到 root。

mod channel;

pub use channel::{Channel, Processor};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{info, warn, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Logger, Root};
use log4rs::encode::json::JsonEncoder;
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::Encode;
use log4rs::filter::threshold::ThresholdFilter;
use serde_derive::Deserialize;

use crate::{config::Config, exception::Exception};

const TEXT_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S%.3f)}] {t}.{l}: {m}{n}";
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub default: DefaultSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelSettings>,
    #[serde(default)]
    pub processors: Vec<ProcessorSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSettings {
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            format: default_format(),
        }
    }
}

fn default_channel() -> String {
    "app".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub logs: PathBuf,
    pub archives: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            logs: PathBuf::from("logs"),
            archives: PathBuf::from("logs/archives"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelSettings {
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSettings {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: Option<PathBuf>,
    pub stream: Option<String>,
    #[serde(default = "default_level")]
    pub level: String,
    pub max_files: Option<u32>,
    pub max_size: Option<u64>,
    pub formatter: Option<String>,
}

fn default_level() -> String {
    "debug".to_string()
}

/// 处理器既可以只写名字，也可以带参数
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProcessorSettings {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        args: toml::Table,
    },
}

/// `notice` 归入 info，`critical`/`alert`/`emergency` 归入 error
pub fn parse_level(level: &str) -> Result<LevelFilter, Exception> {
    Ok(match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" | "notice" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" | "critical" | "alert" | "emergency" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        other => return Err(Exception::Config(format!("Invalid log level: {}", other))),
    })
}

pub struct LogManager {
    settings: LogSettings,
    processors: Arc<Vec<Processor>>,
    channels: Mutex<HashMap<String, Channel>>,
    handle: Mutex<Option<log4rs::Handle>>,
}

impl LogManager {
    pub fn new(settings: LogSettings, processors: Vec<Processor>) -> Self {
        Self {
            settings,
            processors: Arc::new(processors),
            channels: Mutex::new(HashMap::new()),
            handle: Mutex::new(None),
        }
    }

    /// 读取 `logs` 配置段；environment 处理器的变量从配置树中取值
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let settings: LogSettings = config.section("logs")?;
        let lookup = |name: &str| {
            config
                .get(name)
                .and_then(|v| serde_json::to_value(v).ok())
        };
        let mut processors = vec![];
        for processor in &settings.processors {
            processors.push(match processor {
                ProcessorSettings::Name(name) => Processor::create(name, &toml::Table::new(), lookup)?,
                ProcessorSettings::Detailed { name, args } => Processor::create(name, args, lookup)?,
            });
        }
        Ok(Self::new(settings, processors))
    }

    pub fn settings(&self) -> &LogSettings {
        &self.settings
    }

    /// 创建存储目录并安装全局 logger。
    ///
    /// 全局 logger 已存在时只记录警告，沿用已有的 logger。
    pub fn init(&self) -> Result<(), Exception> {
        self.ensure_storage_exists()?;
        let config = self.build_config()?;
        let mut handle = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = handle.as_ref() {
            existing.set_config(config);
            info!("日志配置已更新");
            return Ok(());
        }
        match log4rs::init_config(config) {
            Ok(h) => {
                *handle = Some(h);
                info!("日志系统初始化完成");
            }
            Err(e) => warn!("全局 logger 已被安装，沿用现有 logger: {}", e),
        }
        Ok(())
    }

    fn ensure_storage_exists(&self) -> Result<(), Exception> {
        for path in [&self.settings.storage.logs, &self.settings.storage.archives] {
            if !path.exists() {
                fs::create_dir_all(path).map_err(|e| {
                    Exception::Config(format!("Failed to create directory: {}: {}", path.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// 获取通道句柄，首次使用时创建并缓存。`None` 取默认通道。
    pub fn channel(&self, name: Option<&str>) -> Channel {
        let name = name.unwrap_or(self.settings.default.channel.as_str());
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name, self.processors.clone()))
            .clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn build_config(&self) -> Result<log4rs::Config, Exception> {
        let mut builder = log4rs::Config::builder();
        let mut root_appenders = vec![];
        let mut root_level = LevelFilter::Off;

        for (channel, channel_settings) in &self.settings.channels {
            let mut names = vec![];
            for (handler, handler_settings) in &channel_settings.handlers {
                let level = parse_level(&handler_settings.level)?;
                let name = format!("{}.{}", channel, handler);
                let appender = self.build_appender(handler_settings)?;
                builder = builder.appender(
                    Appender::builder()
                        .filter(Box::new(ThresholdFilter::new(level)))
                        .build(name.clone(), appender),
                );
                if *channel == self.settings.default.channel {
                    root_level = root_level.max(level);
                }
                names.push(name);
            }
            if *channel == self.settings.default.channel {
                root_appenders = names.clone();
            }
            builder = builder.logger(
                Logger::builder()
                    .appenders(names)
                    .additive(false)
                    .build(channel.as_str(), LevelFilter::Trace),
            );
        }

        builder
            .build(Root::builder().appenders(root_appenders).build(root_level))
            .map_err(|e| Exception::Config(format!("Invalid log configuration: {}", e)))
    }

    fn build_appender(&self, handler: &HandlerSettings) -> Result<Box<dyn Append>, Exception> {
        let encoder = self.build_encoder(handler.formatter.as_deref())?;
        Ok(match handler.kind.as_str() {
            "stream" => {
                let target = match handler.stream.as_deref() {
                    Some(s) if s.ends_with("stderr") => Target::Stderr,
                    _ => Target::Stdout,
                };
                Box::new(ConsoleAppender::builder().target(target).encoder(encoder).build())
            }
            "file" => {
                let path = self.handler_path(handler)?;
                Box::new(FileAppender::builder().encoder(encoder).build(path)?)
            }
            "rotating" => {
                let path = self.handler_path(handler)?;
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("app")
                    .to_string();
                let pattern = self.settings.storage.archives.join(format!("{}.{{}}.log", stem));
                let roller = FixedWindowRoller::builder()
                    .build(&pattern.to_string_lossy(), handler.max_files.unwrap_or(7))
                    .map_err(|e| Exception::Config(format!("Invalid log roller: {}", e)))?;
                let trigger = SizeTrigger::new(handler.max_size.unwrap_or(DEFAULT_MAX_SIZE));
                let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));
                Box::new(
                    RollingFileAppender::builder()
                        .encoder(encoder)
                        .build(path, Box::new(policy))?,
                )
            }
            "syslog" => {
                return Err(Exception::Config(
                    "The syslog log handler is not supported".to_string(),
                ))
            }
            other => {
                return Err(Exception::Config(format!(
                    "Invalid handler type: {}",
                    other
                )))
            }
        })
    }

    fn build_encoder(&self, formatter: Option<&str>) -> Result<Box<dyn Encode>, Exception> {
        match formatter.unwrap_or(self.settings.default.format.as_str()) {
            "json" => Ok(Box::new(JsonEncoder::new())),
            "text" => Ok(Box::new(PatternEncoder::new(TEXT_PATTERN))),
            other => Err(Exception::Config(format!(
                "Invalid formatter type: {}",
                other
            ))),
        }
    }

    fn handler_path(&self, handler: &HandlerSettings) -> Result<PathBuf, Exception> {
        let path = handler.path.as_ref().ok_or_else(|| {
            Exception::Config(format!("The {} log handler requires a path", handler.kind))
        })?;
        Ok(if path.is_relative() && path.parent() == Some(Path::new("")) {
            self.settings.storage.logs.join(path)
        } else {
            path.clone()
        })
    }
}
