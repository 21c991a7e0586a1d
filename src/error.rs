// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 错误捕获模块
//!
//! - `ErrorTrap`：把运行时报告的错误按级别过滤、记录并收集，致命级别直接失败。
//! - `ExceptionTrap`：处理动作返回的异常与 panic，并在请求结束时把收集到的错误
//!   渲染为错误页。
//!
//! 两者都先写日志再渲染，渲染失败不会影响日志投递。

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, Location};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::Local;
use log::{error, Level};
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    config::Config, exception::Exception, logging::Channel, request::Request,
    response::Response, signal::Signal, view::AppView,
};

pub const ERRORS_COLLECTED: &str = "errors.collected";
pub const EXCEPTION_TEMPLATE: &str = "error/exception.html";

thread_local! {
    // 最近一次 panic 的位置，由 `ExceptionTrap::register` 安装的 hook 写入
    static LAST_PANIC: RefCell<Option<(String, u32)>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Deprecated,
    Notice,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    pub fn log_level(&self) -> Level {
        match self {
            Severity::Deprecated | Severity::Notice => Level::Info,
            Severity::Warning => Level::Warn,
            Severity::Error | Severity::Fatal => Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Severity::Deprecated => "Deprecated",
            Severity::Notice => "Notice",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Severity {
    type Err = Exception;

    /// `all` 等同于最低级别，即捕获全部
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "deprecated" => Ok(Severity::Deprecated),
            "notice" => Ok(Severity::Notice),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(Exception::Config(format!("Invalid error level: {}", other))),
        }
    }
}

/// 错误页模板拿到的单条错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedError {
    pub message: String,
    /// 该错误对应的 HTTP 状态码
    pub code: u16,
    pub file: String,
    pub line: u32,
    pub trace: Option<String>,
    pub timestamp: String,
    pub severity: Severity,
}

impl CollectedError {
    pub fn new(message: &str, code: u16, file: &str, line: u32, severity: Severity) -> Self {
        Self {
            message: message.to_string(),
            code,
            file: file.to_string(),
            line,
            trace: None,
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            severity,
        }
    }

    fn with_trace(mut self, enabled: bool) -> Self {
        if enabled {
            self.trace = Some(Backtrace::force_capture().to_string());
        }
        self
    }

    /// 非调试模式下去掉位置与调用栈
    fn redacted(&self) -> Self {
        Self {
            file: String::new(),
            line: 0,
            trace: None,
            ..self.clone()
        }
    }
}

/// 单个请求内收集到的错误
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Mutex<Vec<CollectedError>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&self, error: CollectedError) {
        self.errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(error);
    }

    pub fn errors(&self) -> Vec<CollectedError> {
        self.errors.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 首个错误为 4xx 时沿用该状态码，否则为 500
    pub fn status_code(&self) -> u16 {
        let errors = self.errors.lock().unwrap_or_else(|p| p.into_inner());
        match errors.first() {
            Some(first) if (400..500).contains(&first.code) => first.code,
            _ => 500,
        }
    }
}

/// 两个 trap 共用的行为开关
#[derive(Debug, Clone)]
pub struct TrapSettings {
    pub error_level: Severity,
    pub log: bool,
    pub trace: bool,
    pub debug: bool,
}

impl TrapSettings {
    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        Ok(Self {
            error_level: config.get_str("Error.errorLevel", "all").parse()?,
            log: config.get_bool("Error.log", true),
            trace: config.get_bool("Error.trace", true),
            debug: config.get_bool("debug", false),
        })
    }
}

fn collect(collector: &ErrorCollector, signal: &Signal, error: CollectedError) {
    let message = serde_json::to_value(&error).unwrap_or(Value::Null);
    collector.collect(error);
    signal.publish(ERRORS_COLLECTED, &message);
}

pub struct ErrorTrap {
    settings: TrapSettings,
    channel: Channel,
    signal: Arc<Signal>,
}

impl ErrorTrap {
    pub fn new(settings: TrapSettings, channel: Channel, signal: Arc<Signal>) -> Self {
        Self {
            settings,
            channel,
            signal,
        }
    }

    pub fn threshold(&self) -> Severity {
        self.settings.error_level
    }

    /// 低于阈值返回 `Ok(false)`；`Fatal` 直接返回错误；其余记录并收集后返回 `Ok(true)`
    #[track_caller]
    pub fn handle_error(
        &self,
        collector: &ErrorCollector,
        severity: Severity,
        message: &str,
    ) -> Result<bool, Exception> {
        let location = Location::caller();
        if severity < self.settings.error_level {
            return Ok(false);
        }
        if severity == Severity::Fatal {
            return Err(Exception::Fatal {
                message: message.to_string(),
                file: location.file().to_string(),
                line: location.line(),
            });
        }
        if self.settings.log {
            let mut context = Map::new();
            context.insert("file".to_string(), json!(location.file()));
            context.insert("line".to_string(), json!(location.line()));
            context.insert("severity".to_string(), json!(severity));
            self.channel.log_with(severity.log_level(), message, context);
        }
        let error = CollectedError::new(message, 500, location.file(), location.line(), severity)
            .with_trace(self.settings.trace);
        collect(collector, &self.signal, error);
        Ok(true)
    }
}

pub struct ExceptionTrap {
    settings: TrapSettings,
    channel: Channel,
    signal: Arc<Signal>,
    view: Arc<AppView>,
    template: String,
}

impl ExceptionTrap {
    pub fn new(
        settings: TrapSettings,
        channel: Channel,
        signal: Arc<Signal>,
        view: Arc<AppView>,
    ) -> Self {
        Self {
            settings,
            channel,
            signal,
            view,
            template: EXCEPTION_TEMPLATE.to_string(),
        }
    }

    /// 安装进程级 panic hook：记录 panic 信息与位置。
    pub fn register(&self) {
        let channel = self.channel.clone();
        let log_enabled = self.settings.log;
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| (l.file().to_string(), l.line()))
                .unwrap_or_default();
            if log_enabled {
                channel.error(&format!(
                    "Panic: \"{}\" at {} line {}",
                    panic_message(info.payload()),
                    location.0,
                    location.1
                ));
            }
            LAST_PANIC.with(|last| *last.borrow_mut() = Some(location));
        }));
    }

    /// 处理动作或路由返回的异常
    pub fn handle_exception(&self, collector: &ErrorCollector, exception: &Exception) {
        let (file, line) = match exception {
            Exception::Fatal { file, line, .. } => (file.as_str(), *line),
            _ => ("", 0),
        };
        if self.settings.log {
            let mut context = Map::new();
            context.insert("code".to_string(), json!(exception.status_code()));
            if !file.is_empty() {
                context.insert("file".to_string(), json!(file));
                context.insert("line".to_string(), json!(line));
            }
            self.channel.log_with(
                Level::Error,
                &format!("Uncaught Exception: \"{}\"", exception),
                context,
            );
        }
        let severity = if exception.is_fatal() {
            Severity::Fatal
        } else {
            Severity::Error
        };
        let error = CollectedError::new(
            &exception.to_string(),
            exception.status_code(),
            file,
            line,
            severity,
        )
        .with_trace(self.settings.trace);
        collect(collector, &self.signal, error);
    }

    /// 处理被 `catch_unwind` 截获的 panic，视为未被捕获的致命错误
    pub fn handle_panic(&self, collector: &ErrorCollector, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        let (file, line) = LAST_PANIC
            .with(|last| last.borrow_mut().take())
            .unwrap_or_default();
        if self.settings.log {
            self.channel.error(&format!(
                "Fatal Error: {} in {} on line {}",
                message, file, line
            ));
        }
        let error = CollectedError::new(&message, 500, &file, line, Severity::Fatal);
        collect(collector, &self.signal, error);
    }

    /// 请求收尾：有收集到的错误时用错误页替换原响应
    pub fn handle_shutdown(
        &self,
        collector: &ErrorCollector,
        request: &Request,
        response: Response,
    ) -> Response {
        if collector.is_empty() {
            return response;
        }
        let status = collector.status_code();
        let errors: Vec<CollectedError> = collector
            .errors()
            .iter()
            .map(|e| if self.settings.debug { e.clone() } else { e.redacted() })
            .collect();

        if request.wants_json() {
            let body = if self.settings.debug {
                json!({ "errors": errors })
            } else {
                json!({ "error": { "message": "An error occurred. Please try again later.", "code": status } })
            };
            match Response::json(&body, status) {
                Ok(response) => return response,
                Err(e) => error!("错误信息序列化失败: {}", e),
            }
        }

        let mut data = Map::new();
        data.insert("errors".to_string(), json!(errors));
        data.insert("debug".to_string(), json!(self.settings.debug));
        data.insert("status".to_string(), json!(status));
        match self.view.render(&self.template, &data) {
            Ok(html) => {
                let mut response = Response::html(html);
                response.set_code(status);
                response
            }
            Err(e) => {
                self.log_internal_error(&e);
                Response::from_status_code(status, None)
            }
        }
    }

    fn log_internal_error(&self, e: &Exception) {
        if self.settings.log {
            self.channel
                .warn(&format!("渲染错误页失败，使用兜底页面: {}", e));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
