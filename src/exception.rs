// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 框架在启动、路由分发、动作执行以及渲染过程中可能抛出的各类异常。
//!
//! ## 分类
//! - **配置错误**：缺失必需配置、目录或文件不存在，属于致命错误，启动应当中止。
//! - **路由错误**：路由、控制器或动作不存在，对应 `404 Not Found`。
//! - **运行时错误**：动作执行、模板渲染、缓存读写过程中发生的错误，对应 `500`。
//! - **协议错误**：HTTP 报文无法解析，对应 `400 Bad Request`。

use thiserror::Error;

/// 框架处理请求过程中发生的异常类型。
#[derive(Debug, Error)]
pub enum Exception {
    /// 配置加载或校验失败。
    #[error("Configuration error: {0}")]
    Config(String),
    /// 必需的顶层配置项缺失。
    #[error("Required setting '{0}' is missing.")]
    MissingSetting(String),
    /// `cache.driver` 指定了不存在的缓存后端。
    #[error("Unsupported cache driver: {0}")]
    UnsupportedCacheDriver(String),
    /// 在调用 `RouteBuilder::initialize` 之前添加路由。
    #[error("RouteBuilder must be initialized before adding routes.")]
    RouteBuilderNotInitialized,
    /// 注册路由时控制器类型未在注册表中声明。
    #[error("Controller class {0} does not exist")]
    ControllerNotDeclared(String),
    /// 注册路由时控制器没有声明对应动作。
    #[error("Action {action} does not exist in controller {controller}")]
    ActionNotDeclared { controller: String, action: String },
    /// 路由表中没有匹配的 (方法, 路径)。
    #[error("Route not found: {0}")]
    RouteNotFound(String),
    /// 分发时控制器无法解析。
    #[error("Controller not found: {0}")]
    ControllerNotFound(String),
    /// 分发时控制器上没有对应动作。
    #[error("Method not found: {action} in {controller}")]
    ActionNotFound { controller: String, action: String },
    /// `set` 的并行数组形式两侧长度不一致。
    #[error("Invalid data provided for set(): both names ({names}) and values ({values}) require same count.")]
    ViewVarsMismatch { names: usize, values: usize },
    /// 模板搜索路径中找不到模板。
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    /// 模板引擎报告的其他错误。
    #[error("Template error: {0}")]
    Template(String),
    /// 缓存后端的读写错误。
    #[error("Cache error: {0}")]
    Cache(String),
    /// 致命级别的运行时错误，不再继续处理当前请求。
    #[error("Fatal Error: {message} in {file} on line {line}")]
    Fatal {
        message: String,
        file: String,
        line: u32,
    },
    /// 动作内部报告的一般运行时错误。
    #[error("{0}")]
    Runtime(String),
    /// 客户端发送的请求字节流无法解析为合法的 UTF-8 字符串。
    #[error("Request bytes can't be parsed in UTF-8")]
    RequestIsNotUtf8,
    /// 客户端使用了不支持的 HTTP 方法。
    #[error("Unsupported request method")]
    UnSupportedRequestMethod,
    /// 客户端使用了不支持的 HTTP 协议版本。
    #[error("Unsupported HTTP version")]
    UnsupportedHttpVersion,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

use Exception::*;

impl Exception {
    /// 该异常最终映射到的 HTTP 状态码。
    pub fn status_code(&self) -> u16 {
        match self {
            RouteNotFound(_) | ControllerNotFound(_) | ActionNotFound { .. } => 404,
            RequestIsNotUtf8 | UnSupportedRequestMethod | UnsupportedHttpVersion => 400,
            _ => 500,
        }
    }

    /// 配置类与致命类错误，出现后进程或请求不应继续。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Config(_)
                | MissingSetting(_)
                | UnsupportedCacheDriver(_)
                | RouteBuilderNotInitialized
                | Fatal { .. }
        )
    }
}

impl From<tera::Error> for Exception {
    fn from(e: tera::Error) -> Self {
        match e.kind {
            tera::ErrorKind::TemplateNotFound(ref name) => TemplateNotFound(name.clone()),
            _ => {
                // tera 把真正的原因放在 source 链里
                let mut message = e.to_string();
                let mut source = std::error::Error::source(&e);
                while let Some(inner) = source {
                    message.push_str(": ");
                    message.push_str(&inner.to_string());
                    source = inner.source();
                }
                Template(message)
            }
        }
    }
}
