// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由模块
//!
//! 分发顺序：
//! 1. webroot 下真实存在的文件直接作为静态资源返回；
//! 2. `HEAD` 请求返回空响应；
//! 3. 依次执行全局中间件；
//! 4. 按 (方法, 路径) 精确查找路由，找不到返回 404；
//! 5. 依次执行路由中间件；
//! 6. 调用动作（可能命中缓存），随后进行自动渲染。

pub mod builder;
pub mod route;

pub use builder::{controller_namespace, RouteBuilder};
pub use route::Route;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use crate::{
    cache::{route_key, Memoizer},
    controller::{ActionEntry, AppController, ControllerEntry, ControllerRegistry},
    error::{ErrorCollector, ErrorTrap},
    exception::Exception,
    param::HttpRequestMethod,
    request::Request,
    response::Response,
    view::AppView,
};

/// 中间件在动作之前执行，返回错误即中止本次分发
pub type Middleware = Arc<dyn Fn(&Request) -> Result<(), Exception> + Send + Sync>;

pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(&Request) -> Result<(), Exception> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub struct Router {
    routes: HashMap<HttpRequestMethod, HashMap<String, Route>>,
    middleware: Vec<Middleware>,
    webroot: Option<PathBuf>,
    registry: Arc<ControllerRegistry>,
    memoizer: Memoizer,
    view: Arc<AppView>,
    error_trap: Arc<ErrorTrap>,
}

impl Router {
    pub fn new(
        registry: Arc<ControllerRegistry>,
        memoizer: Memoizer,
        view: Arc<AppView>,
        error_trap: Arc<ErrorTrap>,
    ) -> Self {
        Self {
            routes: HashMap::new(),
            middleware: vec![],
            webroot: None,
            registry,
            memoizer,
            view,
            error_trap,
        }
    }

    /// 设置静态资源根目录，目录不存在时关闭静态文件服务
    pub fn set_webroot(&mut self, path: &Path) {
        match fs::canonicalize(path) {
            Ok(root) => {
                debug!("静态资源目录: {}", root.display());
                self.webroot = Some(root);
            }
            Err(e) => {
                warn!("静态资源目录 {} 不可用: {}", path.display(), e);
                self.webroot = None;
            }
        }
    }

    pub fn webroot(&self) -> Option<&Path> {
        self.webroot.as_deref()
    }

    /// 同一 (方法, 路径) 重复注册时，后注册的覆盖先注册的
    pub fn add_route(&mut self, route: Route) {
        self.routes
            .entry(route.method())
            .or_default()
            .insert(route.path().to_string(), route);
    }

    /// 按全限定控制器名注册，控制器或动作不存在时立即失败
    pub fn add(
        &mut self,
        method: HttpRequestMethod,
        path: &str,
        controller: &str,
        action: &str,
        middleware: Vec<Middleware>,
    ) -> Result<(), Exception> {
        let mut route = Route::new(&self.registry, method, path, controller, action)?;
        for m in middleware {
            route.add_middleware(m);
        }
        self.add_route(route);
        Ok(())
    }

    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middleware.push(middleware);
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn find(&self, method: HttpRequestMethod, path: &str) -> Option<&Route> {
        self.routes.get(&method).and_then(|table| table.get(path))
    }

    pub fn dispatch(
        &self,
        request: &Request,
        collector: &Arc<ErrorCollector>,
    ) -> Result<Response, Exception> {
        let path = request.url_path();

        if let Some(file) = self.static_file(path) {
            debug!("[ID{}]静态资源: {}", request.id(), file.display());
            return Response::static_file(&file);
        }

        if request.method() == HttpRequestMethod::Head {
            return Ok(Response::empty());
        }

        for m in &self.middleware {
            m(request)?;
        }

        let route = self
            .find(request.method(), path)
            .ok_or_else(|| Exception::RouteNotFound(path.to_string()))?;

        for m in route.middleware() {
            m(request)?;
        }

        let controller = self
            .registry
            .get(route.controller())
            .ok_or_else(|| Exception::ControllerNotFound(route.controller().to_string()))?;
        let action = controller
            .action(route.action())
            .ok_or_else(|| Exception::ActionNotFound {
                controller: route.controller().to_string(),
                action: route.action().to_string(),
            })?;
        debug!(
            "[ID{}]{} {} -> {}::{}",
            request.id(),
            request.method(),
            path,
            controller.qualified_name(),
            action.name()
        );

        // 动作参数来自路由模式，目前的精确匹配不产生参数
        let args: Vec<Value> = vec![];
        let invoke = || self.invoke(&controller, action, request, collector, &args);

        match route.cache_policy() {
            Some(policy) => {
                let key = match &policy.key {
                    Some(key) => key.clone(),
                    None => route_key(
                        controller.qualified_name(),
                        action.name(),
                        path,
                        &request.query_params(),
                    )?,
                };
                self.memoizer.remember(&key, policy.ttl, invoke)
            }
            None => self.memoizer.handle_cache(
                controller.qualified_name(),
                action.name(),
                &args,
                action.cache_policy(),
                controller.cache_policy(),
                invoke,
            ),
        }
    }

    /// 动作显式返回的响应优先，否则使用自动渲染的结果
    fn invoke(
        &self,
        controller: &ControllerEntry,
        action: &ActionEntry,
        request: &Request,
        collector: &Arc<ErrorCollector>,
        args: &[Value],
    ) -> Result<Response, Exception> {
        let mut base = AppController::new(
            self.view.clone(),
            self.error_trap.clone(),
            collector.clone(),
            request.clone(),
            controller.name(),
            action.name(),
        );
        let explicit = action.invoke(&mut base, args)?;
        let rendered = base.finalize()?;
        Ok(match (explicit, rendered) {
            (Some(response), _) => response,
            (None, Some(html)) => Response::html(html),
            (None, None) => Response::new(),
        })
    }

    fn static_file(&self, url_path: &str) -> Option<PathBuf> {
        let root = self.webroot.as_ref()?;
        let decoded = urlencoding::decode(url_path).ok()?;
        let candidate = fs::canonicalize(root.join(decoded.trim_start_matches('/'))).ok()?;
        (candidate.is_file() && candidate.starts_with(root)).then_some(candidate)
    }
}
