use crate::{
    cache::CachePolicy, controller::ControllerRegistry, exception::Exception,
    param::HttpRequestMethod,
};

use super::Middleware;

/// 单条路由：方法与路径精确匹配后调用控制器的某个动作
#[derive(Clone)]
pub struct Route {
    method: HttpRequestMethod,
    path: String,
    controller: String,
    action: String,
    name: Option<String>,
    middleware: Vec<Middleware>,
    cache: Option<CachePolicy>,
}

impl Route {
    /// `controller` 为全限定名，控制器未注册或没有该动作时构造失败
    pub fn new(
        registry: &ControllerRegistry,
        method: HttpRequestMethod,
        path: &str,
        controller: &str,
        action: &str,
    ) -> Result<Self, Exception> {
        let entry = registry
            .get(controller)
            .ok_or_else(|| Exception::ControllerNotDeclared(controller.to_string()))?;
        if !entry.has_action(action) {
            return Err(Exception::ActionNotDeclared {
                controller: controller.to_string(),
                action: action.to_string(),
            });
        }
        Ok(Self {
            method,
            path: path.to_string(),
            controller: controller.to_string(),
            action: action.to_string(),
            name: None,
            middleware: vec![],
            cache: None,
        })
    }

    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    pub fn set_name(&mut self, name: &str) -> &mut Self {
        self.name = Some(name.to_string());
        self
    }

    /// 追加一个路由级中间件
    pub fn add_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// 路由级缓存：key 由路径与查询参数决定
    pub fn cached(&mut self, policy: CachePolicy) -> &mut Self {
        self.cache = Some(policy);
        self
    }
}
