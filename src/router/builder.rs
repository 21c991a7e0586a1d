use std::sync::Arc;

use log::{debug, info};
use serde_derive::Deserialize;

use crate::{
    cache::CachePolicy,
    config::Config,
    controller::ControllerRegistry,
    exception::Exception,
    param::HttpRequestMethod,
};

use super::Route;

/// 控制器命名空间：`{App.namespace}::controllers`
pub fn controller_namespace(config: &Config) -> String {
    format!("{}::controllers", config.get_str("App.namespace", "app"))
}

/// 配置文件 `[[routes]]` 中的一条路由
#[derive(Debug, Deserialize)]
struct RouteSettings {
    method: String,
    path: String,
    controller: String,
    action: String,
    name: Option<String>,
    cache: Option<CachePolicy>,
}

/// 声明式路由注册：控制器与动作在注册时校验，分发阶段只做查表
pub struct RouteBuilder {
    registry: Arc<ControllerRegistry>,
    namespace: Option<String>,
    routes: Vec<Route>,
}

impl RouteBuilder {
    pub fn new(registry: Arc<ControllerRegistry>) -> Self {
        Self {
            registry,
            namespace: None,
            routes: vec![],
        }
    }

    /// 绑定控制器命名空间，并以配置中的 `routes` 作为初始路由表
    pub fn initialize(&mut self, config: &Config) -> Result<(), Exception> {
        self.namespace = Some(controller_namespace(config));
        self.routes.clear();

        let declared: Vec<RouteSettings> = match config.get("routes") {
            Some(value) => value
                .try_into()
                .map_err(|e: toml::de::Error| Exception::Config(format!("routes: {}", e)))?,
            None => vec![],
        };
        for settings in declared {
            let method: HttpRequestMethod = settings.method.parse()?;
            let route = self.build_route(method, &settings.path, (&settings.controller, &settings.action))?;
            if let Some(name) = &settings.name {
                route.set_name(name);
            }
            if let Some(policy) = settings.cache {
                route.cached(policy);
            }
        }
        info!("路由构建器初始化完成，配置路由 {} 条", self.routes.len());
        Ok(())
    }

    pub fn get(&mut self, path: &str, target: (&str, &str)) -> Result<&mut Route, Exception> {
        self.build_route(HttpRequestMethod::Get, path, target)
    }

    pub fn post(&mut self, path: &str, target: (&str, &str)) -> Result<&mut Route, Exception> {
        self.build_route(HttpRequestMethod::Post, path, target)
    }

    pub fn put(&mut self, path: &str, target: (&str, &str)) -> Result<&mut Route, Exception> {
        self.build_route(HttpRequestMethod::Put, path, target)
    }

    pub fn delete(&mut self, path: &str, target: (&str, &str)) -> Result<&mut Route, Exception> {
        self.build_route(HttpRequestMethod::Delete, path, target)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }

    fn build_route(
        &mut self,
        method: HttpRequestMethod,
        path: &str,
        (controller, action): (&str, &str),
    ) -> Result<&mut Route, Exception> {
        let namespace = self
            .namespace
            .as_deref()
            .ok_or(Exception::RouteBuilderNotInitialized)?;
        let qualified = format!("{}::{}", namespace, controller);
        let route = Route::new(&self.registry, method, path, &qualified, action)?;

        debug!("添加路由 {} {} -> {}::{}", method, path, qualified, action);
        self.routes.push(route);
        let last = self.routes.len() - 1;
        Ok(&mut self.routes[last])
    }
}
