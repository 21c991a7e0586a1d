// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 控制器模块
//!
//! 控制器以类型注册到 `ControllerRegistry`，注册时把每个动作擦除为统一的
//! 处理函数，路由构建与分发都只按全限定名查表，不做运行时的类型解析。
//!
//! 动作执行时拿到 `AppController`：保存视图变量、模板路径与渲染标记。
//! 分发器在动作返回后调用 `finalize` 完成自动渲染。

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    cache::CachePolicy,
    error::{ErrorCollector, ErrorTrap, Severity},
    exception::Exception,
    request::Request,
    response::Response,
    view::{template_path, AppView},
};

pub type ActionResult = Result<Option<Response>, Exception>;

/// 控制器动作的签名：控制器实例、基础状态、位置参数
pub type ActionHandler<C> = fn(&mut C, &mut AppController, &[Value]) -> ActionResult;

pub struct Action<C> {
    name: &'static str,
    handler: ActionHandler<C>,
    params: usize,
    cache: Option<CachePolicy>,
}

impl<C> Action<C> {
    pub fn new(name: &'static str, handler: ActionHandler<C>) -> Self {
        Self {
            name,
            handler,
            params: 0,
            cache: None,
        }
    }

    /// 声明的位置参数个数
    pub fn params(mut self, count: usize) -> Self {
        self.params = count;
        self
    }

    /// 方法级缓存指令
    pub fn cached(mut self, policy: CachePolicy) -> Self {
        self.cache = Some(policy);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub trait Controller: Default + Send + 'static {
    /// 不含命名空间的类型名，例如 `PagesController`
    const NAME: &'static str;

    fn actions() -> Vec<Action<Self>>;

    /// 类级缓存指令，对没有方法级指令的动作生效
    fn cache_policy() -> Option<CachePolicy> {
        None
    }
}

type ErasedHandler = Arc<dyn Fn(&mut AppController, &[Value]) -> ActionResult + Send + Sync>;

/// 类型擦除后的动作
#[derive(Clone)]
pub struct ActionEntry {
    name: String,
    params: usize,
    cache: Option<CachePolicy>,
    handler: ErasedHandler,
}

impl ActionEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> usize {
        self.params
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    /// 每次调用都构造新的控制器实例
    pub fn invoke(&self, base: &mut AppController, args: &[Value]) -> ActionResult {
        (self.handler)(base, args)
    }
}

pub struct ControllerEntry {
    name: &'static str,
    qualified: String,
    cache: Option<CachePolicy>,
    actions: HashMap<String, ActionEntry>,
}

impl ControllerEntry {
    fn of<C: Controller>(qualified: String) -> Self {
        let actions = C::actions()
            .into_iter()
            .map(|action| {
                let handler = action.handler;
                let erased: ErasedHandler = Arc::new(move |base: &mut AppController, args: &[Value]| {
                    let mut controller = C::default();
                    handler(&mut controller, base, args)
                });
                (
                    action.name.to_string(),
                    ActionEntry {
                        name: action.name.to_string(),
                        params: action.params,
                        cache: action.cache,
                        handler: erased,
                    },
                )
            })
            .collect();
        Self {
            name: C::NAME,
            qualified,
            cache: C::cache_policy(),
            actions,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    pub fn cache_policy(&self) -> Option<&CachePolicy> {
        self.cache.as_ref()
    }

    pub fn action(&self, name: &str) -> Option<&ActionEntry> {
        self.actions.get(name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

/// 绑定到一个命名空间的控制器注册表
pub struct ControllerRegistry {
    namespace: String,
    controllers: HashMap<String, Arc<ControllerEntry>>,
}

impl ControllerRegistry {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            controllers: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn qualify(&self, name: &str) -> String {
        format!("{}::{}", self.namespace, name)
    }

    pub fn register<C: Controller>(&mut self) -> &mut Self {
        let qualified = self.qualify(C::NAME);
        debug!("注册控制器: {}", qualified);
        self.controllers
            .insert(qualified.clone(), Arc::new(ControllerEntry::of::<C>(qualified)));
        self
    }

    /// 按全限定名查找
    pub fn get(&self, qualified: &str) -> Option<Arc<ControllerEntry>> {
        self.controllers.get(qualified).cloned()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

/// 动作执行期间的基础控制器状态
pub struct AppController {
    view: Arc<AppView>,
    error_trap: Arc<ErrorTrap>,
    collector: Arc<ErrorCollector>,
    request: Request,
    controller: String,
    action: String,
    view_vars: Map<String, Value>,
    template_path: Option<String>,
    rendered: bool,
}

impl AppController {
    pub fn new(
        view: Arc<AppView>,
        error_trap: Arc<ErrorTrap>,
        collector: Arc<ErrorCollector>,
        request: Request,
        controller: &str,
        action: &str,
    ) -> Self {
        Self {
            view,
            error_trap,
            collector,
            request,
            controller: controller.to_string(),
            action: action.to_string(),
            view_vars: Map::new(),
            template_path: None,
            rendered: false,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn controller_name(&self) -> &str {
        &self.controller
    }

    pub fn action_name(&self) -> &str {
        &self.action
    }

    /// 设置单个视图变量，已有同名变量被覆盖
    pub fn set<T: Serialize>(&mut self, name: &str, value: T) -> Result<&mut Self, Exception> {
        self.view_vars
            .insert(name.to_string(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// 并行数组形式，两侧长度必须一致
    pub fn set_many(&mut self, names: &[&str], values: Vec<Value>) -> Result<&mut Self, Exception> {
        if names.len() != values.len() {
            return Err(Exception::ViewVarsMismatch {
                names: names.len(),
                values: values.len(),
            });
        }
        for (name, value) in names.iter().zip(values) {
            self.view_vars.insert(name.to_string(), value);
        }
        Ok(self)
    }

    /// 合并一组键值，新值优先
    pub fn set_map(&mut self, data: Map<String, Value>) -> &mut Self {
        self.view_vars.extend(data);
        self
    }

    pub fn view_vars(&self) -> &Map<String, Value> {
        &self.view_vars
    }

    pub fn set_template_path(&mut self, path: &str) {
        self.template_path = Some(path.to_string());
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// 渲染模板。同一个控制器生命周期内只有第一次渲染产生输出。
    pub fn render(&mut self, template: &str, vars: &Map<String, Value>) -> Result<String, Exception> {
        if self.rendered {
            return Ok(String::new());
        }
        self.rendered = true;
        self.view.render(template, vars)
    }

    pub fn render_controller_action(
        &mut self,
        controller: &str,
        action: &str,
        vars: &Map<String, Value>,
    ) -> Result<String, Exception> {
        self.render(&template_path(controller, action), vars)
    }

    /// 请求收尾：设置过视图变量且尚未渲染时，自动渲染自定义模板或
    /// 由控制器与动作名推导出的模板
    pub fn finalize(&mut self) -> Result<Option<String>, Exception> {
        if self.view_vars.is_empty() || self.rendered {
            return Ok(None);
        }
        let vars = std::mem::take(&mut self.view_vars);
        let html = match self.template_path.clone() {
            Some(path) => self.render(&path, &vars)?,
            None => {
                let (controller, action) = (self.controller.clone(), self.action.clone());
                self.render_controller_action(&controller, &action, &vars)?
            }
        };
        self.view_vars = vars;
        Ok(Some(html))
    }

    /// 以当前请求的错误收集器上报运行时错误
    #[track_caller]
    pub fn trigger_error(&self, severity: Severity, message: &str) -> Result<bool, Exception> {
        self.error_trap
            .handle_error(&self.collector, severity, message)
    }
}
