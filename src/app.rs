//! # 应用上下文
//!
//! `Application` 在进程启动时构建一次，持有配置、日志、信号、缓存、视图、
//! 路由与两个错误 trap，并以 `Arc<Application>` 在所有连接之间共享。
//! 错误收集器与控制器状态按请求创建，不在并发请求之间共享。

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use crate::{
    cache::{self, CacheEngine, Memoizer},
    config::Config,
    controller::{Controller, ControllerRegistry},
    error::{ErrorCollector, ErrorTrap, ExceptionTrap, TrapSettings},
    exception::Exception,
    logging::LogManager,
    request::Request,
    response::Response,
    router::{controller_namespace, Middleware, RouteBuilder, Router},
    signal::Signal,
    view::AppView,
};

type RouteDeclaration = Box<dyn FnOnce(&mut RouteBuilder) -> Result<(), Exception>>;

pub struct ApplicationBuilder {
    config: Config,
    registry: ControllerRegistry,
    routes: Vec<RouteDeclaration>,
    middleware: Vec<Middleware>,
    cache: Option<Arc<dyn CacheEngine>>,
    signal: Option<Arc<Signal>>,
    init_logger: bool,
}

impl ApplicationBuilder {
    pub fn new(config: Config) -> Self {
        let registry = ControllerRegistry::new(&controller_namespace(&config));
        Self {
            config,
            registry,
            routes: vec![],
            middleware: vec![],
            cache: None,
            signal: None,
            init_logger: true,
        }
    }

    pub fn controller<C: Controller>(mut self) -> Self {
        self.registry.register::<C>();
        self
    }

    /// 在配置路由之后追加代码声明的路由
    pub fn routes<F>(mut self, declare: F) -> Self
    where
        F: FnOnce(&mut RouteBuilder) -> Result<(), Exception> + 'static,
    {
        self.routes.push(Box::new(declare));
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// 替换由 `cache.driver` 选择的缓存后端
    pub fn cache(mut self, engine: Arc<dyn CacheEngine>) -> Self {
        self.cache = Some(engine);
        self
    }

    pub fn signal(mut self, signal: Arc<Signal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// 是否安装全局 log4rs 日志器，测试中通常关闭
    pub fn init_logger(mut self, enabled: bool) -> Self {
        self.init_logger = enabled;
        self
    }

    pub fn build(self) -> Result<Application, Exception> {
        let config = Arc::new(self.config);

        let logs = Arc::new(LogManager::from_config(&config)?);
        if self.init_logger {
            logs.init()?;
        }
        let signal = self.signal.unwrap_or_default();
        let cache = match self.cache {
            Some(engine) => engine,
            None => cache::create(&config)?,
        };
        let view = Arc::new(AppView::new(&config)?);

        let settings = TrapSettings::from_config(&config)?;
        let error_channel = logs.channel(Some("error"));
        let error_trap = Arc::new(ErrorTrap::new(
            settings.clone(),
            error_channel.clone(),
            signal.clone(),
        ));
        let exception_trap = ExceptionTrap::new(settings, error_channel, signal.clone(), view.clone());

        let registry = Arc::new(self.registry);
        let mut builder = RouteBuilder::new(registry.clone());
        builder.initialize(&config)?;
        for declare in self.routes {
            declare(&mut builder)?;
        }

        let mut router = Router::new(
            registry,
            Memoizer::new(cache.clone()),
            view.clone(),
            error_trap.clone(),
        );
        let webroot: PathBuf = config.get_or("App.webroot", PathBuf::from("webroot"));
        router.set_webroot(&webroot);
        for m in self.middleware {
            router.add_middleware(m);
        }
        for route in builder.into_routes() {
            router.add_route(route);
        }
        info!("应用初始化完成，路由 {} 条", router.route_count());

        Ok(Application {
            config,
            logs,
            signal,
            cache,
            view,
            router,
            error_trap,
            exception_trap,
        })
    }
}

pub struct Application {
    config: Arc<Config>,
    logs: Arc<LogManager>,
    signal: Arc<Signal>,
    cache: Arc<dyn CacheEngine>,
    view: Arc<AppView>,
    router: Router,
    error_trap: Arc<ErrorTrap>,
    exception_trap: ExceptionTrap,
}

impl Application {
    pub fn builder(config: Config) -> ApplicationBuilder {
        ApplicationBuilder::new(config)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn logs(&self) -> &Arc<LogManager> {
        &self.logs
    }

    pub fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub fn cache(&self) -> &Arc<dyn CacheEngine> {
        &self.cache
    }

    pub fn view(&self) -> &Arc<AppView> {
        &self.view
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn error_trap(&self) -> &Arc<ErrorTrap> {
        &self.error_trap
    }

    /// 安装进程级 panic hook
    pub fn install_traps(&self) {
        self.exception_trap.register();
    }

    /// 处理一个请求。任何错误或 panic 都会被转换为错误页，不会向调用方传播。
    pub fn handle(&self, request: &Request) -> Response {
        let collector = Arc::new(ErrorCollector::new());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.router.dispatch(request, &collector)
        }));
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                debug!("[ID{}]分发失败: {}", request.id(), e);
                self.exception_trap.handle_exception(&collector, &e);
                Response::new()
            }
            Err(payload) => {
                self.exception_trap.handle_panic(&collector, payload);
                Response::new()
            }
        };
        self.exception_trap
            .handle_shutdown(&collector, request, response)
    }
}
