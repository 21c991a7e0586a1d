//! 演示用的控制器与路由

use chrono::Local;
use serde_json::{json, Value};
use webframe::{
    Action, ActionResult, AppController, CachePolicy, Controller, Exception, Response,
    RouteBuilder, Severity,
};

#[derive(Default)]
pub struct PagesController;

impl PagesController {
    fn home(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.set("title", "Home")?
            .set("features", ["config", "router", "views", "cache", "logging"])?;
        Ok(None)
    }

    fn about(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.set_many(
            &["title", "rendered_at"],
            vec![json!("About"), json!(Local::now().to_rfc3339())],
        )?;
        Ok(None)
    }

    fn legacy(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.trigger_error(Severity::Deprecated, "/legacy is deprecated, use /about")?;
        Ok(Some(Response::redirect("/about", 301)))
    }
}

impl Controller for PagesController {
    const NAME: &'static str = "PagesController";

    fn actions() -> Vec<Action<Self>> {
        vec![
            Action::new("home", Self::home),
            // 页面内容每 30 秒才变化一次
            Action::new("about", Self::about).cached(CachePolicy::ttl(30)),
            Action::new("legacy", Self::legacy),
        ]
    }
}

#[derive(Default)]
pub struct ApiController;

impl ApiController {
    fn status(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        let body = json!({
            "status": "ok",
            "request": base.request().path(),
        });
        Ok(Some(Response::json(&body, 200)?))
    }

    fn time(&mut self, _base: &mut AppController, _args: &[Value]) -> ActionResult {
        Ok(Some(Response::json(&json!({ "now": Local::now().to_rfc3339() }), 200)?))
    }

    fn fail(&mut self, _base: &mut AppController, _args: &[Value]) -> ActionResult {
        Err(Exception::Runtime("Intentional failure".to_string()))
    }
}

impl Controller for ApiController {
    const NAME: &'static str = "ApiController";

    fn actions() -> Vec<Action<Self>> {
        vec![
            Action::new("status", Self::status),
            Action::new("time", Self::time),
            Action::new("fail", Self::fail),
        ]
    }
}

/// `/` 与 `/about` 在 `app/config/routes.toml` 中声明
pub fn routes(r: &mut RouteBuilder) -> Result<(), Exception> {
    r.get("/legacy", ("PagesController", "legacy"))?;
    r.get("/api/status", ("ApiController", "status"))?
        .set_name("api.status");
    // 按路径与查询参数缓存 5 秒
    r.get("/api/time", ("ApiController", "time"))?
        .cached(CachePolicy::ttl(5));
    r.get("/api/fail", ("ApiController", "fail"))?;
    Ok(())
}
