//! 从请求到响应的完整分发流程：静态资源、路由、自动渲染、缓存与错误页

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use webframe::cache::{ArrayEngine, ManualClock, NullEngine};
use webframe::{
    Action, ActionResult, AppController, Application, CachePolicy, Config, Controller, Exception,
    HttpRequestMethod, Request, Response,
};

static COUNTED: AtomicUsize = AtomicUsize::new(0);
static SEARCHED: AtomicUsize = AtomicUsize::new(0);
static REPORTED: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct UserProfileController;

impl UserProfileController {
    fn show(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.set("name", "Ada")?;
        Ok(None)
    }

    fn export(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.set("name", "ignored")?;
        Ok(Some(Response::json(&json!({"name": "Ada"}), 200)?))
    }

    fn counted(&mut self, _base: &mut AppController, _args: &[Value]) -> ActionResult {
        let n = COUNTED.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Response::html(format!("counted {}", n))))
    }

    fn search(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        let n = SEARCHED.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Response::html(format!("{} #{}", base.request().query(), n))))
    }

    fn broken(&mut self, base: &mut AppController, _args: &[Value]) -> ActionResult {
        base.set_many(&["a", "b"], vec![json!(1)])?;
        Ok(None)
    }
}

impl Controller for UserProfileController {
    const NAME: &'static str = "UserProfileController";

    fn actions() -> Vec<Action<Self>> {
        vec![
            Action::new("show", Self::show),
            Action::new("export", Self::export),
            Action::new("counted", Self::counted).cached(CachePolicy::ttl(60)),
            Action::new("search", Self::search),
            Action::new("broken", Self::broken),
        ]
    }
}

#[derive(Default)]
struct ReportController;

impl ReportController {
    fn daily(&mut self, _base: &mut AppController, _args: &[Value]) -> ActionResult {
        let n = REPORTED.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Some(Response::html(format!("report {}", n))))
    }
}

impl Controller for ReportController {
    const NAME: &'static str = "ReportController";

    fn actions() -> Vec<Action<Self>> {
        vec![Action::new("daily", Self::daily)]
    }

    fn cache_policy() -> Option<CachePolicy> {
        Some(CachePolicy::ttl(120))
    }
}

struct Fixture {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    app: Application,
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn fixture(debug: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "templates/user_profile/show.html", "Hello {{ name }} from {{ site_name }}");
    write(root, "webroot/img/logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
    write(root, "secret.txt", "top secret");

    let source = format!(
        r#"
debug = {debug}
logs = {{}}

[App]
namespace = "shop"
siteName = "Shop"
webroot = "{webroot}"
paths = {{ templates = ["{templates}"] }}

[[routes]]
method = "GET"
path = "/profile"
controller = "UserProfileController"
action = "show"
"#,
        debug = debug,
        webroot = root.join("webroot").display(),
        templates = root.join("templates").display(),
    );
    let config = Config::from_table(source.parse().unwrap()).unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let engine = Arc::new(ArrayEngine::new(64, clock.clone()).unwrap());

    let app = Application::builder(config)
        .init_logger(false)
        .cache(engine)
        .controller::<UserProfileController>()
        .controller::<ReportController>()
        .routes(|r| {
            r.get("/profile/export", ("UserProfileController", "export"))?;
            r.get("/counted", ("UserProfileController", "counted"))?;
            r.get("/search", ("UserProfileController", "search"))?
                .cached(CachePolicy::ttl(30));
            r.get("/broken", ("UserProfileController", "broken"))?;
            r.get("/reports/daily", ("ReportController", "daily"))?;
            Ok(())
        })
        .build()
        .unwrap();
    Fixture {
        _dir: dir,
        clock,
        app,
    }
}

fn get(app: &Application, path: &str) -> Response {
    app.handle(&Request::new(HttpRequestMethod::Get, path))
}

fn body(response: &Response) -> String {
    String::from_utf8_lossy(response.content()).to_string()
}

#[test]
fn test_static_file_served_before_routes() {
    let f = fixture(true);
    let response = get(&f.app, "/img/logo.svg");
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("Content-Type"), Some("image/svg+xml"));
    assert_eq!(response.header("Cache-Control"), Some("public, max-age=86400"));
}

#[test]
fn test_static_lookup_stays_inside_webroot() {
    let f = fixture(true);
    let response = get(&f.app, "/../secret.txt");
    assert_eq!(response.status_code(), 404);
    assert!(!body(&response).contains("top secret"));
}

#[test]
fn test_missing_route_is_404() {
    let f = fixture(true);
    let response = get(&f.app, "/missing");
    assert_eq!(response.status_code(), 404);
    assert!(body(&response).contains("Route not found: /missing"));
}

#[test]
fn test_head_returns_empty_response() {
    let f = fixture(true);
    let response = f
        .app
        .handle(&Request::new(HttpRequestMethod::Head, "/profile"));
    assert_eq!(response.status_code(), 200);
    assert!(response.content().is_empty());
}

#[test]
fn test_config_route_auto_renders_derived_template() {
    let f = fixture(true);
    let response = get(&f.app, "/profile");
    assert_eq!(response.status_code(), 200);
    assert_eq!(body(&response), "Hello Ada from Shop");
}

#[test]
fn test_explicit_response_wins_over_auto_render() {
    let f = fixture(true);
    let response = get(&f.app, "/profile/export");
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    let value: Value = serde_json::from_slice(response.content()).unwrap();
    assert_eq!(value, json!({"name": "Ada"}));
}

#[test]
fn test_method_cache_invokes_action_once() {
    let f = fixture(true);
    let first = get(&f.app, "/counted");
    let second = get(&f.app, "/counted");
    assert_eq!(body(&first), body(&second));
    assert_eq!(COUNTED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_class_cache_policy_applies() {
    let f = fixture(true);
    assert_eq!(body(&get(&f.app, "/reports/daily")), "report 1");
    assert_eq!(body(&get(&f.app, "/reports/daily")), "report 1");
}

#[test]
fn test_route_cache_keys_on_query_and_expires() {
    let f = fixture(true);
    assert_eq!(body(&get(&f.app, "/search?q=a")), "q=a #1");
    assert_eq!(body(&get(&f.app, "/search?q=a")), "q=a #1");
    assert_eq!(body(&get(&f.app, "/search?q=b")), "q=b #2");

    f.clock.advance(31);
    assert_eq!(body(&get(&f.app, "/search?q=a")), "q=a #3");
}

#[test]
fn test_action_error_renders_debug_page() {
    let f = fixture(true);
    let response = get(&f.app, "/broken");
    assert_eq!(response.status_code(), 500);
    assert!(body(&response).contains("both names (2) and values (1) require same count"));
}

#[test]
fn test_production_page_hides_details() {
    let f = fixture(false);
    let response = get(&f.app, "/broken");
    assert_eq!(response.status_code(), 500);
    let html = body(&response);
    assert!(html.contains("An error occurred. Please try again later."));
    assert!(!html.contains("require same count"));
}

#[test]
fn test_json_clients_get_json_errors() {
    let f = fixture(true);
    let raw = b"GET /missing HTTP/1.1\r\nAccept: application/json\r\n\r\n";
    let request = Request::try_from(raw, 7).unwrap();
    let response = f.app.handle(&request);
    assert_eq!(response.status_code(), 404);
    let value: Value = serde_json::from_slice(response.content()).unwrap();
    assert_eq!(value["errors"][0]["message"], json!("Route not found: /missing"));
}

#[test]
fn test_undeclared_controller_fails_at_build() {
    let config = Config::from_table("debug = false\nlogs = {}\n".parse().unwrap()).unwrap();
    let result = Application::builder(config)
        .init_logger(false)
        .cache(Arc::new(NullEngine))
        .routes(|r| r.get("/", ("GhostController", "index")).map(|_| ()))
        .build();
    match result {
        Err(Exception::ControllerNotDeclared(name)) => {
            assert_eq!(name, "app::controllers::GhostController");
        }
        _ => panic!("expected ControllerNotDeclared"),
    }
}
