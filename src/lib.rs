pub mod app;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod exception;
pub mod logging;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod signal;
pub mod util;
pub mod view;

pub use app::{Application, ApplicationBuilder};
pub use cache::{CacheEngine, CachePolicy, Memoizer};
pub use config::{Config, ConfigSources};
pub use controller::{Action, ActionResult, AppController, Controller, ControllerRegistry};
pub use error::{ErrorCollector, ErrorTrap, ExceptionTrap, Severity};
pub use exception::Exception;
pub use logging::{Channel, LogManager};
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use router::{middleware, Middleware, Route, RouteBuilder, Router};
pub use signal::Signal;
pub use util::HtmlBuilder;
pub use view::AppView;
