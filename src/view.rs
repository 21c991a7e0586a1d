//! # 视图模块
//!
//! 基于 tera 的模板渲染。模板来源按优先级从低到高：
//! 框架内置模板、`App.paths.templates` 中靠后的目录、靠前的目录。
//! 同名模板由优先级高的来源覆盖。

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, Utc};
use log::{debug, error, info};
use serde_json::{Map, Value};
use tera::{Context, Tera};

use crate::{config::Config, exception::Exception, util::camel_to_snake};

const BUILTIN_TEMPLATES: [(&str, &str); 1] = [(
    "error/exception.html",
    include_str!("../templates/error/exception.html"),
)];

/// 由控制器类型名和动作名推导模板路径：
/// `UserProfileController` + `show` -> `user_profile/show.html`
pub fn template_path(controller: &str, action: &str) -> String {
    let short = controller.strip_suffix("Controller").unwrap_or(controller);
    format!("{}/{}.html", camel_to_snake(short), action)
}

/// 静态资源 URL 的解析规则，来自 `assets.*` 与 `App.*` 配置
#[derive(Debug, Clone)]
pub struct AssetResolver {
    /// (目录名或扩展名, 基础 URL)，按匹配顺序排列
    base_paths: Vec<(String, String)>,
    default_path: String,
    base_url: String,
    cache_bust: bool,
    absolute: bool,
}

impl AssetResolver {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_paths: vec![
                ("css".to_string(), config.get_str("assets.cssBaseUrl", "css/")),
                ("js".to_string(), config.get_str("assets.jsBaseUrl", "js/")),
                ("fonts".to_string(), config.get_str("assets.fontsBaseUrl", "fonts/")),
                ("img".to_string(), config.get_str("assets.imageBaseUrl", "img/")),
            ],
            default_path: config.get_str("assets.default", "assets/"),
            base_url: config
                .get_str("App.baseUrl", "")
                .trim_end_matches('/')
                .to_string(),
            cache_bust: config.get_bool("debug", false),
            absolute: config.get_bool("App.absolutePath", false),
        }
    }

    /// 解析资源路径。外部 URL 原样返回（仍可追加版本参数）；
    /// 本地路径按开头目录或扩展名匹配基础 URL，匹配到目录时去掉该目录前缀。
    pub fn asset(&self, path: &str, cache_bust: Option<bool>, absolute: Option<bool>) -> String {
        let cache_bust = cache_bust.unwrap_or(self.cache_bust);
        if is_external(path) {
            return append_timestamp(path, cache_bust);
        }
        let absolute = absolute.unwrap_or(self.absolute);
        let relative = path.trim_start_matches('/');
        let extension = Path::new(relative)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        let (base, rest) = self
            .base_paths
            .iter()
            .find_map(|(folder, base)| {
                match relative.strip_prefix(folder.as_str()).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => Some((base, rest)),
                    None if extension == folder => Some((base, relative)),
                    None => None,
                }
            })
            .unwrap_or((&self.default_path, relative));

        let asset_path = format!("{}/{}", base.trim_end_matches('/'), rest);
        let url = if absolute {
            format!("{}{}", self.base_url, asset_path)
        } else {
            asset_path
        };
        append_timestamp(&url, cache_bust)
    }

    pub fn script(&self, src: &str, cache_bust: Option<bool>) -> String {
        format!(
            "<script src=\"{}\"></script>",
            self.asset(src, cache_bust, Some(false))
        )
    }

    pub fn style(&self, href: &str, cache_bust: Option<bool>) -> String {
        format!(
            "<link rel=\"stylesheet\" href=\"{}\">",
            self.asset(href, cache_bust, Some(false))
        )
    }

    pub fn image(&self, src: &str, alt: &str, attributes: &str) -> String {
        let tag = format!("<img src=\"{}\" alt=\"{}\"", self.asset(src, None, None), alt);
        if attributes.is_empty() {
            format!("{}>", tag)
        } else {
            format!("{} {}>", tag, attributes)
        }
    }

    /// 外部 URL 直接引用，否则按 Google Fonts 的字体名处理
    pub fn font(&self, name: &str, cache_bust: bool) -> String {
        if is_external(name) {
            return format!("<link rel=\"stylesheet\" href=\"{}\">", name);
        }
        let url = format!(
            "https://fonts.googleapis.com/css2?family={}",
            encode_component(name)
        );
        format!(
            "<link rel=\"stylesheet\" href=\"{}\">",
            append_timestamp(&url, cache_bust)
        )
    }
}

fn is_external(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//")
}

fn append_timestamp(url: &str, cache_bust: bool) -> String {
    if !cache_bust {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}v={}", url, separator, Utc::now().timestamp())
}

fn encode_component(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            _ => format!("%{:02X}", b),
        })
        .collect()
}

type Args = HashMap<String, Value>;

fn arg_str(args: &Args, name: &str) -> tera::Result<String> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(tera::Error::msg(format!("missing `{}` argument", name))),
    }
}

fn arg_bool(args: &Args, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

fn register_helpers(tera: &mut Tera, assets: Arc<AssetResolver>) {
    let resolver = assets.clone();
    tera.register_function("asset", move |args: &Args| -> tera::Result<Value> {
        let path = arg_str(args, "path")?;
        Ok(Value::String(resolver.asset(
            &path,
            arg_bool(args, "cache_bust"),
            arg_bool(args, "absolute"),
        )))
    });
    let resolver = assets.clone();
    tera.register_function("script", move |args: &Args| -> tera::Result<Value> {
        let src = arg_str(args, "src")?;
        Ok(Value::String(resolver.script(&src, arg_bool(args, "cache_bust"))))
    });
    let resolver = assets.clone();
    tera.register_function("style", move |args: &Args| -> tera::Result<Value> {
        let href = arg_str(args, "href")?;
        Ok(Value::String(resolver.style(&href, arg_bool(args, "cache_bust"))))
    });
    let resolver = assets.clone();
    tera.register_function("image", move |args: &Args| -> tera::Result<Value> {
        let src = arg_str(args, "src")?;
        let alt = arg_str(args, "alt").unwrap_or_default();
        let attributes = arg_str(args, "attributes").unwrap_or_default();
        Ok(Value::String(resolver.image(&src, &alt, &attributes)))
    });
    let resolver = assets;
    tera.register_function("font", move |args: &Args| -> tera::Result<Value> {
        let name = arg_str(args, "name")?;
        let cache_bust = arg_bool(args, "cache_bust").unwrap_or(false);
        Ok(Value::String(resolver.font(&name, cache_bust)))
    });
    tera.register_function("uppercase", |args: &Args| -> tera::Result<Value> {
        Ok(Value::String(arg_str(args, "value")?.to_uppercase()))
    });
    tera.register_function("lowercase", |args: &Args| -> tera::Result<Value> {
        Ok(Value::String(arg_str(args, "value")?.to_lowercase()))
    });
    tera.register_function("timestamp", |_: &Args| -> tera::Result<Value> {
        Ok(Value::String(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()))
    });
}

pub struct AppView {
    tera: Tera,
    globals: Context,
}

impl AppView {
    pub fn new(config: &Config) -> Result<Self, Exception> {
        let paths: Vec<PathBuf> = config.get_or("App.paths.templates", vec![]);
        let mut globals = Context::new();
        globals.insert("site_name", &config.get_str("App.siteName", ""));
        globals.insert("app_name", &config.get_str("App.applicationName", ""));
        globals.insert("author", &config.get_str("App.author", ""));
        globals.insert("year", &Local::now().format("%Y").to_string());
        globals.insert("base_url", &config.get_str("assets.default", "/assets/"));
        globals.insert("debug_mode", &config.get_bool("debug", false));
        Self::with_paths(&paths, globals, AssetResolver::from_config(config))
    }

    /// `paths` 中靠前的目录优先级更高
    pub fn with_paths(
        paths: &[PathBuf],
        globals: Context,
        assets: AssetResolver,
    ) -> Result<Self, Exception> {
        let mut sources: BTreeMap<String, String> = BUILTIN_TEMPLATES
            .iter()
            .map(|(name, body)| (name.to_string(), body.to_string()))
            .collect();
        for dir in paths.iter().rev() {
            if !dir.is_dir() {
                debug!("模板目录不存在，跳过: {}", dir.display());
                continue;
            }
            collect_templates(dir, dir, &mut sources)?;
        }

        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        register_helpers(&mut tera, Arc::new(assets));
        tera.add_raw_templates(sources)?;
        info!("模板加载完成，共 {} 个", tera.get_template_names().count());
        Ok(Self { tera, globals })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.tera.get_template_names().any(|n| n == name)
    }

    /// 用全局变量加上 `vars` 渲染模板，`vars` 中的同名键覆盖全局变量
    pub fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String, Exception> {
        let mut context = self.globals.clone();
        context.extend(Context::from_serialize(vars)?);
        Ok(self.tera.render(template, &context)?)
    }

    /// 渲染错误页，失败时退化为纯文本
    pub fn render_error(&self, template: &str, data: &Map<String, Value>) -> String {
        match self.render(template, data) {
            Ok(html) => html,
            Err(e) => {
                error!("渲染错误页 {} 失败: {}", template, e);
                format!("Error: {}", e)
            }
        }
    }
}

fn collect_templates(
    root: &Path,
    dir: &Path,
    sources: &mut BTreeMap<String, String>,
) -> Result<(), Exception> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_templates(root, &path, sources)?;
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        sources.insert(name, fs::read_to_string(&path)?);
    }
    Ok(())
}
