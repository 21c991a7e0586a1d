//! # 配置模块
//!
//! 配置树由三层来源按顺序深度合并而成，后者覆盖前者：
//! 1. 框架默认配置（唯一的 TOML 文件）；
//! 2. 应用配置目录下的所有 `*.toml` 片段，按文件名排序依次合并；
//! 3. 环境文件（`KEY=VALUE`），值经过类型推断后以最高优先级合并。
//!
//! 每次读取前都会检查已加载文件的修改时间，任一文件变新则整体重新加载。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use log::{debug, error, info};
use serde::de::DeserializeOwned;
use toml::{Table, Value};

use crate::exception::Exception;

/// 加载完成后必须存在的顶层配置项
pub const REQUIRED_SETTINGS: [&str; 2] = ["debug", "logs"];

/// 配置来源的位置
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub defaults: PathBuf,
    pub app_dir: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

impl ConfigSources {
    pub fn new(defaults: impl Into<PathBuf>) -> Self {
        Self {
            defaults: defaults.into(),
            app_dir: None,
            env_file: None,
        }
    }

    pub fn with_app_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.app_dir = Some(dir.into());
        self
    }

    pub fn with_env_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.env_file = Some(file.into());
        self
    }
}

struct ConfigState {
    tree: Table,
    timestamps: Vec<(PathBuf, SystemTime)>,
}

pub struct Config {
    sources: Option<ConfigSources>,
    state: RwLock<ConfigState>,
}

impl Config {
    /// 从文件加载配置，任何一步失败都是致命的配置错误
    pub fn load(sources: ConfigSources) -> Result<Self, Exception> {
        let state = read_sources(&sources)?;
        info!("配置已载入，共 {} 个来源文件", state.timestamps.len());
        Ok(Self {
            sources: Some(sources),
            state: RwLock::new(state),
        })
    }

    /// 直接由配置树构造，不关联任何文件，也不会热重载
    pub fn from_table(tree: Table) -> Result<Self, Exception> {
        validate_required_settings(&tree)?;
        Ok(Self {
            sources: None,
            state: RwLock::new(ConfigState {
                tree,
                timestamps: vec![],
            }),
        })
    }

    /// 任一来源文件的修改时间前进时，重新执行完整的加载流程。
    ///
    /// 重新加载会丢弃此前通过 `set` 写入的值。加载失败时保留旧的配置树，
    /// 但记下新的修改时间，同一次改动只尝试一次。
    pub fn reload_if_needed(&self) {
        let Some(sources) = &self.sources else {
            return;
        };
        let stale = {
            let state = match self.state.read() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.timestamps.iter().any(|(file, recorded)| {
                modified_time(file).map_or(false, |current| current > *recorded)
            })
        };
        if !stale {
            return;
        }
        match read_sources(sources) {
            Ok(fresh) => {
                info!("检测到配置文件变更，已重新加载");
                let mut state = match self.state.write() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *state = fresh;
            }
            Err(e) => {
                error!("重新加载配置失败，继续使用旧配置: {}", e);
                let mut state = match self.state.write() {
                    Ok(s) => s,
                    Err(poisoned) => poisoned.into_inner(),
                };
                for (file, recorded) in state.timestamps.iter_mut() {
                    if let Ok(current) = modified_time(file) {
                        *recorded = current;
                    }
                }
            }
        }
    }

    /// 按点号路径读取，例如 `cache.redis.host`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.reload_if_needed();
        let state = match self.state.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        lookup(&state.tree, key).cloned()
    }

    /// 读取并反序列化为目标类型，缺失或类型不符时返回默认值。
    ///
    /// 环境文件中的数字一律是浮点，整数目标类型也能读到 `9000.0` 这样的值。
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => deserialize(value).unwrap_or(default),
            None => default,
        }
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get_or(key, default.to_string())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_or(key, default)
    }

    /// 将整个子树反序列化为结构体，缺失时按空表处理
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<T, Exception> {
        let value = self
            .get(key)
            .unwrap_or_else(|| Value::Table(Table::new()));
        deserialize(value).map_err(|e| Exception::Config(format!("{}: {}", key, e)))
    }

    /// 按点号路径写入，中间不存在或不是表的节点会被替换为空表
    pub fn set(&self, key: &str, value: Value) {
        let mut state = match self.state.write() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        set_path(&mut state.tree, key, value);
    }

    pub fn all(&self) -> Table {
        self.reload_if_needed();
        let state = match self.state.read() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.tree.clone()
    }
}

/// 直接反序列化失败时，把整数值的浮点转成整数再试一次
fn deserialize<T: DeserializeOwned>(value: Value) -> Result<T, toml::de::Error> {
    match value.clone().try_into() {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            let normalized = integral_floats(value);
            normalized.try_into().map_err(|_: toml::de::Error| e)
        }
    }
}

fn integral_floats(value: Value) -> Value {
    match value {
        Value::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Value::Integer(f as i64)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(integral_floats).collect()),
        Value::Table(table) => Value::Table(
            table
                .into_iter()
                .map(|(k, v)| (k, integral_floats(v)))
                .collect(),
        ),
        other => other,
    }
}

fn read_sources(sources: &ConfigSources) -> Result<ConfigState, Exception> {
    let mut timestamps = vec![];

    // 默认配置（最低优先级）
    if !sources.defaults.is_file() {
        return Err(Exception::Config(format!(
            "The default config file '{}' does not exist.",
            sources.defaults.display()
        )));
    }
    let mut tree = read_toml(&sources.defaults)?;
    timestamps.push((sources.defaults.clone(), modified_time(&sources.defaults)?));

    // 应用配置片段
    if let Some(dir) = &sources.app_dir {
        for file in config_fragments(dir)? {
            debug!("合并配置片段: {}", file.display());
            let fragment = read_toml(&file)?;
            merge(&mut tree, fragment);
            timestamps.push((file.clone(), modified_time(&file)?));
        }
    }

    // 环境文件（最高优先级）
    if let Some(env_file) = &sources.env_file {
        if env_file.is_file() {
            let contents = fs::read_to_string(env_file)?;
            let mut env = Table::new();
            for (key, raw) in parse_env_file(&contents) {
                set_path(&mut env, &key, parse_env_value(&raw));
            }
            merge(&mut tree, env);
            timestamps.push((env_file.clone(), modified_time(env_file)?));
        }
    }

    validate_required_settings(&tree)?;
    Ok(ConfigState { tree, timestamps })
}

fn read_toml(path: &Path) -> Result<Table, Exception> {
    let contents = fs::read_to_string(path)?;
    contents
        .parse::<Table>()
        .map_err(|e| Exception::Config(format!("{}: {}", path.display(), e)))
}

/// 目录下的全部 `*.toml` 文件，按文件名排序
fn config_fragments(dir: &Path) -> Result<Vec<PathBuf>, Exception> {
    if !dir.is_dir() {
        return Err(Exception::Config(format!(
            "The application config directory '{}' does not exist.",
            dir.display()
        )));
    }
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == "toml") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn modified_time(path: &Path) -> Result<SystemTime, Exception> {
    Ok(fs::metadata(path)?.modified()?)
}

fn validate_required_settings(tree: &Table) -> Result<(), Exception> {
    for setting in REQUIRED_SETTINGS {
        if !tree.contains_key(setting) {
            return Err(Exception::MissingSetting(setting.to_string()));
        }
    }
    Ok(())
}

/// 深度合并：两侧都是表时递归合并，否则由 `overlay` 的值替换
pub fn merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        match value {
            Value::Table(incoming) => {
                if let Some(Value::Table(existing)) = base.get_mut(&key) {
                    merge(existing, incoming);
                    continue;
                }
                base.insert(key, Value::Table(incoming));
            }
            value => {
                base.insert(key, value);
            }
        }
    }
}

fn lookup<'a>(tree: &'a Table, key: &str) -> Option<&'a Value> {
    let mut segments = key.split('.');
    let mut current = tree.get(segments.next()?)?;
    for segment in segments {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

fn set_path(tree: &mut Table, key: &str, value: Value) {
    let mut segments: Vec<&str> = key.split('.').collect();
    let last = segments.pop().unwrap_or_default();
    let mut current = tree;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !entry.is_table() {
            *entry = Value::Table(Table::new());
        }
        current = match entry {
            Value::Table(t) => t,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// 解析 `KEY=VALUE` 行，忽略空行与 `#` 注释，去掉成对的引号
pub fn parse_env_file(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = ['"', '\'']
                .iter()
                .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// 环境变量值的类型推断：
/// `true`/`false` -> 布尔，数字 -> 浮点，含逗号 -> 去空白的字符串列表，其余保持字符串
pub fn parse_env_value(raw: &str) -> Value {
    match raw {
        "true" => return Value::Boolean(true),
        "false" => return Value::Boolean(false),
        _ => {}
    }
    if raw.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(number) = raw.trim().parse::<f64>() {
            if number.is_finite() {
                return Value::Float(number);
            }
        }
    }
    if raw.contains(',') {
        return Value::Array(
            raw.split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        );
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    fn table(s: &str) -> Table {
        s.parse().unwrap()
    }

    #[test]
    fn test_merge_is_recursive() {
        let mut base = table("[a]\nx = 1\ny = 2\n");
        merge(&mut base, table("[a]\ny = 3\nz = 4\n"));
        assert_eq!(base, table("[a]\nx = 1\ny = 3\nz = 4\n"));
    }

    #[test]
    fn test_merge_replaces_non_tables() {
        let mut base = table("a = [1, 2]\n[b]\nx = 1\n");
        merge(&mut base, table("a = [3]\nb = \"flat\"\n"));
        assert_eq!(base, table("a = [3]\nb = \"flat\"\n"));
    }

    #[test]
    fn test_parse_env_value_grammar() {
        assert_eq!(parse_env_value("true"), Value::Boolean(true));
        assert_eq!(parse_env_value("false"), Value::Boolean(false));
        assert_eq!(parse_env_value("42"), Value::Float(42.0));
        assert_eq!(parse_env_value("3.5"), Value::Float(3.5));
        assert_eq!(
            parse_env_value("a, b ,c"),
            Value::Array(vec![
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("c".into()),
            ])
        );
        assert_eq!(parse_env_value("inf"), Value::String("inf".into()));
        assert_eq!(parse_env_value("TRUE"), Value::String("TRUE".into()));
    }

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file("# comment\n\nAPP_ENV=prod\nexport NAME=\"My App\"\nbroken\n=novalue\n");
        assert_eq!(
            parsed,
            vec![
                ("APP_ENV".to_string(), "prod".to_string()),
                ("NAME".to_string(), "My App".to_string()),
            ]
        );
    }

    #[test]
    fn test_priority_default_fragment_env() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        let app_dir = dir.path().join("config");
        fs::create_dir(&app_dir).unwrap();
        let env = dir.path().join(".env");
        write(&defaults, "debug = false\nlogs = {}\n[a.b]\nc = \"default\"\nkeep = 1\n");
        write(&app_dir.join("app.toml"), "[a.b]\nc = \"fragment\"\n");
        write(&env, "a.b.c=env\n");

        let config = Config::load(
            ConfigSources::new(&defaults)
                .with_app_dir(&app_dir)
                .with_env_file(&env),
        )
        .unwrap();
        assert_eq!(config.get("a.b.c"), Some(Value::String("env".into())));
        assert_eq!(config.get("a.b.keep"), Some(Value::Integer(1)));
    }

    #[test]
    fn test_fragments_merge_in_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        let app_dir = dir.path().join("config");
        fs::create_dir(&app_dir).unwrap();
        write(&defaults, "debug = false\nlogs = {}\n");
        write(&app_dir.join("b.toml"), "name = \"b\"\n");
        write(&app_dir.join("a.toml"), "name = \"a\"\nonly_a = true\n");
        write(&app_dir.join("notes.txt"), "name = \"ignored\"\n");

        let config = Config::load(ConfigSources::new(&defaults).with_app_dir(&app_dir)).unwrap();
        assert_eq!(config.get_str("name", ""), "b");
        assert!(config.get_bool("only_a", false));
    }

    #[test]
    fn test_missing_required_setting_fails() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        write(&defaults, "debug = true\n");
        match Config::load(ConfigSources::new(&defaults)) {
            Err(Exception::MissingSetting(s)) => assert_eq!(s, "logs"),
            other => panic!("expected MissingSetting, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_missing_sources_fail() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load(ConfigSources::new(dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(Exception::Config(_))));

        let defaults = dir.path().join("defaults.toml");
        write(&defaults, "debug = true\nlogs = {}\n");
        let bad_dir = Config::load(
            ConfigSources::new(&defaults).with_app_dir(dir.path().join("absent")),
        );
        assert!(matches!(bad_dir, Err(Exception::Config(_))));

        // 环境文件不存在时直接跳过
        let no_env = Config::load(
            ConfigSources::new(&defaults).with_env_file(dir.path().join(".env")),
        );
        assert!(no_env.is_ok());
    }

    #[test]
    fn test_get_returns_none_through_scalars() {
        let config = Config::from_table(table("debug = true\nlogs = {}\n[a]\nb = 1\n")).unwrap();
        assert_eq!(config.get("a.b.c"), None);
        assert_eq!(config.get("missing.key"), None);
        assert_eq!(config.get_or("a.b", 0i64), 1);
        assert_eq!(config.get_or("a", 7i64), 7);
    }

    #[test]
    fn test_set_creates_intermediate_tables() {
        let config = Config::from_table(table("debug = true\nlogs = {}\nx = 1\n")).unwrap();
        config.set("x.y.z", Value::Boolean(true));
        assert!(config.get_bool("x.y.z", false));
    }

    #[test]
    fn test_reload_on_mtime_change_discards_set() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        write(&defaults, "debug = false\nlogs = {}\nversion = 1\n");
        let config = Config::load(ConfigSources::new(&defaults)).unwrap();
        config.set("version", Value::Integer(99));
        assert_eq!(config.get_or("version", 0i64), 99);

        write(&defaults, "debug = false\nlogs = {}\nversion = 2\n");
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&defaults)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(config.get_or("version", 0i64), 2);
    }

    #[test]
    fn test_env_numbers_read_as_integers() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        let env = dir.path().join(".env");
        write(
            &defaults,
            "debug = false\nlogs = {}\n[server]\nport = 7878\n[cache.memory]\ncapacity = 1024\n",
        );
        write(&env, "server.port=9000\ncache.memory.capacity=64\nratio=0.5\n");

        let config = Config::load(ConfigSources::new(&defaults).with_env_file(&env)).unwrap();
        assert_eq!(config.get("server.port"), Some(Value::Float(9000.0)));
        assert_eq!(config.get_or("server.port", 0u16), 9000);
        assert_eq!(config.get_or("cache.memory.capacity", 0usize), 64);
        assert_eq!(config.get_or("ratio", 0.0f64), 0.5);
        // 非整数的浮点不会被截断
        assert_eq!(config.get_or("ratio", 7i64), 7);
    }

    #[test]
    fn test_section_accepts_env_numbers() {
        #[derive(Debug, serde_derive::Deserialize)]
        struct Rotation {
            max_files: u32,
            max_size: u64,
        }

        let config = Config::from_table(table("debug = true\nlogs = {}\n")).unwrap();
        config.set("rotation.max_files", parse_env_value("5"));
        config.set("rotation.max_size", parse_env_value("1048576"));
        let rotation: Rotation = config.section("rotation").unwrap();
        assert_eq!(rotation.max_files, 5);
        assert_eq!(rotation.max_size, 1_048_576);
    }

    #[test]
    fn test_failed_reload_keeps_old_tree() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        write(&defaults, "debug = false\nlogs = {}\nversion = 1\n");
        let config = Config::load(ConfigSources::new(&defaults)).unwrap();

        write(&defaults, "this is not toml = = =");
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&defaults)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(config.get_or("version", 0i64), 1);
    }

    #[test]
    fn test_failed_reload_records_new_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let defaults = dir.path().join("defaults.toml");
        write(&defaults, "debug = false\nlogs = {}\nversion = 1\n");
        let config = Config::load(ConfigSources::new(&defaults)).unwrap();

        write(&defaults, "this is not toml = = =");
        let later = SystemTime::now() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&defaults)
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert_eq!(config.get_or("version", 0i64), 1);

        let state = config.state.read().unwrap();
        assert_eq!(state.timestamps[0].1, modified_time(&defaults).unwrap());
    }
}
