//! Configuration loader and validator for the outreach tool.
//!
//! Settings come from an optional YAML file, then `.env` / process
//! environment overrides for credentials, delays and log level.
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::sender::DelayRange;
use crate::worklist::CategorySource;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid environment variable {name}: {value}")]
    Env { name: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub categories: Vec<CategorySource>,
    #[serde(default)]
    pub platform: Platform,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub data_dir: String,
    pub logs_dir: String,
    pub users_file: String,
    pub templates_file: String,
    pub min_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub log_level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            logs_dir: "./logs".into(),
            users_file: "./data/users.csv".into(),
            templates_file: "./data/message_templates.json".into(),
            min_delay_seconds: 30,
            max_delay_seconds: 90,
            log_level: "info".into(),
        }
    }
}

/// Social platform gateway and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Platform {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub session_file: String,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            base_url: "https://platform.example.com/".into(),
            username: String::new(),
            password: String::new(),
            session_file: "./data/session.json".into(),
        }
    }
}

impl App {
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        expand_home(&self.logs_dir)
    }

    pub fn users_file(&self) -> PathBuf {
        expand_home(&self.users_file)
    }

    pub fn templates_file(&self) -> PathBuf {
        expand_home(&self.templates_file)
    }

    /// Path of the append-only send log inside `logs_dir`.
    pub fn send_log_file(&self) -> PathBuf {
        self.logs_dir().join("sent_log.csv")
    }

    pub fn delay_range(&self) -> DelayRange {
        DelayRange::new(self.min_delay_seconds, self.max_delay_seconds)
    }
}

impl Platform {
    pub fn session_file(&self) -> PathBuf {
        expand_home(&self.session_file)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and `app.logs_dir`).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(self.app.data_dir())?;
        fs::create_dir_all(self.app.logs_dir())
    }

    /// Apply overrides from a variable lookup; `lookup` is `std::env::var` in production.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IG_USERNAME") {
            self.platform.username = v;
        }
        if let Some(v) = lookup("IG_PASSWORD") {
            self.platform.password = v;
        }
        if let Some(v) = lookup("PLATFORM_BASE_URL") {
            self.platform.base_url = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.app.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("MIN_DELAY_SECONDS") {
            self.app.min_delay_seconds = parse_seconds("MIN_DELAY_SECONDS", v)?;
        }
        if let Some(v) = lookup("MAX_DELAY_SECONDS") {
            self.app.max_delay_seconds = parse_seconds("MAX_DELAY_SECONDS", v)?;
        }
        Ok(())
    }
}

fn parse_seconds(name: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name, value })
}

/// Load configuration and validate it.
/// - Reads `.env` into the process environment if present.
/// - A missing YAML file at `path` falls back to defaults.
/// - Environment variables override file values.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    dotenv::dotenv().ok();
    let mut cfg = read_file(path.unwrap_or_else(|| Path::new("config.yaml")))?;
    cfg.apply_overrides(|name| env::var(name).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Parse the YAML file at `path`, or defaults when it does not exist.
/// No environment overrides, no validation.
pub fn read_file(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.logs_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.logs_dir must be non-empty"));
    }
    if cfg.app.users_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.users_file must be non-empty"));
    }
    if cfg.app.templates_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.templates_file must be non-empty"));
    }
    if cfg.app.min_delay_seconds > cfg.app.max_delay_seconds {
        return Err(ConfigError::Invalid(
            "app.min_delay_seconds must be <= app.max_delay_seconds",
        ));
    }
    if cfg.platform.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("platform.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.platform.base_url).is_err() {
        return Err(ConfigError::Invalid("platform.base_url must be a valid URL"));
    }
    if cfg.platform.session_file.trim().is_empty() {
        return Err(ConfigError::Invalid("platform.session_file must be non-empty"));
    }
    for source in &cfg.categories {
        if source.name.trim().is_empty() {
            return Err(ConfigError::Invalid("categories[].name must be non-empty"));
        }
        if source.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("categories[].path must be non-empty"));
        }
    }
    // Credentials are checked at login time so dry runs work without them.
    Ok(())
}

/// Expand a leading `~/` to `$HOME`.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(format!("{}/{}", home.trim_end_matches('/'), rest));
        }
    }
    PathBuf::from(path)
}

/// Example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  logs_dir: "./logs"
  users_file: "./data/users.csv"
  templates_file: "./data/message_templates.json"
  min_delay_seconds: 30
  max_delay_seconds: 90
  log_level: "info"

categories:
  - name: "fashion"
    path: "category/fashion.csv"
  - name: "home_decor"
    path: "category/home_decor.csv"
  - name: "cosmetics"
    path: "category/cosmetics.csv"

platform:
  base_url: "https://platform.example.com/"
  username: "YOUR_PLATFORM_USERNAME"
  password: "YOUR_PLATFORM_PASSWORD"
  session_file: "./data/session.json"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.categories.len(), 3);
        assert_eq!(cfg.categories[0].name, "fashion");
        assert_eq!(cfg.app.delay_range(), DelayRange::new(30, 90));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        validate(&cfg).unwrap();
    }

    #[test]
    fn partial_app_section_keeps_other_defaults() {
        let cfg: Config = serde_yaml::from_str("app:\n  min_delay_seconds: 5\n").unwrap();
        assert_eq!(cfg.app.min_delay_seconds, 5);
        assert_eq!(cfg.app.max_delay_seconds, 90);
        assert_eq!(cfg.app.logs_dir, "./logs");
    }

    #[test]
    fn inverted_delay_range_rejected() {
        let mut cfg = example_cfg();
        cfg.app.min_delay_seconds = 100;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("min_delay_seconds")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_platform_settings() {
        let mut cfg = example_cfg();
        cfg.platform.base_url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.platform.base_url = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("valid URL")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.categories[1].name = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn overrides_replace_credentials_and_delays() {
        let vars: HashMap<&str, &str> = [
            ("IG_USERNAME", "brand"),
            ("IG_PASSWORD", "secret"),
            ("MIN_DELAY_SECONDS", "1"),
            ("MAX_DELAY_SECONDS", "2"),
            ("LOG_LEVEL", "DEBUG"),
        ]
        .into_iter()
        .collect();
        let mut cfg = example_cfg();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.platform.username, "brand");
        assert_eq!(cfg.platform.password, "secret");
        assert_eq!(cfg.app.delay_range(), DelayRange::new(1, 2));
        assert_eq!(cfg.app.log_level, "debug");
    }

    #[test]
    fn malformed_delay_override_is_an_error() {
        let mut cfg = example_cfg();
        let err = cfg
            .apply_overrides(|k| (k == "MAX_DELAY_SECONDS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "MAX_DELAY_SECONDS", .. }));
    }

    #[test]
    fn ensure_dirs_creates_data_and_logs_dirs() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.app.logs_dir = td.path().join("logs").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("logs").exists());
    }

    #[test]
    fn read_file_without_environment() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let mut cfg = read_file(&p).unwrap();
        cfg.apply_overrides(|_| None).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.categories[2].name, "cosmetics");
        assert_eq!(cfg.app.delay_range(), DelayRange::new(30, 90));
        assert_eq!(cfg.app.send_log_file(), PathBuf::from("./logs/sent_log.csv"));

        let defaults = read_file(&td.path().join("missing.yaml")).unwrap();
        assert_eq!(defaults, Config::default());
    }
}
