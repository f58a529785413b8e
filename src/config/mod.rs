#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ToolhubError;
use crate::tools::theme::Theme;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "TOOLHUB_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub poll: PollConfig,
    pub store: StoreConfig,
    pub ui: UiConfig,
    pub password: PasswordConfig,
    pub json: JsonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Pre-issued CSRF token. Empty means fetch one from `/csrf-token`.
    pub csrf_token: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_owned(),
            csrf_token: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
    pub max_interval_ms: u64,
    pub ping_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            max_interval_ms: 30_000,
            ping_interval_ms: 15_000,
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[must_use]
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub max_tasks: usize,
    /// Upper bound on the serialized envelope, in bytes. 0 disables the check.
    pub quota_bytes: u64,
    pub debounce_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.config/toolhub/scans.json".to_owned(),
            max_tasks: crate::scan::store::MAX_TASKS,
            quota_bytes: 5 * 1024 * 1024,
            debounce_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub theme: Theme,
    pub icons: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            icons: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PasswordConfig {
    pub length: usize,
    pub uppercase: bool,
    pub digits: bool,
    pub symbols: bool,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            length: 16,
            uppercase: true,
            digits: true,
            symbols: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JsonConfig {
    pub indent: usize,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    if let Some(p) = std::env::var_os(CONFIG_ENV)
        && !p.is_empty()
    {
        return Ok(ConfigPaths {
            config_file: PathBuf::from(p),
        });
    }

    let unix = home_config_path_unix();
    if !cfg!(windows) {
        return Ok(ConfigPaths { config_file: unix });
    }

    // Windows: prefer the Unix-style path if present for portability.
    if unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = ProjectDirs::from("dev", "toolhub", "toolhub")
        .context("failed to determine platform config directory")?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("toolhub").join("config.toml")
}

fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    let drive = std::env::var_os("HOMEDRIVE");
    let path = std::env::var_os("HOMEPATH");
    match (drive, path) {
        (Some(d), Some(p)) => Some(PathBuf::from(d).join(PathBuf::from(p))),
        _ => None,
    }
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // Expand $VAR and ${VAR}. Leave unknown vars untouched.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

pub fn load() -> anyhow::Result<(Config, ConfigPaths)> {
    let paths = default_paths()?;
    let (_doc, cfg) = load_from_file(&paths.config_file)?;
    cfg.validate()?;
    Ok((cfg, paths))
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    let (cfg, _paths) = load()?;
    Ok(toml::to_string_pretty(&cfg)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    let paths = default_paths()?;
    get_value_string_at_path(&paths.config_file, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    let paths = default_paths()?;
    set_value_string_at_path(&paths.config_file, key, value)
}

fn load_from_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;

    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let (_doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let norm = normalize_key(key);
    let value = lookup_value(&cfg, &norm);
    Ok(value.map(format_value_for_stdout))
}

pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = load_from_file(path)?;
    cfg.validate()?;

    let (norm_key, value_item) = normalize_key_and_parse_value(key, value)?;
    apply_set(&mut doc, &norm_key, value_item)?;

    // Validate by re-parsing the updated doc into a Config.
    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::debug!(key = %norm_key, path = %path.display(), "config value updated");
    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<(), ToolhubError> {
        let base = self.server.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ToolhubError::Config(
                "server.base_url must start with http:// or https://".to_owned(),
            ));
        }
        if self.server.timeout_secs == 0 {
            return Err(ToolhubError::Config(
                "server.timeout_secs must be >= 1".to_owned(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(ToolhubError::Config(
                "poll.interval_ms must be >= 1".to_owned(),
            ));
        }
        if self.poll.max_interval_ms < self.poll.interval_ms {
            return Err(ToolhubError::Config(
                "poll.max_interval_ms must be >= poll.interval_ms".to_owned(),
            ));
        }
        if self.poll.ping_interval_ms == 0 {
            return Err(ToolhubError::Config(
                "poll.ping_interval_ms must be >= 1".to_owned(),
            ));
        }
        if self.store.path.trim().is_empty() {
            return Err(ToolhubError::Config(
                "store.path must not be empty".to_owned(),
            ));
        }
        if self.store.max_tasks == 0 || self.store.max_tasks > crate::scan::store::MAX_TASKS {
            return Err(ToolhubError::Config(format!(
                "store.max_tasks must be between 1 and {}",
                crate::scan::store::MAX_TASKS
            )));
        }
        if self.password.length == 0 {
            return Err(ToolhubError::Config(
                "password.length must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Bool,
    Int,
    String,
    Enum(&'static [&'static str]),
}

fn normalize_key(key: &str) -> String {
    match key {
        "theme" => "ui.theme",
        "sonar.url" | "server.url" => "server.base_url",
        "poll.interval" => "poll.interval_ms",
        "poll.max_interval" => "poll.max_interval_ms",
        _ => key,
    }
    .to_owned()
}

fn normalize_key_and_parse_value(
    key: &str,
    value: &str,
) -> anyhow::Result<(String, toml_edit::Item)> {
    let norm = normalize_key(key);
    let key_type = key_type(&norm).ok_or_else(|| ToolhubError::InvalidConfigKey(key.to_owned()))?;
    let invalid = |msg: String| ToolhubError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    };
    let item = match key_type {
        KeyType::Bool => toml_edit::value(parse_bool(value).map_err(invalid)?),
        KeyType::Int => toml_edit::value(parse_int(value).map_err(invalid)?),
        KeyType::String => toml_edit::value(value),
        KeyType::Enum(allowed) => {
            let v = value.trim();
            if !allowed.contains(&v) {
                return Err(invalid(format!("must be one of: {}", allowed.join(", "))).into());
            }
            toml_edit::value(v)
        }
    };

    Ok((norm, item))
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "server.base_url" | "server.csrf_token" | "store.path" => KeyType::String,

        "ui.icons" | "password.uppercase" | "password.digits" | "password.symbols" => {
            KeyType::Bool
        }

        "server.timeout_secs"
        | "poll.interval_ms"
        | "poll.max_interval_ms"
        | "poll.ping_interval_ms"
        | "store.max_tasks"
        | "store.quota_bytes"
        | "store.debounce_ms"
        | "password.length"
        | "json.indent" => KeyType::Int,

        "ui.theme" => KeyType::Enum(&["dark", "light"]),

        _ => return None,
    })
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    let v = s
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("expected integer, got '{s}': {e}"))?;
    if v < 0 {
        return Err(format!("expected a non-negative integer, got {v}"));
    }
    Ok(v)
}

fn apply_set(
    doc: &mut toml_edit::DocumentMut,
    key: &str,
    value: toml_edit::Item,
) -> anyhow::Result<()> {
    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let Some((leaf, parents)) = parts.split_last() else {
        return Err(ToolhubError::InvalidConfigKey(key.to_owned()).into());
    };

    let mut cur = doc.as_table_mut();
    for seg in parents {
        if !cur.contains_key(seg) {
            let mut t = toml_edit::Table::new();
            t.set_implicit(true);
            cur.insert(seg, toml_edit::Item::Table(t));
        }
        cur = cur[seg].as_table_mut().ok_or_else(|| {
            ToolhubError::Config(format!("cannot set {key}: '{seg}' is not a table"))
        })?;
    }

    cur.insert(leaf, value);
    Ok(())
}

fn lookup_value(cfg: &Config, key: &str) -> Option<serde_json::Value> {
    let mut v = serde_json::to_value(cfg).ok()?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        match v {
            serde_json::Value::Object(mut map) => {
                v = map.remove(seg)?;
            }
            _ => return None,
        }
    }
    Some(v)
}

fn format_value_for_stdout(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_owned(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn config_validation_catches_invalid_values() {
        let mut cfg = Config::default();
        cfg.poll.max_interval_ms = cfg.poll.interval_ms - 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.server.base_url = "ftp://example.com".to_owned();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.store.max_tasks = crate::scan::store::MAX_TASKS + 30;
        assert!(cfg.validate().is_err());
        cfg.store.max_tasks = crate::scan::store::MAX_TASKS;
        cfg.validate().unwrap();
    }

    #[test]
    fn config_set_and_get_dot_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        set_value_string_at_path(&path, "ui.icons", "false").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "ui.icons")
                .unwrap()
                .as_deref(),
            Some("false")
        );

        set_value_string_at_path(&path, "theme", "light").unwrap();
        assert_eq!(
            get_value_string_at_path(&path, "ui.theme")
                .unwrap()
                .as_deref(),
            Some("light")
        );

        set_value_string_at_path(&path, "server.base_url", "https://hub.example.com").unwrap();
        set_value_string_at_path(&path, "poll.interval", "1000").unwrap();

        let (_doc, cfg) = load_from_file(&path).unwrap();
        cfg.validate().unwrap();
        assert!(!cfg.ui.icons);
        assert_eq!(cfg.ui.theme, Theme::Light);
        assert_eq!(cfg.server.base_url, "https://hub.example.com");
        assert_eq!(cfg.poll.interval_ms, 1000);
    }

    #[test]
    fn config_set_rejects_unknown_keys_and_bad_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        assert!(set_value_string_at_path(&path, "nope.key", "1").is_err());
        assert!(set_value_string_at_path(&path, "ui.theme", "solarized").is_err());
        assert!(set_value_string_at_path(&path, "poll.interval_ms", "-5").is_err());
        // Would break max >= interval.
        assert!(set_value_string_at_path(&path, "poll.max_interval_ms", "10").is_err());
        assert!(set_value_string_at_path(&path, "store.max_tasks", "80").is_err());
        assert!(!path.exists());
    }
}
