//! Configuration loader and validator for the beatmap synchronizer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub osu: Osu,
    pub queues: Queues,
    pub validation: Validation,
}

/// Local paths and artifact naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Directory for downloaded `.osu` files, relative to `data_dir`.
    pub beatmaps_dir: String,
    /// Collection artifact path, relative to `data_dir`.
    pub collection_file: String,
    pub collection_prefix: String,
}

/// osu! API credentials and hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Osu {
    pub client_id: u64,
    pub client_secret: String,
    pub api_base: String,
    pub files_base: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queues {
    pub concurrency: usize,
    /// Per-task limit; 0 disables it.
    pub task_timeout_secs: u64,
    pub download: DownloadQueue,
}

/// Throttle for the file host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadQueue {
    pub concurrency: usize,
    pub interval_ms: u64,
    pub interval_cap: u32,
}

/// Business rules a beatmap must satisfy to be persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validation {
    pub modes: Vec<String>,
    pub min_total_length: i64,
    pub require_checksum: bool,
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn beatmaps_path(&self) -> PathBuf {
        Path::new(&self.resolved_data_dir()).join(&self.beatmaps_dir)
    }

    pub fn collection_path(&self) -> PathBuf {
        Path::new(&self.resolved_data_dir()).join(&self.collection_file)
    }
}

impl Queues {
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }
}

impl DownloadQueue {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Ensure required directories exist (data dir and the beatmap file dir).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())?;
        fs::create_dir_all(self.app.beatmaps_path())
    }

    /// Default SQLite URL inside the data directory, created on first use.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/beatmaps.db?mode=rwc", self.app.resolved_data_dir())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.beatmaps_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.beatmaps_dir must be non-empty"));
    }
    if cfg.app.collection_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.collection_file must be non-empty"));
    }

    if cfg.osu.client_id == 0 {
        return Err(ConfigError::Invalid("osu.client_id must be > 0"));
    }
    if cfg.osu.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("osu.client_secret must be non-empty"));
    }
    for base in [&cfg.osu.api_base, &cfg.osu.files_base] {
        if reqwest::Url::parse(base).is_err() {
            return Err(ConfigError::Invalid("osu.api_base and osu.files_base must be absolute URLs"));
        }
    }
    if cfg.osu.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("osu.request_timeout_secs must be > 0"));
    }

    if cfg.queues.concurrency == 0 {
        return Err(ConfigError::Invalid("queues.concurrency must be > 0"));
    }
    if cfg.queues.download.concurrency == 0 {
        return Err(ConfigError::Invalid("queues.download.concurrency must be > 0"));
    }
    if cfg.queues.download.interval_cap == 0 {
        return Err(ConfigError::Invalid("queues.download.interval_cap must be > 0"));
    }

    if cfg.validation.modes.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Invalid("validation.modes must not contain empty entries"));
    }

    Ok(())
}

/// Example configuration with the defaults used against osu.ppy.sh.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  beatmaps_dir: "beatmaps"
  collection_file: "collection.db"
  collection_prefix: "beatmap-sync"

osu:
  client_id: 12345
  client_secret: "YOUR_OSU_CLIENT_SECRET"
  api_base: "https://osu.ppy.sh/"
  files_base: "https://osu.ppy.sh/"
  request_timeout_secs: 30

queues:
  concurrency: 8
  task_timeout_secs: 120
  download:
    concurrency: 1
    interval_ms: 5000
    interval_cap: 1

validation:
  modes:
    - "osu"
  min_total_length: 30
  require_checksum: true
"#
}
