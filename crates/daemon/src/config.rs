// Daemon configuration
// Layered: built-in defaults -> TOML file -> CONVOY__* environment

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use convoy_core::domain::{RetentionConfig, SchedulerConfig};
use convoy_infra_system::CommandExecutorConfig;

pub const CONFIG_PATH_ENV: &str = "CONVOY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "~/.convoy/config.toml";
const DEFAULT_DB_PATH: &str = "~/.convoy/history.db";
const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// SQLite file, or a full `sqlite:` url
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Queue is only drained when a converter is configured
    #[serde(default)]
    pub converter: Option<CommandExecutorConfig>,
    /// Buffered events per subscriber before it starts lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scheduler: SchedulerConfig::default(),
            retention: RetentionConfig::default(),
            converter: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl DaemonConfig {
    /// Load from `$CONVOY_CONFIG` (or the default path) plus environment overrides
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&expand(&path))
    }

    /// A missing file is not an error; defaults apply
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("CONVOY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?;

        let config: DaemonConfig = settings
            .try_deserialize()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.retention.validate()?;
        Ok(config.expanded())
    }

    /// Resolve `~` in every configured path
    fn expanded(mut self) -> Self {
        self.db_path = expand_str(&self.db_path);
        self.retention.storage.archive_dir = expand_str(&self.retention.storage.archive_dir);
        self.retention.storage.backup_dir = expand_str(&self.retention.storage.backup_dir);
        if let Some(converter) = self.converter.as_mut() {
            converter.output_dir = expand(&converter.output_dir.to_string_lossy());
        }
        self
    }

    pub fn database_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}", self.db_path)
        }
    }
}

fn expand_str(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(expand_str(path))
}
