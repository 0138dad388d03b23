use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::event::EventConfig;
use crate::services::registry::RegistryConfig;

/// 环境变量覆盖的前缀，例如 `REGISTRY_MAX_LISTENERS`
pub const ENV_PREFIX: &str = "REGISTRY_";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub events: EventConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认日志级别，RUST_LOG 优先
    pub level: String,
    /// 周期性输出事件统计的间隔（秒），不设置则关闭
    pub stats_interval_secs: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            stats_interval_secs: None,
        }
    }
}

impl LoggingConfig {
    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

// REGISTRY_* 环境变量
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    log_level: Option<String>,
    stats_interval_secs: Option<u64>,
    enable_hooks: Option<bool>,
    max_listeners: Option<usize>,
    stream_capacity: Option<usize>,
    enable_metrics: Option<bool>,
}

impl Config {
    /// 加载 .env、config.toml，再应用环境变量覆盖
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to load .env file");
            }
        }
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.with_env_overrides(std::env::vars())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// 应用 `REGISTRY_*` 变量
    pub fn with_env_overrides<I>(mut self, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_iter(vars)?;

        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(secs) = overrides.stats_interval_secs {
            self.logging.stats_interval_secs = Some(secs);
        }
        if let Some(enable_hooks) = overrides.enable_hooks {
            self.registry.enable_hooks = enable_hooks;
        }
        if let Some(max_listeners) = overrides.max_listeners {
            self.registry.max_listeners = max_listeners;
        }
        if let Some(capacity) = overrides.stream_capacity {
            self.events.stream_capacity = capacity;
        }
        if let Some(enable_metrics) = overrides.enable_metrics {
            self.events.enable_metrics = enable_metrics;
        }
        Ok(self)
    }
}
