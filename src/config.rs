use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "FRONTIER_WEBVIEW_CONFIG";

const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_IDLE_WAIT_MS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Timeouts and loop tuning for a browser instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub script_timeout_ms: u64,
    pub content_timeout_ms: u64,
    pub cookie_timeout_ms: u64,
    /// How long an idle pump blocks before returning.
    pub idle_wait_ms: u64,
    /// Delay before the host delivers any completion.
    pub native_latency_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            script_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            content_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            cookie_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            idle_wait_ms: DEFAULT_IDLE_WAIT_MS,
            native_latency_ms: 0,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl BridgeConfig {
    /// Load from a YAML file. A missing path or file yields the defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                Ok(serde_yaml::from_str(&contents)?)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Load from the file named by `FRONTIER_WEBVIEW_CONFIG`, if set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }

    pub fn cookie_timeout(&self) -> Duration {
        Duration::from_millis(self.cookie_timeout_ms)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn native_latency(&self) -> Duration {
        Duration::from_millis(self.native_latency_ms)
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout_ms = millis(timeout);
        self
    }

    pub fn with_content_timeout(mut self, timeout: Duration) -> Self {
        self.content_timeout_ms = millis(timeout);
        self
    }

    pub fn with_cookie_timeout(mut self, timeout: Duration) -> Self {
        self.cookie_timeout_ms = millis(timeout);
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = millis(wait);
        self
    }

    pub fn with_native_latency(mut self, latency: Duration) -> Self {
        self.native_latency_ms = millis(latency);
        self
    }
}
