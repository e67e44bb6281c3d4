//! Configuration types and loading
//!
//! Config precedence: `--config` > `CONFIG_PATH` env var > `fx-console.toml`.
//! Every section is optional and falls back to the library defaults. Login
//! credentials come from `FX_USERNAME` / `FX_PASSWORD` and are never read
//! from the TOML file.

use common::Secret;
use fx_client::RatesConfig;
use serde::Deserialize;
use session::SessionConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "fx-console.toml";
pub const USERNAME_ENV: &str = "FX_USERNAME";
pub const PASSWORD_ENV: &str = "FX_PASSWORD";

/// File name of the durable scope inside `storage.data_dir`.
const DURABLE_FILE: &str = "durable.json";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub rates: RatesSection,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct RatesSection {
    #[serde(default = "default_base_currency")]
    pub default_base: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: default_refresh_threshold(),
        }
    }
}

impl Default for RatesSection {
    fn default() -> Self {
        Self {
            default_base: default_base_currency(),
            poll_interval_secs: default_poll_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_base_url() -> String {
    session::DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_refresh_threshold() -> u64 {
    session::DEFAULT_REFRESH_THRESHOLD.as_secs()
}

fn default_base_currency() -> String {
    fx_client::rates::DEFAULT_BASE_CURRENCY.to_string()
}

fn default_poll_interval() -> u64 {
    fx_client::rates::DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_stale_after() -> u64 {
    fx_client::rates::DEFAULT_STALE_AFTER.as_secs()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.local/share/fx-console")
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.rates.poll_interval_secs == 0 {
            return Err(common::Error::Config(
                "poll_interval_secs must be greater than 0".into(),
            ));
        }

        let base = &self.rates.default_base;
        if base.len() != 3 || !base.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(common::Error::Config(format!(
                "default_base must be a three-letter currency code, got: {base}"
            )));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            api_base_url: self.api.base_url.clone(),
            refresh_threshold: Duration::from_secs(self.session.refresh_threshold_secs),
        }
    }

    pub fn rates_config(&self) -> RatesConfig {
        RatesConfig {
            default_base: self.rates.default_base.clone(),
            poll_interval: Duration::from_secs(self.rates.poll_interval_secs),
            stale_after: Duration::from_secs(self.rates.stale_after_secs),
        }
    }

    /// Path of the durable-scope file, with a leading `~` expanded.
    pub fn durable_path(&self) -> PathBuf {
        expand_home(&self.storage.data_dir).join(DURABLE_FILE)
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Login credentials taken from the environment.
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

impl Credentials {
    pub fn from_env() -> common::Result<Self> {
        let username = std::env::var(USERNAME_ENV)
            .map_err(|_| common::Error::Config(format!("{USERNAME_ENV} is not set")))?;
        let password = std::env::var(PASSWORD_ENV)
            .map_err(|_| common::Error::Config(format!("{PASSWORD_ENV} is not set")))?;
        Ok(Self {
            username,
            password: Secret::new(password),
        })
    }
}
