use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app_dirs::AppDirs;
use crate::proctor::ProctorOptions;
use crate::session::SessionSettings;

pub const ADMIN_SECRET_ENV: &str = "DPOTD_ADMIN_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Backend base URL. Empty until someone configures it.
    pub endpoint: String,
    pub test_duration_mins: u64,
    pub tick_ms: u64,
    pub reentry_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub min_cols: u16,
    pub min_rows: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            test_duration_mins: 120,
            tick_ms: 1000,
            reentry_delay_ms: 100,
            request_timeout_secs: 15,
            min_cols: 80,
            min_rows: 24,
            admin_secret: None,
        }
    }
}

/// Command line values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub test_duration_mins: Option<u64>,
    pub admin_secret: Option<String>,
}

impl Config {
    pub fn apply(mut self, overrides: Overrides) -> Self {
        if let Some(endpoint) = overrides.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(mins) = overrides.test_duration_mins {
            self.test_duration_mins = mins;
        }
        if let Some(secret) = overrides.admin_secret.filter(|s| !s.is_empty()) {
            self.admin_secret = Some(secret);
        }
        self
    }

    /// Reads the admin secret override from the environment.
    pub fn apply_env(self) -> Self {
        let secret = std::env::var(ADMIN_SECRET_ENV).ok();
        self.apply(Overrides {
            admin_secret: secret,
            ..Overrides::default()
        })
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn proctor_options(&self) -> ProctorOptions {
        ProctorOptions {
            settings: SessionSettings {
                test_duration: Duration::from_secs(self.test_duration_mins * 60),
            },
            min_cols: self.min_cols,
            min_rows: self.min_rows,
            reentry_delay: Duration::from_millis(self.reentry_delay_ms),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("dpotd_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// Missing or unreadable files fall back to the defaults.
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "ignoring malformed config")
                }
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
