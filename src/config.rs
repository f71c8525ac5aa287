use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::{flog_debug, Error, Result};

/// Default number of concurrently active sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 4;
/// Default grace period before non-responsive sessions are force-terminated.
pub const DEFAULT_GRACE_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Worker command line; the resolved prompt is appended as the last argument.
    pub command: Option<String>,
    /// Maximum number of concurrently active sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Grace period (seconds) for `shutdown_all` before force-termination.
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_grace_secs() -> u64 {
    DEFAULT_GRACE_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            shutdown_grace_secs: DEFAULT_GRACE_SECS,
        }
    }
}

impl Config {
    pub fn foreman_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".foreman"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::foreman_dir()?.join("foreman.toml"))
    }

    pub fn effective_command(&self) -> &str {
        self.command.as_deref().unwrap_or("claude")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        flog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            flog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        flog_debug!(
            "Config loaded: command={:?}, max_sessions={}, grace={}s",
            config.command,
            config.max_sessions,
            config.shutdown_grace_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::foreman_dir()?;
        flog_debug!("Config::save dir={}", dir.display());
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        flog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
