use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::workflow::WorkflowSettings;
use crate::{rlog_debug, Error, Result};

/// Default seconds between QR file polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Default seconds to wait for a fresh QR code after restarting the adapter.
pub const DEFAULT_QR_TIMEOUT_SECS: u64 = 60;

/// Default seconds to wait for the operator to confirm the login.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the live-connection server listens on.
    pub listen: String,
    /// SQLite file holding alias bindings. Defaults to `~/.relogin/bindings.db`.
    pub db_path: Option<String>,
    pub panel: PanelConfig,
    pub relogin: ReloginConfig,
    pub artifacts: ArtifactConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub base_url: String,
    pub api_key: String,
    pub daemon_id: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloginConfig {
    /// QR image path relative to the protocol instance's working directory.
    pub qr_file: String,
    pub poll_interval_secs: u64,
    pub qr_timeout_secs: u64,
    pub auth_timeout_secs: u64,
    /// Appended to the relogin key to find the core instance when none is given.
    pub core_suffix: String,
}

/// `[log]` section. Both entries are optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// error, warn, info, debug or trace.
    pub level: Option<String>,
    /// Log file path. Defaults to `~/.relogin/relogin.log`.
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ArtifactConfig {
    /// When set, QR files are read from `<local_base>/<instance>/<qr_file>`
    /// instead of through the panel's file API.
    pub local_base: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8088".to_string(),
            db_path: None,
            panel: PanelConfig::default(),
            relogin: ReloginConfig::default(),
            artifacts: ArtifactConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:23333".to_string(),
            api_key: String::new(),
            daemon_id: "local".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for ReloginConfig {
    fn default() -> Self {
        Self {
            qr_file: "qrcode.png".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            qr_timeout_secs: DEFAULT_QR_TIMEOUT_SECS,
            auth_timeout_secs: DEFAULT_AUTH_TIMEOUT_SECS,
            core_suffix: "_core".to_string(),
        }
    }
}

impl Config {
    pub fn relogin_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".relogin"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::relogin_dir()?.join("relogin.toml"))
    }

    pub fn effective_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(expand_tilde(path)),
            None => Ok(Self::relogin_dir()?.join("bindings.db")),
        }
    }

    pub fn local_artifact_base(&self) -> Option<PathBuf> {
        self.artifacts.local_base.as_deref().map(expand_tilde)
    }

    /// Timings and file location handed to every workflow.
    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            qr_file: self.relogin.qr_file.clone(),
            poll_interval: Duration::from_secs(self.relogin.poll_interval_secs.max(1)),
            qr_timeout: Duration::from_secs(self.relogin.qr_timeout_secs),
            auth_timeout: Duration::from_secs(self.relogin.auth_timeout_secs),
        }
    }

    /// Load from the given path, or the default location when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        rlog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            rlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        config.validate()?;
        rlog_debug!(
            "Config loaded: listen={}, panel={}, qr_file={}, poll={}s, qr_timeout={}s, auth_timeout={}s",
            config.listen,
            config.panel.base_url,
            config.relogin.qr_file,
            config.relogin.poll_interval_secs,
            config.relogin.qr_timeout_secs,
            config.relogin.auth_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                rlog_debug!("Creating config directory: {}", parent.display());
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        rlog_debug!("Config saved to {}", path.display());
        Ok(path)
    }

    fn validate(&self) -> Result<()> {
        if self.relogin.qr_file.trim().is_empty() {
            return Err(Error::InvalidInput("relogin.qr_file must not be empty".into()));
        }
        if self.relogin.qr_timeout_secs == 0 || self.relogin.auth_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "relogin timeouts must be greater than zero".into(),
            ));
        }
        if let Some(level) = &self.log.level {
            level.parse::<crate::log::LogLevel>()?;
        }
        Ok(())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
