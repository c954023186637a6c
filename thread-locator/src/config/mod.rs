//! Locator configuration.
//!
//! Settings come from a TOML file (by default
//! `<config dir>/thread-locator/config.toml`); a missing default file means
//! built-in defaults. Command line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = "thread-locator";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Locator configuration, field for field what the TOML file may contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Board the watched thread lives on.
    pub board: String,
    /// Base URL of the JSON API.
    pub api_base: String,
    /// Base URL used to build the successor link handed to the user.
    pub site_base: String,
    /// Keywords (case-insensitive) searched in a thread's subject and first post.
    pub thread_keywords: Vec<String>,
    /// Image MD5 (base64, as published by the API) of the marker image.
    pub marker_md5: String,
    /// Image count at which the thread is considered full and links are collected.
    pub image_limit: u32,
    /// Seconds between two requests to the API across all candidates.
    pub api_request_interval_secs: u64,
    /// Seconds between two polls of the same candidate.
    pub thread_update_interval_secs: u64,
    /// Seconds after which an API request times out.
    pub thread_update_ttl_secs: u64,
    /// Polls per candidate before giving up, `0` for unlimited.
    pub thread_update_retry_limit: u32,
    /// Seconds between two refreshes of the watched thread.
    pub page_refresh_interval_secs: u64,
    /// Open the successor without asking.
    pub new_thread_auto_open: bool,
    /// Open the successor in a new browser tab.
    pub new_thread_open_in_new_tab: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            board: "mlp".to_string(),
            api_base: imageboard_api::client::DEFAULT_API_BASE.to_string(),
            site_base: imageboard_api::client::DEFAULT_SITE_BASE.to_string(),
            thread_keywords: [
                "MLP General",
                "MLPG",
                "My Little Pony General",
                "Hub",
                "MLP",
                "Pony",
                "Ponies",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            marker_md5: "YgIC5DRjGYcY2F4I+vJkOw==".to_string(),
            image_limit: 230,
            api_request_interval_secs: 1,
            thread_update_interval_secs: 10,
            thread_update_ttl_secs: 10,
            thread_update_retry_limit: 0,
            page_refresh_interval_secs: 10,
            new_thread_auto_open: false,
            new_thread_open_in_new_tab: true,
        }
    }
}

impl LocatorConfig {
    /// Default location of the config file, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// tried and defaults are used when nothing is there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&raw)?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, the format `load` accepts.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.board.trim().is_empty() {
            return Err(Error::config("board must not be empty"));
        }
        if self.thread_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(Error::config("thread_keywords must contain a keyword"));
        }
        if self.marker_md5.trim().is_empty() {
            return Err(Error::config("marker_md5 must not be empty"));
        }
        for (name, value) in [
            ("api_request_interval_secs", self.api_request_interval_secs),
            ("thread_update_interval_secs", self.thread_update_interval_secs),
            ("thread_update_ttl_secs", self.thread_update_ttl_secs),
            ("page_refresh_interval_secs", self.page_refresh_interval_secs),
        ] {
            if value == 0 {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_secs(self.api_request_interval_secs)
    }

    pub fn thread_update_interval(&self) -> Duration {
        Duration::from_secs(self.thread_update_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.thread_update_ttl_secs)
    }

    pub fn page_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.page_refresh_interval_secs)
    }
}
