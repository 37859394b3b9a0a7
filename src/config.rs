/*
 * aurlink - Asynchronous AUR client.
 * Copyright (C) 2025  compiledkernel-idk and aurlink contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Configuration management with validation and defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AurError, AurResult};

/// Main configuration structure for aurlink
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enable colored output
    pub color: bool,

    /// AUR-specific configuration
    pub aur: AurConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color: true,
            aur: AurConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// AUR-specific configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AurConfig {
    /// AUR base URL (RPC, cgit and git remotes hang off it)
    pub base_url: String,

    /// Request debugging: "requests:<path>" traces outbound headers to a
    /// file, any other non-empty value traces to stderr
    pub debug: Option<String>,

    /// Program run for clone/update requests
    pub git_program: PathBuf,
}

impl Default for AurConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aur.archlinux.org".to_string(),
            debug: None,
            git_program: PathBuf::from("git"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (empty = no file logging)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. /etc/aurlink/aurlink.toml (system-wide)
    /// 2. ~/.config/aurlink/config.toml (user)
    /// 3. Environment variables (AURLINK_*)
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(parsed) = Self::read_file(Path::new("/etc/aurlink/aurlink.toml")) {
            config = config.merge(parsed);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("aurlink").join("config.toml");
            if let Some(parsed) = Self::read_file(&user_config) {
                config = config.merge(parsed);
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok())
    }

    fn read_file(path: &Path) -> Option<Config> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<Config>(&content) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("ignoring malformed config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one (other takes precedence for non-default values)
    fn merge(mut self, other: Config) -> Self {
        let default = Config::default();

        if other.color != default.color {
            self.color = other.color;
        }
        if other.logging.level != default.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }

        self.aur = self.aur.merge(other.aur);

        self
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = var("AURLINK_BASEURL") {
            self.aur.base_url = val;
        }

        if let Some(val) = var(crate::aur::DEBUG_ENV) {
            self.aur.debug = Some(val);
        }

        if let Some(val) = var("AURLINK_GIT") {
            self.aur.git_program = PathBuf::from(val);
        }

        if let Some(val) = var("AURLINK_LOG_LEVEL") {
            self.logging.level = val;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> AurResult<()> {
        let parsed = url::Url::parse(&self.aur.base_url).map_err(|e| AurError::Config {
            message: format!("invalid base_url '{}': {}", self.aur.base_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AurError::Config {
                message: format!("base_url must be http or https, got '{}'", parsed.scheme()),
            });
        }
        if self.aur.git_program.as_os_str().is_empty() {
            return Err(AurError::Config {
                message: "git_program must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl AurConfig {
    fn merge(mut self, other: AurConfig) -> Self {
        let default = AurConfig::default();

        if other.base_url != default.base_url {
            self.base_url = other.base_url;
        }
        if other.debug.is_some() {
            self.debug = other.debug;
        }
        if other.git_program != default.git_program {
            self.git_program = other.git_program;
        }

        self
    }
}
