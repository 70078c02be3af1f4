//! Configuration management for aie-events.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (AIE_LAYOUT_PATH, etc.)
//! 2. Project-local config file (`./aie-events.toml`)
//! 3. User config file (`~/.config/aie-events/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # aie-events.toml
//!
//! # Register layout table (defaults to the built-in AIE1 table)
//! layout_path = "/etc/aie/layout.toml"
//!
//! # 2nd-level interrupt output line
//! chip_irq_line = 1
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::device::RegisterLayout;
use crate::events::DriverConfig;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// aie-events configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Path to a TOML register layout table.
    pub layout_path: Option<String>,

    /// Chip interrupt line driven by the 2nd-level controllers.
    pub chip_irq_line: Option<u8>,

    /// Poll budget per attempt while draining pending events.
    pub poll_timeout_us: Option<u32>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `aie-events.toml`
    /// 3. User config `~/.config/aie-events/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Driver tunables, with defaults for unset fields.
    pub fn driver_config(&self) -> DriverConfig {
        let defaults = DriverConfig::default();
        DriverConfig {
            chip_irq_line: self.chip_irq_line.unwrap_or(defaults.chip_irq_line),
            poll_timeout_us: self.poll_timeout_us.unwrap_or(defaults.poll_timeout_us),
        }
    }

    /// Register layout named by `layout_path`, or the AIE1 table.
    pub fn load_layout(&self) -> anyhow::Result<RegisterLayout> {
        match &self.layout_path {
            Some(path) => load_layout_file(Path::new(path)),
            None => Ok(RegisterLayout::aie1()),
        }
    }

    fn load_user_config() -> Option<Self> {
        Self::user_config_path().and_then(|path| Self::load_from_file(&path))
    }

    fn load_local_config() -> Option<Self> {
        Self::load_from_file(Path::new("aie-events.toml"))
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.layout_path.is_some() {
            self.layout_path = other.layout_path;
        }
        if other.chip_irq_line.is_some() {
            self.chip_irq_line = other.chip_irq_line;
        }
        if other.poll_timeout_us.is_some() {
            self.poll_timeout_us = other.poll_timeout_us;
        }
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("AIE_LAYOUT_PATH") {
            log::info!("Using AIE_LAYOUT_PATH from environment: {}", path);
            self.layout_path = Some(path);
        }
        if let Some(line) = lookup("AIE_CHIP_IRQ") {
            match line.parse() {
                Ok(line) => self.chip_irq_line = Some(line),
                Err(e) => log::warn!("Ignoring AIE_CHIP_IRQ={}: {}", line, e),
            }
        }
        if let Some(timeout) = lookup("AIE_POLL_TIMEOUT_US") {
            match timeout.parse() {
                Ok(timeout) => self.poll_timeout_us = Some(timeout),
                Err(e) => log::warn!("Ignoring AIE_POLL_TIMEOUT_US={}: {}", timeout, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("aie-events").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# aie-events configuration
# Place this file at ~/.config/aie-events/config.toml or ./aie-events.toml

# Register layout table (optional, defaults to the built-in AIE1 table)
# layout_path = "/etc/aie/layout.toml"

# Chip interrupt line driven by the 2nd-level controllers
chip_irq_line = 1

# Poll budget in microseconds per attempt while draining pending events
poll_timeout_us = 1000
"#
        .to_string()
    }
}

/// Read and validate a TOML register layout table.
pub fn load_layout_file(path: &Path) -> anyhow::Result<RegisterLayout> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading layout {}", path.display()))?;
    let layout = RegisterLayout::from_toml_str(&text).with_context(|| format!("parsing layout {}", path.display()))?;
    log::info!("Loaded register layout from {}", path.display());
    Ok(layout)
}
