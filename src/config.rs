//! Configuration loading and management.
//!
//! Loads Straylight configuration from `./straylight.toml` (or
//! `$STRAYLIGHT_CONFIG_PATH`). Environment variables override file values;
//! file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level Straylight configuration loaded from TOML.
///
/// Path: `./straylight.toml` or `$STRAYLIGHT_CONFIG_PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StraylightConfig {
    /// Logging settings (`[logging]`).
    pub logging: LoggingConfig,
    /// Default transport settings (`[transport]`).
    pub transport: TransportConfig,
    /// Request store settings (`[store]`).
    pub store: StoreConfig,
}

impl StraylightConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error when the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse from a TOML string, no file or env involvement.
    ///
    /// # Errors
    ///
    /// Returns an error when the TOML does not parse.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(StraylightConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        if let Some(path) = env("STRAYLIGHT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        PathBuf::from("straylight.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("STRAYLIGHT_LOGS_DIR") {
            self.logging.dir = v;
        }
        if let Some(v) = env("STRAYLIGHT_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.transport.timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("STRAYLIGHT_MAX_BODY_BYTES") {
            match v.parse() {
                Ok(n) => self.store.max_body_bytes = Some(n),
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_MAX_BODY_BYTES",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON log files.
    pub dir: String,
    /// Whether the logging preset logs headers and body metadata.
    pub detailed: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
            detailed: false,
        }
    }
}

/// `[transport]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout for the default HTTP transport.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Body size cap for the persistence preset; `None` keeps bodies whole.
    pub max_body_bytes: Option<usize>,
    /// Whether the persistence preset saves bodies at all.
    pub save_bodies: Option<bool>,
}

fn default_logs_dir() -> String {
    "logs".to_owned()
}

fn default_timeout_secs() -> u64 {
    30
}

// ── Tests ───────────────────────────────────────────────────────
