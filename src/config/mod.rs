//! Configuration module for datapipe-rs
//!
//! An [`AppConfig`] describes one pipeline: where records come from, which
//! script converters rewrite them, where they go, the bounded scheduler
//! [`PipelineSettings`] and how logging is set up. It is stored as TOML.
//!
//! # Config Location
//!
//! Without an explicit path the config is read from the platform data
//! directory:
//! - **Linux**: `~/.local/share/dev.hxyulin.datapipe-rs/datapipe.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.datapipe-rs/datapipe.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.datapipe-rs\datapipe.toml`
//!
//! # Example
//!
//! ```toml
//! [pipeline]
//! max_behind_ms = 250
//!
//! [logging]
//! level = "debug"
//!
//! [[inputs]]
//! kind = "file"
//! path = "records.txt"
//! format = "ascii"
//!
//! [[converters]]
//! name = "split"
//! handles = "fields.len() > 1"
//! convert = "fields.map(|f| [f])"
//!
//! [[outputs]]
//! kind = "std"
//! format = "binary"
//! ```

pub mod settings;

pub use settings::*;

use crate::codec::WireFormat;
use crate::error::{PipeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for data directories
pub const APP_ID: &str = "dev.hxyulin.datapipe-rs";

/// Config filename inside the app data directory
pub const CONFIG_FILE: &str = "datapipe.toml";

// ==================== App Data Directory ====================

/// Get the application data directory path
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir()
        .ok_or_else(|| PipeError::Config("Could not determine app data directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipeError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Default config file path
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Logging ====================

/// Layout of formatted log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Pretty,
}

/// Logging setup for the `datapipe` binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            format: LogFormat::default(),
        }
    }
}

// ==================== Endpoints ====================

/// Where an input reads from or an output writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// stdin for inputs, stdout for outputs
    #[default]
    Std,
    File,
}

/// A record stream endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EndpointConfig {
    #[serde(default)]
    pub kind: EndpointKind,

    /// Required for `kind = "file"`
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub format: WireFormat,

    /// Append instead of truncating (file outputs)
    #[serde(default)]
    pub append: bool,
}

impl EndpointConfig {
    pub fn std(format: WireFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>, format: WireFormat) -> Self {
        Self {
            kind: EndpointKind::File,
            path: Some(path.into()),
            format,
            append: false,
        }
    }

    /// Display name used for the component built from this endpoint.
    pub fn label(&self) -> String {
        match (&self.kind, &self.path) {
            (EndpointKind::File, Some(path)) => format!("{} ({})", path.display(), self.format),
            _ => format!("std ({})", self.format),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind == EndpointKind::File && self.path.is_none() {
            return Err(PipeError::Config(
                "File endpoint requires a 'path'".to_string(),
            ));
        }
        Ok(())
    }
}

// ==================== Converters ====================

/// A converter defined by two Rhai scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConverterConfig {
    pub name: String,

    /// Expression deciding whether the converter claims a record
    #[serde(default = "default_handles")]
    pub handles: String,

    /// Script returning the replacement records
    pub convert: String,
}

fn default_handles() -> String {
    "true".to_string()
}

// ==================== App Config ====================

/// Complete description of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub inputs: Vec<EndpointConfig>,

    #[serde(default)]
    pub converters: Vec<ScriptConverterConfig>,

    #[serde(default)]
    pub outputs: Vec<EndpointConfig>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PipeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipeError::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from the default location, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, self.to_toml()?).map_err(|e| {
            PipeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Save to the default location
    pub fn save_default(&self) -> Result<PathBuf> {
        let path = ensure_app_data_dir()?.join(CONFIG_FILE);
        self.save(&path)?;
        Ok(path)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        for endpoint in self.inputs.iter().chain(&self.outputs) {
            endpoint.validate()?;
        }
        let std_inputs = self
            .inputs
            .iter()
            .filter(|e| e.kind == EndpointKind::Std)
            .count();
        if std_inputs > 1 {
            return Err(PipeError::Config(
                "stdin can back at most one input".to_string(),
            ));
        }
        if let Some(c) = self.converters.iter().find(|c| c.name.trim().is_empty()) {
            return Err(PipeError::Config(format!(
                "Converter with script '{}' has no name",
                c.convert
            )));
        }
        Ok(())
    }

    /// stdin in, stdout out, both ASCII
    pub fn passthrough() -> Self {
        Self {
            inputs: vec![EndpointConfig::std(WireFormat::Ascii)],
            outputs: vec![EndpointConfig::std(WireFormat::Ascii)],
            ..Self::default()
        }
    }
}
