//! Server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use vscale_media::EncoderSettings;
use vscale_models::WidthSet;

/// Default time in-flight requests get to finish after a shutdown signal.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid environment override {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration, loaded from a JSON file with PascalCase keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Root of the source videos
    pub input_dir: PathBuf,
    /// Root of the transcode cache
    pub output_dir: PathBuf,
    /// Allowed target widths
    pub widths: Vec<u32>,
    /// Encoder program and codec parameters
    #[serde(default)]
    pub encoder: EncoderSettings,
    /// Grace period for in-flight requests on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Optional per-request deadline for live transcodes
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Optional cap on concurrently running encoders
    #[serde(default)]
    pub max_encoders: Option<usize>,
    /// CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl ServerConfig {
    /// Config with defaults for everything but the required fields.
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        widths: impl IntoIterator<Item = u32>,
    ) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            widths: widths.into_iter().collect(),
            encoder: EncoderSettings::default(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            request_timeout_secs: None,
            max_encoders: None,
            cors_origins: default_cors_origins(),
        }
    }

    /// Read and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Apply `VSCALE_HOST` / `VSCALE_PORT` overrides.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(host) = std::env::var("VSCALE_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("VSCALE_PORT") {
            self.port = port.trim().parse().map_err(|_| ConfigError::Env {
                name: "VSCALE_PORT",
                value: port.clone(),
            })?;
        }
        Ok(self)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("Port must be non-zero".to_string()));
        }
        if self.widths.is_empty() {
            return Err(ConfigError::Invalid("Widths must not be empty".to_string()));
        }
        if self.widths.contains(&0) {
            return Err(ConfigError::Invalid("Widths must be positive".to_string()));
        }
        if self.max_encoders == Some(0) {
            return Err(ConfigError::Invalid("MaxEncoders must be positive".to_string()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("OutputDir must be set".to_string()));
        }

        match std::fs::metadata(&self.input_dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ConfigError::Invalid(format!(
                "InputDir {} is not a directory",
                self.input_dir.display()
            ))),
            Err(e) => Err(ConfigError::Invalid(format!(
                "InputDir {}: {}",
                self.input_dir.display(),
                e
            ))),
        }
    }

    pub fn width_set(&self) -> WidthSet {
        WidthSet::new(self.widths.iter().copied())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Check if running in production mode.
    pub fn is_production() -> bool {
        std::env::var("ENVIRONMENT")
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false)
    }
}
