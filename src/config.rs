//! Runtime configuration assembled from CLI flags.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Full service configuration. Built from CLI flags in `main`; tests build
/// it directly.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub database_path: PathBuf,
    pub index_path: PathBuf,
    /// Delete both persistence artifacts before startup.
    pub create_new_db: bool,
    pub log_level: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            model_path: PathBuf::from("model.onnx"),
            tokenizer_path: PathBuf::from("tokenizer.json"),
            database_path: PathBuf::from("database.db"),
            index_path: PathBuf::from("vectors.index"),
            create_new_db: false,
            log_level: LogLevel::Info,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Process-wide log verbosity. Set once at startup from `--level` and never
/// mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Warning,
    Info,
    Verbose,
}

impl LogLevel {
    /// Map the numeric `--level` flag (1..=3) to a verbosity.
    pub fn from_cli(level: u8) -> Result<Self> {
        match level {
            1 => Ok(LogLevel::Warning),
            2 => Ok(LogLevel::Info),
            3 => Ok(LogLevel::Verbose),
            other => Err(Error::Config(format!(
                "invalid log level {other}: expected 1 (warning), 2 (info), or 3 (verbose)"
            ))),
        }
    }

    /// Directive string for `tracing_subscriber`'s env filter.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "trace",
        }
    }
}
