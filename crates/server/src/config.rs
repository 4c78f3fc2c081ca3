//! Application configuration loaded from environment variables.

use std::str::FromStr;

use projections::{DEFAULT_EVENTS_BULK_SIZE, Role};
use thiserror::Error;

/// A configuration variable held a value that could not be interpreted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Log output style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err("expected 'text' or 'json'"),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: when set, events and documents live in Postgres
/// - `NODE_NAME`: recorded on projection instances this node creates
/// - `PROJECTION_ROLE`: `master` or `rebuilder` (default: `master`)
/// - `PROJECTION_BULK_SIZE`: events between partial commits (default: `100`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub node_name: Option<String>,
    pub projection_role: Role,
    pub projection_bulk_size: usize,
}

fn parse_role(s: &str) -> Result<Role, &'static str> {
    match s.to_ascii_lowercase().as_str() {
        "master" => Ok(Role::Master),
        "rebuilder" => Ok(Role::Rebuilder),
        _ => Err("expected 'master' or 'rebuilder'"),
    }
}

fn parse_bulk_size(s: &str) -> Result<usize, &'static str> {
    match s.parse::<usize>() {
        Ok(0) | Err(_) => Err("expected a positive integer"),
        Ok(n) => Ok(n),
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parsed<T>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
            parse: impl Fn(&str) -> Result<T, &'static str>,
        ) -> Result<Option<T>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => parse(&value)
                    .map(Some)
                    .map_err(|reason| ConfigError::Invalid { var, value, reason }),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parsed(&lookup, "PORT", |p| {
                p.parse().map_err(|_| "expected a port number")
            })?
            .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT", str::parse::<LogFormat>)?.unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            node_name: lookup("NODE_NAME").filter(|name| !name.is_empty()),
            projection_role: parsed(&lookup, "PROJECTION_ROLE", parse_role)?.unwrap_or_default(),
            projection_bulk_size: parsed(&lookup, "PROJECTION_BULK_SIZE", parse_bulk_size)?
                .unwrap_or(defaults.projection_bulk_size),
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            node_name: None,
            projection_role: Role::Master,
            projection_bulk_size: DEFAULT_EVENTS_BULK_SIZE,
        }
    }
}
