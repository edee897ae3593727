//! Process settings read from the environment.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub host: String,
    pub port: u16,
    /// Mount point of the resource API, e.g. `/api/admin`.
    pub api_prefix: String,
    /// JSON entity definitions; built-in resources are always added.
    pub catalog_path: Option<PathBuf>,
    pub rule_cache_ttl: Duration,
    pub rule_cache_capacity: usize,
    /// Above this estimated row count, unfiltered lists report the estimate.
    pub approx_count_threshold: u64,
    pub body_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/resource_gate".into(),
            max_connections: 32,
            host: "0.0.0.0".into(),
            port: 8001,
            api_prefix: "/api/admin".into(),
            catalog_path: None,
            rule_cache_ttl: Duration::from_millis(10_000),
            rule_cache_capacity: 128,
            approx_count_threshold: 100_000,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

impl Settings {
    /// `.env` (when present) then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(ConfigError::Load(format!(".env: {}", e)));
            }
        }
        Self::from_env()
    }

    /// Read settings; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Settings::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or(d.database_url),
            max_connections: parsed(&var, "DATABASE_MAX_CONNECTIONS", d.max_connections)?,
            host: var("HOST").unwrap_or(d.host),
            port: parsed(&var, "PORT", d.port)?,
            api_prefix: var("API_PREFIX").map(|p| normalize_prefix(&p)).unwrap_or(d.api_prefix),
            catalog_path: var("CATALOG_PATH").map(PathBuf::from),
            rule_cache_ttl: Duration::from_millis(parsed(&var, "RULE_CACHE_TTL_MS", 10_000u64)?),
            rule_cache_capacity: parsed(&var, "RULE_CACHE_CAPACITY", d.rule_cache_capacity)?,
            approx_count_threshold: parsed(&var, "APPROX_COUNT_THRESHOLD", d.approx_count_threshold)?,
            body_limit_bytes: parsed(&var, "BODY_LIMIT_BYTES", d.body_limit_bytes)?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Load(format!("{}={:?}: {}", name, raw, e))),
    }
}

/// Leading slash, no trailing slash.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{}", trimmed)
}
