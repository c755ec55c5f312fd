use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::cache::MemcachedOptions;
use crate::core::error::CacheError;
use crate::core::strategy::DedupeStrategy;

/// Server used when none is configured.
pub const DEFAULT_SERVER: &str = "127.0.0.1:11211";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("duplicate detection needs at least one cache server")]
    NoServers,
    #[error("dedupe cache unavailable: {0}")]
    Unavailable(#[from] CacheError),
}

/// Runtime configuration for a [`DuplicateDetector`](crate::DuplicateDetector).
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub dedupe_strategy: DedupeStrategy,
    /// Fallback TTL in seconds for queues without a visibility window.
    pub timeout: u32,
    /// memcached servers; defaults to the local instance.
    pub servers: Vec<String>,
    pub memcached: MemcachedOptions,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            dedupe_strategy: DedupeStrategy::Relaxed,
            timeout: 0,
            servers: vec![DEFAULT_SERVER.to_string()],
            memcached: MemcachedOptions::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileConfig {
    pub dedupe_strategy: Option<String>,
    pub timeout: Option<u32>,
    pub servers: Option<Vec<String>>,
    pub memcached: Option<FileMemcached>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct FileMemcached {
    pub pool_size: Option<u32>,
    pub down_retry_delay_secs: Option<u64>,
}

impl DetectorConfig {
    fn load_file<P: AsRef<Path>>(path: P) -> Result<FileConfig, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let cfg: FileConfig = toml::from_str(&raw)?;
        Ok(cfg)
    }

    /// Load configuration from an optional TOML file and the environment.
    ///
    /// Precedence: file values provide defaults, environment variables override.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let env_path = env::var("DUPGUARD_CONFIG").ok();
        let effective_path = path.map(|s| s.to_string()).or(env_path);

        let file_cfg = if let Some(p) = effective_path {
            Self::load_file(p)?
        } else {
            FileConfig::default()
        };

        let mut cfg = Self::from_file(file_cfg)?;

        // Env overrides.
        if let Ok(v) = env::var("DUPGUARD_DEDUPE_STRATEGY") {
            cfg.dedupe_strategy = v.parse()?;
        }

        if let Ok(v) = env::var("DUPGUARD_TIMEOUT") {
            cfg.timeout = v
                .trim()
                .parse()
                .map_err(|e| ConfigError::Parse(format!("DUPGUARD_TIMEOUT: {e}")))?;
        }

        if let Ok(v) = env::var("DUPGUARD_SERVERS") {
            cfg.servers = split_servers(&v);
        }

        Ok(cfg)
    }

    fn from_file(file_cfg: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let dedupe_strategy = match file_cfg.dedupe_strategy {
            Some(s) => s.parse()?,
            None => defaults.dedupe_strategy,
        };

        let mut memcached = defaults.memcached;
        if let Some(m) = file_cfg.memcached {
            if let Some(size) = m.pool_size {
                if size == 0 {
                    return Err(ConfigError::Parse("memcached.pool_size must be > 0".into()));
                }
                memcached.pool_size = size;
            }
            if let Some(secs) = m.down_retry_delay_secs {
                memcached.down_retry_delay = Duration::from_secs(secs);
            }
        }

        Ok(Self {
            dedupe_strategy,
            timeout: file_cfg.timeout.unwrap_or(defaults.timeout),
            servers: file_cfg.servers.unwrap_or(defaults.servers),
            memcached,
        })
    }
}

fn split_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_relaxed_with_zero_timeout() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.dedupe_strategy, DedupeStrategy::Relaxed);
        assert_eq!(cfg.timeout, 0);
        assert_eq!(cfg.servers, vec![DEFAULT_SERVER]);
        assert_eq!(cfg.memcached.socket_max_failures, 5);
        assert_eq!(cfg.memcached.socket_timeout, Duration::from_secs(2));
        assert!(cfg.memcached.tcp_nodelay);
    }

    #[test]
    fn file_values_are_applied() {
        let file: FileConfig = toml::from_str(
            r#"
            dedupe_strategy = "STRICT"
            timeout = 45
            servers = ["a:11211", "b:11211"]

            [memcached]
            pool_size = 8
            down_retry_delay_secs = 5
            "#,
        )
        .unwrap();

        let cfg = DetectorConfig::from_file(file).unwrap();
        assert_eq!(cfg.dedupe_strategy, DedupeStrategy::Strict);
        assert_eq!(cfg.timeout, 45);
        assert_eq!(cfg.servers, vec!["a:11211", "b:11211"]);
        assert_eq!(cfg.memcached.pool_size, 8);
        assert_eq!(cfg.memcached.down_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let file: FileConfig = toml::from_str(r#"dedupe_strategy = "sometimes""#).unwrap();
        assert!(matches!(
            DetectorConfig::from_file(file),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn server_list_is_split_and_trimmed() {
        assert_eq!(split_servers(" a:1 , ,b:2"), vec!["a:1", "b:2"]);
    }
}
