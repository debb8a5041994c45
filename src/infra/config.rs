// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub api: ApiConfig,
}

/// `[sessions]`: lifetimes and job guard policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Sliding idle timeout, refreshed on every successful access.
    pub idle_ttl_secs: u64,
    /// Hard lifetime cap measured from creation.
    pub absolute_ttl_secs: u64,
    pub reap_interval_secs: u64,
    /// How long a terminal session keeps answering with its reason.
    pub tombstone_ttl_secs: u64,
    pub acquire_timeout_ms: u64,
    pub retry_budget: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3600,
            absolute_ttl_secs: 4 * 3600,
            reap_interval_secs: 300,
            tombstone_ttl_secs: 3600,
            acquire_timeout_ms: 5_000,
            retry_budget: 3,
        }
    }
}

impl SessionsConfig {
    pub fn policy(&self) -> SessionPolicy {
        SessionPolicy {
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            absolute_ttl: Duration::from_secs(self.absolute_ttl_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
            tombstone_ttl: Duration::from_secs(self.tombstone_ttl_secs),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            retry_budget: self.retry_budget.max(1),
        }
    }
}

/// Runtime view of `[sessions]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub idle_ttl: Duration,
    pub absolute_ttl: Duration,
    pub reap_interval: Duration,
    pub tombstone_ttl: Duration,
    pub acquire_timeout: Duration,
    pub retry_budget: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        SessionsConfig::default().policy()
    }
}

/// `[sweep]`: worker pool and clustering parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Size of the process-wide worker pool; also the per-sweep fan-out cap.
    pub max_workers: usize,
    /// Longest image side before clustering, in pixels.
    pub max_dimension: u32,
    /// Largest sweep bound accepted; values above 100 are capped.
    pub max_k: usize,
    pub jpeg_quality: u8,
    pub max_iterations: usize,
    pub seed: u64,
    /// Pixels sampled to fit centroids; every pixel is still assigned.
    pub sample_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_dimension: 800,
            max_k: 100,
            jpeg_quality: 85,
            max_iterations: 300,
            seed: 42,
            sample_limit: 10_000,
        }
    }
}

/// `[api]`: HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
            cors_origins: Vec::new(),
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        match paths::config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.sessions.idle_ttl_secs, 3600);
        assert!(c.sessions.absolute_ttl_secs > c.sessions.idle_ttl_secs);
        assert_eq!(c.sessions.retry_budget, 3);
        assert_eq!(c.sweep.max_workers, 4);
        assert_eq!(c.sweep.max_dimension, 800);
        assert_eq!(c.sweep.max_k, 100);
        assert_eq!(c.api.port, 8000);
        assert!(c.api.cors_origins.is_empty());
    }

    #[test]
    fn test_policy_conversion() {
        let p = SessionsConfig::default().policy();
        assert_eq!(p.idle_ttl, Duration::from_secs(3600));
        assert_eq!(p.acquire_timeout, Duration::from_millis(5_000));
        assert_eq!(p.retry_budget, 3);
    }

    #[test]
    fn test_policy_clamps_degenerate_values() {
        let cfg = SessionsConfig {
            reap_interval_secs: 0,
            retry_budget: 0,
            ..SessionsConfig::default()
        };
        let p = cfg.policy();
        assert_eq!(p.reap_interval, Duration::from_secs(1));
        assert_eq!(p.retry_budget, 1);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.sessions.retry_budget, 3);
        assert_eq!(config.sweep.jpeg_quality, 85);
    }

    #[test]
    fn test_partial_tables_keep_field_defaults() {
        let toml_str = r#"
[sessions]
idle_ttl_secs = 60

[sweep]
max_workers = 2

[api]
port = 9000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sessions.idle_ttl_secs, 60);
        assert_eq!(config.sessions.retry_budget, 3);
        assert_eq!(config.sessions.acquire_timeout_ms, 5_000);
        assert_eq!(config.sweep.max_workers, 2);
        assert_eq!(config.sweep.max_k, 100);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[sessions]
idle_ttl_secs = 60
absolute_ttl_secs = 600
reap_interval_secs = 10
tombstone_ttl_secs = 120
acquire_timeout_ms = 250
retry_budget = 5

[sweep]
max_workers = 8
max_dimension = 400
max_k = 50
jpeg_quality = 70
max_iterations = 100
seed = 7
sample_limit = 2000

[api]
host = "0.0.0.0"
port = 9000
cors_origins = ["http://localhost:3000"]
max_upload_bytes = 1024
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.sessions.idle_ttl_secs, 60);
        assert_eq!(config.sessions.retry_budget, 5);
        assert_eq!(config.sweep.max_workers, 8);
        assert_eq!(config.sweep.seed, 7);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.api.cors_origins.len(), 1);
        assert_eq!(
            config.sessions.policy().acquire_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.sweep.max_k, config.sweep.max_k);
        assert_eq!(deserialized.api.port, config.api.port);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nhost = \"127.0.0.1\"\nport = 8123\nmax_upload_bytes = 10").unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.api.port, 8123);
        assert_eq!(config.sessions.retry_budget, 3);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
