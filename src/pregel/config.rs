//! Pregel engine configuration
//!
//! Configuration for partitioning, per-worker parallelism, job timeouts and
//! the activation policy.

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::PregelError;

/// Pregel engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregelConfig {
    /// Number of partition workers (vertex chunks)
    pub workers: usize,

    /// Maximum concurrent vertex evaluations per worker
    pub parallelism: usize,

    /// Timeout for an entire job
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,

    /// Whether a write or message that leaves the value unchanged still
    /// activates the vertex. Off by default: with it on, any cycle keeps
    /// exchanging messages until `maxGSS`.
    pub reactivate_on_no_change: bool,

    /// Emit per-barrier debug events
    pub tracing_enabled: bool,
}

impl Default for PregelConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            parallelism: num_cpus::get(),
            job_timeout: Duration::from_secs(3600), // 1 hour total
            reactivate_on_no_change: false,
            tracing_enabled: true,
        }
    }
}

impl PregelConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `PREGEL_*` environment variables
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `PREGEL_WORKERS` | `workers` |
    /// | `PREGEL_PARALLELISM` | `parallelism` |
    /// | `PREGEL_JOB_TIMEOUT` | `job_timeout` (e.g. `90s`, `15m`) |
    /// | `PREGEL_REACTIVATE_ON_NO_CHANGE` | `reactivate_on_no_change` |
    /// | `PREGEL_TRACING` | `tracing_enabled` |
    pub fn from_env() -> Result<Self, PregelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PregelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("PREGEL_WORKERS") {
            config = config.with_workers(parse_count("PREGEL_WORKERS", &raw)?);
        }
        if let Some(raw) = lookup("PREGEL_PARALLELISM") {
            config = config.with_parallelism(parse_count("PREGEL_PARALLELISM", &raw)?);
        }
        if let Some(raw) = lookup("PREGEL_JOB_TIMEOUT") {
            let timeout = humantime::parse_duration(raw.trim()).map_err(|e| {
                PregelError::config_error(format!("PREGEL_JOB_TIMEOUT: {}", e))
            })?;
            config = config.with_job_timeout(timeout);
        }
        if let Some(raw) = lookup("PREGEL_REACTIVATE_ON_NO_CHANGE") {
            config = config.with_reactivate_on_no_change(parse_flag(
                "PREGEL_REACTIVATE_ON_NO_CHANGE",
                &raw,
            )?);
        }
        if let Some(raw) = lookup("PREGEL_TRACING") {
            config = config.with_tracing(parse_flag("PREGEL_TRACING", &raw)?);
        }

        Ok(config)
    }

    /// Set the number of partition workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set parallelism level
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set job timeout
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the activation policy for unchanged writes
    pub fn with_reactivate_on_no_change(mut self, enabled: bool) -> Self {
        self.reactivate_on_no_change = enabled;
        self
    }

    /// Enable or disable tracing
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }
}

fn parse_count(key: &str, raw: &str) -> Result<usize, PregelError> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| PregelError::config_error(format!("{}: {}", key, e)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, PregelError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PregelError::config_error(format!(
            "{}: expected a boolean, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PregelConfig::default();
        assert!(config.workers > 0);
        assert!(config.parallelism > 0);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert!(!config.reactivate_on_no_change);
        assert!(config.tracing_enabled);
    }

    #[test]
    fn test_config_builder() {
        let config = PregelConfig::default()
            .with_workers(3)
            .with_parallelism(4)
            .with_reactivate_on_no_change(true);

        assert_eq!(config.workers, 3);
        assert_eq!(config.parallelism, 4);
        assert!(config.reactivate_on_no_change);
    }

    #[test]
    fn test_minimums() {
        let config = PregelConfig::default().with_workers(0).with_parallelism(0);
        assert_eq!(config.workers, 1);
        assert_eq!(config.parallelism, 1);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = PregelConfig::from_lookup(lookup_from(&[
            ("PREGEL_WORKERS", "2"),
            ("PREGEL_PARALLELISM", " 8 "),
            ("PREGEL_JOB_TIMEOUT", "90s"),
            ("PREGEL_REACTIVATE_ON_NO_CHANGE", "off"),
            ("PREGEL_TRACING", "false"),
        ]))
        .unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.parallelism, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(90));
        assert!(!config.reactivate_on_no_change);
        assert!(!config.tracing_enabled);
    }

    #[test]
    fn test_from_lookup_empty_keeps_defaults() {
        let config = PregelConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = PregelConfig::from_lookup(lookup_from(&[("PREGEL_WORKERS", "many")]))
            .unwrap_err();
        assert!(matches!(err, PregelError::ConfigError(_)));

        let err = PregelConfig::from_lookup(lookup_from(&[("PREGEL_TRACING", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("PREGEL_TRACING"));
    }

    #[test]
    fn test_config_serde_uses_humantime() {
        let config = PregelConfig::default().with_job_timeout(Duration::from_secs(120));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["job_timeout"], "2m");

        let parsed: PregelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.job_timeout, Duration::from_secs(120));
    }
}
