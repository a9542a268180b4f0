//! Configuration management for the courier pipeline.

use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{CircuitConfig, QueueConfig, RetryPolicy};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::store::RateLimitConfig;

const CONFIG_FILE: &str = "courier.toml";

/// One simulated delivery backend.
///
/// Backends are tried in the order they are listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name, shown in `Sent via <name>`.
    pub name: String,
    /// Probability in `[0, 1]` that a single send fails.
    pub failure_rate: f64,
    /// Simulated latency of each send in milliseconds.
    #[serde(default = "default_backend_latency_ms")]
    pub latency_ms: u64,
}

/// Complete pipeline configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// The backend list can only be set in the configuration file.
///
/// # Example
///
/// ```no_run
/// use courier_service::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Ticking every {}ms", config.processing_interval_ms);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Queue
    /// Time between processing ticks in milliseconds.
    ///
    /// Environment variable: `PROCESSING_INTERVAL_MS`
    #[serde(default = "default_processing_interval_ms", alias = "PROCESSING_INTERVAL_MS")]
    pub processing_interval_ms: u64,
    /// Maximum number of jobs in flight.
    ///
    /// Environment variable: `MAX_CONCURRENT`
    #[serde(default = "default_max_concurrent", alias = "MAX_CONCURRENT")]
    pub max_concurrent: usize,
    /// Queue-level readmissions per job.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[serde(default = "default_max_retries", alias = "MAX_RETRIES")]
    pub max_retries: u32,
    /// Delay before the first readmission in milliseconds.
    ///
    /// Environment variable: `RETRY_DELAY_MS`
    #[serde(default = "default_retry_delay_ms", alias = "RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    // Send retry
    /// Send attempts per backend per processing round.
    ///
    /// Environment variable: `SEND_ATTEMPTS`
    #[serde(default = "default_send_attempts", alias = "SEND_ATTEMPTS")]
    pub send_attempts: u32,
    /// Backoff after the first failed send in milliseconds.
    ///
    /// Environment variable: `SEND_BASE_DELAY_MS`
    #[serde(default = "default_send_base_delay_ms", alias = "SEND_BASE_DELAY_MS")]
    pub send_base_delay_ms: u64,

    // Circuit breaker
    /// Failures that open a backend's circuit.
    ///
    /// Environment variable: `CIRCUIT_FAILURE_THRESHOLD`
    #[serde(default = "default_circuit_failure_threshold", alias = "CIRCUIT_FAILURE_THRESHOLD")]
    pub circuit_failure_threshold: u32,
    /// How long an open circuit stays open after its latest failure, in
    /// milliseconds.
    ///
    /// Environment variable: `CIRCUIT_COOLDOWN_MS`
    #[serde(default = "default_circuit_cooldown_ms", alias = "CIRCUIT_COOLDOWN_MS")]
    pub circuit_cooldown_ms: u64,

    // Admission
    /// Sends allowed per recipient per minute.
    ///
    /// Environment variable: `RATE_LIMIT_PER_MINUTE`
    #[serde(default = "default_rate_limit_per_minute", alias = "RATE_LIMIT_PER_MINUTE")]
    pub rate_limit_per_minute: u32,

    // Backends
    /// Ordered backend list.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, `courier.toml`, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration with an explicit configuration file path.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to queue configuration.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            processing_interval: Duration::from_millis(self.processing_interval_ms),
            max_concurrent: self.max_concurrent,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    /// Convert to the per-backend send retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.send_attempts, Duration::from_millis(self.send_base_delay_ms))
    }

    /// Convert to circuit breaker configuration.
    pub fn to_circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            cooldown: Duration::from_millis(self.circuit_cooldown_ms),
        }
    }

    /// Convert to rate limit configuration.
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig { per_minute: self.rate_limit_per_minute }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.processing_interval_ms == 0 {
            anyhow::bail!("processing_interval_ms must be greater than 0");
        }

        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be greater than 0");
        }

        if self.send_attempts == 0 {
            anyhow::bail!("send_attempts must be greater than 0");
        }

        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be greater than 0");
        }

        if self.rate_limit_per_minute == 0 {
            anyhow::bail!("rate_limit_per_minute must be greater than 0");
        }

        if self.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured");
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                anyhow::bail!("backend names must not be empty");
            }
            if !names.insert(backend.name.as_str()) {
                anyhow::bail!("duplicate backend name: {}", backend.name);
            }
            if !(0.0..=1.0).contains(&backend.failure_rate) {
                anyhow::bail!(
                    "backend {} failure_rate must be between 0.0 and 1.0",
                    backend.name
                );
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing_interval_ms: default_processing_interval_ms(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            send_attempts: default_send_attempts(),
            send_base_delay_ms: default_send_base_delay_ms(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_ms: default_circuit_cooldown_ms(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            backends: default_backends(),
            rust_log: default_log_level(),
        }
    }
}

fn default_processing_interval_ms() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    courier_delivery::DEFAULT_MAX_CONCURRENT
}

fn default_max_retries() -> u32 {
    courier_delivery::DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_send_attempts() -> u32 {
    courier_delivery::DEFAULT_SEND_ATTEMPTS
}

fn default_send_base_delay_ms() -> u64 {
    100
}

fn default_circuit_failure_threshold() -> u32 {
    3
}

fn default_circuit_cooldown_ms() -> u64 {
    10000
}

fn default_rate_limit_per_minute() -> u32 {
    5
}

fn default_backend_latency_ms() -> u64 {
    50
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "primary".to_string(),
            failure_rate: 0.3,
            latency_ms: default_backend_latency_ms(),
        },
        BackendConfig {
            name: "secondary".to_string(),
            failure_rate: 0.1,
            latency_ms: default_backend_latency_ms(),
        },
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}
