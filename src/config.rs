//! Runtime configuration loading from environment variables.
//!
//! Values come from `CUTOUT_*` environment variables. Missing or invalid
//! values fall back to defaults without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `CUTOUT_MAX_ATTEMPTS` | 2 | Dispatch attempts per job (first try included) |
//! | `CUTOUT_RETRY_BACKOFF_MS` | 500 | Pause after a device reset before retrying |
//! | `CUTOUT_CHUNK_SIZE` | 108 | Images per chunk in chunked runs |
//! | `CUTOUT_CHUNK_COOLDOWN_MS` | 2000 | Pause between chunks |
//! | `CUTOUT_CHUNK_FAILURE_THRESHOLD` | 0.5 | Chunk failure ratio that triggers a reset of all devices |
//! | `CUTOUT_CHUNK_RESET_DELAY_MS` | 1000 | Pause after that reset |
//! | `CUTOUT_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `CUTOUT_DEFAULT_BATCH_SIZE` | 20 | Batch size announced to streaming clients |
//! | `CUTOUT_MAX_QUEUE_DEPTH` | 1000 | Job queue depth at which health degrades |
//! | `CUTOUT_LOG_FORMAT` | json | `json` or `pretty` |
//! | `CUTOUT_LOG_LEVEL` | info | Log filter directive |

use std::time::Duration;

use serde::Serialize;

use crate::health::HealthConfig;
use crate::scheduler::{ChunkPolicy, RetryPolicy, SchedulerConfig};
use crate::telemetry::{LogConfig, LogFormat};

/// All runtime configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub scheduler: SchedulerConfig,
    pub default_batch_size: usize,
    pub health: HealthConfig,
    pub log: LogConfig,
}

/// Flat summary of effective values, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub chunk_size: usize,
    pub chunk_cooldown_ms: u64,
    pub chunk_failure_threshold: f64,
    pub chunk_reset_delay_ms: u64,
    pub shutdown_timeout_secs: u64,
    pub default_batch_size: usize,
    pub max_queue_depth: usize,
    pub log_format: String,
    pub log_level: String,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn load_retry_policy() -> RetryPolicy {
    let max_attempts = parse_env("CUTOUT_MAX_ATTEMPTS", 2u32).clamp(1, 10);
    let backoff_ms = parse_env("CUTOUT_RETRY_BACKOFF_MS", 500u64);
    RetryPolicy { max_attempts, backoff: Duration::from_millis(backoff_ms) }
}

fn load_chunk_policy() -> ChunkPolicy {
    let chunk_size = parse_env("CUTOUT_CHUNK_SIZE", 108usize).max(1);
    let cooldown_ms = parse_env("CUTOUT_CHUNK_COOLDOWN_MS", 2000u64);
    let threshold = parse_env("CUTOUT_CHUNK_FAILURE_THRESHOLD", 0.5f64);
    let threshold = if (0.0..=1.0).contains(&threshold) { threshold } else { 0.5 };
    let reset_delay_ms = parse_env("CUTOUT_CHUNK_RESET_DELAY_MS", 1000u64);
    ChunkPolicy {
        chunk_size,
        cooldown: Duration::from_millis(cooldown_ms),
        failure_threshold: threshold,
        reset_delay: Duration::from_millis(reset_delay_ms),
    }
}

fn load_log_config() -> LogConfig {
    let format = std::env::var("CUTOUT_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("CUTOUT_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig { format, level, output_path: None }
}

/// Load all configuration from environment variables.
pub fn load() -> EnvConfig {
    let shutdown_secs = parse_env("CUTOUT_SHUTDOWN_TIMEOUT", 30u64).max(1);
    let default_batch_size = parse_env("CUTOUT_DEFAULT_BATCH_SIZE", 20usize).max(1);
    let max_queue_depth = parse_env("CUTOUT_MAX_QUEUE_DEPTH", 1000usize).max(1);

    EnvConfig {
        scheduler: SchedulerConfig {
            retry: load_retry_policy(),
            chunk: load_chunk_policy(),
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        },
        default_batch_size,
        health: HealthConfig { max_queue_depth },
        log: load_log_config(),
    }
}

impl EnvConfig {
    pub fn effective_config(&self) -> EffectiveConfig {
        let s = &self.scheduler;
        EffectiveConfig {
            max_attempts: s.retry.max_attempts,
            retry_backoff_ms: s.retry.backoff.as_millis() as u64,
            chunk_size: s.chunk.chunk_size,
            chunk_cooldown_ms: s.chunk.cooldown.as_millis() as u64,
            chunk_failure_threshold: s.chunk.failure_threshold,
            chunk_reset_delay_ms: s.chunk.reset_delay.as_millis() as u64,
            shutdown_timeout_secs: s.shutdown_timeout.as_secs(),
            default_batch_size: self.default_batch_size,
            max_queue_depth: self.health.max_queue_depth,
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
            log_level: self.log.level.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env-mutating tests across the crate serialize on this lock.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) const ENV_KEYS: &[&str] = &[
        "CUTOUT_MAX_ATTEMPTS",
        "CUTOUT_RETRY_BACKOFF_MS",
        "CUTOUT_CHUNK_SIZE",
        "CUTOUT_CHUNK_COOLDOWN_MS",
        "CUTOUT_CHUNK_FAILURE_THRESHOLD",
        "CUTOUT_CHUNK_RESET_DELAY_MS",
        "CUTOUT_SHUTDOWN_TIMEOUT",
        "CUTOUT_DEFAULT_BATCH_SIZE",
        "CUTOUT_MAX_QUEUE_DEPTH",
        "CUTOUT_LOG_FORMAT",
        "CUTOUT_LOG_LEVEL",
    ];

    pub(crate) fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.scheduler.retry, RetryPolicy::default());
        assert_eq!(cfg.scheduler.chunk, ChunkPolicy::default());
        assert_eq!(cfg.scheduler.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(cfg.default_batch_size, 20);
        assert_eq!(cfg.health.max_queue_depth, 1000);
        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn test_overrides() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("CUTOUT_MAX_ATTEMPTS", "3");
        std::env::set_var("CUTOUT_CHUNK_SIZE", "24");
        std::env::set_var("CUTOUT_CHUNK_FAILURE_THRESHOLD", "0.25");
        std::env::set_var("CUTOUT_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.scheduler.retry.max_attempts, 3);
        assert_eq!(cfg.scheduler.chunk.chunk_size, 24);
        assert_eq!(cfg.scheduler.chunk.failure_threshold, 0.25);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("CUTOUT_MAX_ATTEMPTS", "lots");
        std::env::set_var("CUTOUT_CHUNK_SIZE", "0");
        std::env::set_var("CUTOUT_CHUNK_FAILURE_THRESHOLD", "7");
        std::env::set_var("CUTOUT_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.scheduler.retry.max_attempts, 2);
        assert_eq!(cfg.scheduler.chunk.chunk_size, 1);
        assert_eq!(cfg.scheduler.chunk.failure_threshold, 0.5);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_effective_config_reflects_load() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        let eff = load().effective_config();
        assert_eq!(eff.retry_backoff_ms, 500);
        assert_eq!(eff.chunk_cooldown_ms, 2000);
        assert_eq!(eff.log_format, "json");
    }

    #[tokio::test]
    async fn test_runtime_from_env_chunks_by_configured_size() {
        let config = {
            let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            clear_env_vars();
            std::env::set_var("CUTOUT_MAX_ATTEMPTS", "4");
            std::env::set_var("CUTOUT_CHUNK_SIZE", "2");
            std::env::set_var("CUTOUT_CHUNK_COOLDOWN_MS", "1");
            std::env::set_var("CUTOUT_DEFAULT_BATCH_SIZE", "8");
            let config = crate::RuntimeConfig::from_env();
            clear_env_vars();
            config
        };
        assert_eq!(config.scheduler.retry.max_attempts, 4);
        assert_eq!(config.default_batch_size, 8);

        let runtime = crate::Runtime::start(
            config,
            std::sync::Arc::new(crate::device::MockDeviceBackend::new(1)),
            std::sync::Arc::new(crate::engine::mock::MockEngine::new()),
        );
        let items = (0..5)
            .map(|i| {
                crate::scheduler::JobSpec::new(crate::engine::ImageInput::new(format!("env{}.png", i), vec![1]))
            })
            .collect();
        let report = runtime.scheduler.run_chunked(items).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.succeeded, 5);
    }
}
