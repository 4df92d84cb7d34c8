// Copyright 2024-2026 Cutout Runtime Contributors
// Licensed under the Apache License, Version 2.0

//! Config subcommands: show, defaults, validate.

use crate::config::{self, EffectiveConfig};

pub fn run_show() {
    print_config(&config::load().effective_config());
}

/// Print documented defaults, ignoring the environment.
pub fn run_defaults() {
    println!("CUTOUT_MAX_ATTEMPTS=2");
    println!("CUTOUT_RETRY_BACKOFF_MS=500");
    println!("CUTOUT_CHUNK_SIZE=108");
    println!("CUTOUT_CHUNK_COOLDOWN_MS=2000");
    println!("CUTOUT_CHUNK_FAILURE_THRESHOLD=0.5");
    println!("CUTOUT_CHUNK_RESET_DELAY_MS=1000");
    println!("CUTOUT_SHUTDOWN_TIMEOUT=30");
    println!("CUTOUT_DEFAULT_BATCH_SIZE=20");
    println!("CUTOUT_MAX_QUEUE_DEPTH=1000");
    println!("CUTOUT_LOG_FORMAT=json");
    println!("CUTOUT_LOG_LEVEL=info");
}

/// Returns 0 if valid, 1 if any warnings were printed.
pub fn run_validate() -> i32 {
    let warnings = validate(&config::load().effective_config());
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validate(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg.max_attempts == 1 {
        warnings.push("CUTOUT_MAX_ATTEMPTS is 1; transient device faults will not be retried".to_string());
    }
    if cfg.default_batch_size > cfg.chunk_size {
        warnings.push(format!(
            "CUTOUT_DEFAULT_BATCH_SIZE ({}) exceeds CUTOUT_CHUNK_SIZE ({})",
            cfg.default_batch_size, cfg.chunk_size
        ));
    }
    if cfg.chunk_failure_threshold == 0.0 {
        warnings.push("CUTOUT_CHUNK_FAILURE_THRESHOLD is 0; any failure resets every device".to_string());
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    println!("CUTOUT_MAX_ATTEMPTS={}", cfg.max_attempts);
    println!("CUTOUT_RETRY_BACKOFF_MS={}", cfg.retry_backoff_ms);
    println!("CUTOUT_CHUNK_SIZE={}", cfg.chunk_size);
    println!("CUTOUT_CHUNK_COOLDOWN_MS={}", cfg.chunk_cooldown_ms);
    println!("CUTOUT_CHUNK_FAILURE_THRESHOLD={}", cfg.chunk_failure_threshold);
    println!("CUTOUT_CHUNK_RESET_DELAY_MS={}", cfg.chunk_reset_delay_ms);
    println!("CUTOUT_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("CUTOUT_DEFAULT_BATCH_SIZE={}", cfg.default_batch_size);
    println!("CUTOUT_MAX_QUEUE_DEPTH={}", cfg.max_queue_depth);
    println!("CUTOUT_LOG_FORMAT={}", cfg.log_format);
    println!("CUTOUT_LOG_LEVEL={}", cfg.log_level);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env_vars, ENV_LOCK};

    #[test]
    fn test_validate_passes_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        assert_eq!(run_validate(), 0);
    }

    #[test]
    fn test_validate_flags_single_attempt() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("CUTOUT_MAX_ATTEMPTS", "1");
        let warnings = validate(&config::load().effective_config());
        clear_env_vars();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("CUTOUT_MAX_ATTEMPTS"));
    }

    #[test]
    fn test_validate_flags_oversized_batch() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();
        std::env::set_var("CUTOUT_DEFAULT_BATCH_SIZE", "200");
        let warnings = validate(&config::load().effective_config());
        clear_env_vars();
        assert!(warnings.iter().any(|w| w.contains("CUTOUT_DEFAULT_BATCH_SIZE")));
    }
}
