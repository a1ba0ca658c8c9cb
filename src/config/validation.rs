use crate::config::types::{
    CacheSettings, CheckpointSettings, Config, JobOptions, PoolSettings, RenderSettings,
    RetrySettings,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if let Some(root) = &config.url {
        validate_root_url(root)?;
    }
    validate_job_options(&config.job)?;
    validate_render_settings(&config.render)?;
    validate_pool_settings(&config.pool)?;
    validate_retry_settings(&config.retry)?;
    validate_checkpoint_settings(&config.checkpoint)?;
    validate_cache_settings(&config.cache)?;
    Ok(())
}

/// Validates that a root URL is an absolute http(s) URL with a host
pub fn validate_root_url(root: &str) -> Result<(), ConfigError> {
    let url = Url::parse(root)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid root URL '{}': {}", root, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Root URL '{}' must use http or https",
            root
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Root URL '{}' has no host",
            root
        )));
    }

    Ok(())
}

fn validate_job_options(options: &JobOptions) -> Result<(), ConfigError> {
    if let Some(concurrency) = options.concurrency {
        if !(1..=100).contains(&concurrency) {
            return Err(ConfigError::Validation(format!(
                "concurrency must be between 1 and 100, got {}",
                concurrency
            )));
        }
    }

    if options.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 (use unlimited = true for no page budget)".to_string(),
        ));
    }

    Ok(())
}

fn validate_render_settings(settings: &RenderSettings) -> Result<(), ConfigError> {
    if settings.navigation_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "navigation-timeout-ms must be >= 100ms, got {}ms",
            settings.navigation_timeout_ms
        )));
    }

    if settings.wait_strategies.is_empty() {
        return Err(ConfigError::Validation(
            "wait-strategies must list at least one strategy".to_string(),
        ));
    }

    if let Some(proxy) = &settings.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    Ok(())
}

fn validate_pool_settings(settings: &PoolSettings) -> Result<(), ConfigError> {
    if settings.max_size < 1 {
        return Err(ConfigError::Validation(format!(
            "pool max-size must be >= 1, got {}",
            settings.max_size
        )));
    }

    if settings.min_size > settings.max_size {
        return Err(ConfigError::Validation(format!(
            "pool min-size ({}) cannot exceed max-size ({})",
            settings.min_size, settings.max_size
        )));
    }

    if settings.reap_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "pool reap-interval-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_settings(settings: &RetrySettings) -> Result<(), ConfigError> {
    if settings.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry multiplier must be >= 1.0, got {}",
            settings.multiplier
        )));
    }

    if !(0.0..=1.0).contains(&settings.jitter) {
        return Err(ConfigError::Validation(format!(
            "retry jitter must be between 0.0 and 1.0, got {}",
            settings.jitter
        )));
    }

    if settings.initial_delay_ms > settings.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry initial-delay-ms ({}) cannot exceed max-delay-ms ({})",
            settings.initial_delay_ms, settings.max_delay_ms
        )));
    }

    Ok(())
}

fn validate_checkpoint_settings(settings: &CheckpointSettings) -> Result<(), ConfigError> {
    if settings.save_every < 1 {
        return Err(ConfigError::Validation(
            "checkpoint save-every must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_cache_settings(settings: &CacheSettings) -> Result<(), ConfigError> {
    if settings.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "cache ttl-secs must be >= 1".to_string(),
        ));
    }
    Ok(())
}
