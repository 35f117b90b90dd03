use crate::config::types::{AssessmentConfig, AssessmentStrategy, Config, CrawlConfig, OutputConfig};
use crate::url::normalize_seed;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
///
/// Runs before any work begins; a failure here aborts the run.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawler)?;
    validate_output_config(&config.output)?;
    validate_assessment_config(&config.assessment)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    validate_seed(&config.seed_url)?;

    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1".to_string(),
        ));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request-timeout-ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    if config.max_redirects < 1 {
        return Err(ConfigError::Validation(
            "max-redirects must be >= 1".to_string(),
        ));
    }

    if config.max_resource_bytes < 1 {
        return Err(ConfigError::Validation(
            "max-resource-bytes must be >= 1".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the seed URL (http or https with a host)
fn validate_seed(seed: &str) -> Result<(), ConfigError> {
    if seed.trim().is_empty() {
        return Err(ConfigError::Validation(
            "seed-url is required (in [crawler] or on the command line)".to_string(),
        ));
    }

    normalize_seed(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.archive_root.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "archive-root cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates assessment configuration
fn validate_assessment_config(config: &AssessmentConfig) -> Result<(), ConfigError> {
    if config.strategy != AssessmentStrategy::Judgment {
        return Ok(());
    }

    let endpoint = config.judgment_endpoint.as_deref().ok_or_else(|| {
        ConfigError::Validation(
            "judgment-endpoint is required when strategy = \"judgment\"".to_string(),
        )
    })?;

    let url = Url::parse(endpoint).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid judgment-endpoint '{}': {}", endpoint, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "judgment-endpoint '{}' must use http or https",
            endpoint
        )));
    }

    if config.judgment_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "judgment-timeout-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}
