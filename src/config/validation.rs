use crate::config::types::{Config, CrawlConfig, SiteConfig, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_site_config(&config.site)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

/// Validates crawl configuration
///
/// `crawl-delay`, `max-retries` and `max-external-links` may legitimately be
/// zero; everything that bounds a loop or a wait must be positive.
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_parallel_crawl < 1 || config.max_parallel_crawl > 100 {
        return Err(ConfigError::Validation(format!(
            "max-parallel-crawl must be between 1 and 100, got {}",
            config.max_parallel_crawl
        )));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(
            "request-timeout must be >= 1ms".to_string(),
        ));
    }

    if config.max_redirects < 1 {
        return Err(ConfigError::Validation(format!(
            "max-redirects must be >= 1, got {}",
            config.max_redirects
        )));
    }

    if config.retry_backoff > MAX_RETRY_BACKOFF_MS {
        return Err(ConfigError::Validation(format!(
            "retry-backoff must be at most {}ms, got {}",
            MAX_RETRY_BACKOFF_MS, config.retry_backoff
        )));
    }

    validate_user_agent(&config.user_agent)?;

    if config.max_pages == Some(0) {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1 when set".to_string(),
        ));
    }

    if config.checkpoint_interval == Some(0) {
        return Err(ConfigError::Validation(
            "checkpoint-interval must be >= 1s when set".to_string(),
        ));
    }

    Ok(())
}

/// User agents end up in a header value, so only visible ASCII and spaces are allowed
fn validate_user_agent(user_agent: &str) -> Result<(), ConfigError> {
    if user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if !user_agent.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
        return Err(ConfigError::Validation(format!(
            "user-agent must be printable ASCII, got '{}'",
            user_agent
        )));
    }

    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.root_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid root-url '{}': {}", config.root_url, e))
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "root-url '{}' must use http or https",
            config.root_url
        )));
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "root-url '{}' has no host",
            config.root_url
        )));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
