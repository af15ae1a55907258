use crate::config::types::{
    BrowserConfig, Config, CrawlConfig, LightConfig, OutputConfig, RetryConfig, SiteConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site_config(&config.site)?;
    validate_light_config(&config.light)?;
    validate_browser_config(&config.browser)?;
    validate_retry_config(&config.retry)?;
    validate_crawl_config(&config.crawl)?;
    validate_output_config(&config.output)?;
    Ok(())
}

fn validate_site_config(config: &SiteConfig) -> Result<(), ConfigError> {
    for placeholder in ["{category}", "{page}"] {
        if !config.listing_url.contains(placeholder) {
            return Err(ConfigError::Validation(format!(
                "listing_url must contain {}, got '{}'",
                placeholder, config.listing_url
            )));
        }
    }

    let sample = config
        .listing_url
        .replace("{category}", "sample")
        .replace("{page}", "1");
    validate_http_url("listing_url", &sample)?;
    validate_http_url("referer", &config.referer)?;
    validate_http_url("detail_referer", &config.detail_referer)?;

    if config.detail_path_marker.is_empty() {
        return Err(ConfigError::Validation(
            "detail_path_marker cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_light_config(config: &LightConfig) -> Result<(), ConfigError> {
    if config.max_concurrent < 1 || config.max_concurrent > 200 {
        return Err(ConfigError::Validation(format!(
            "light.max_concurrent must be between 1 and 200, got {}",
            config.max_concurrent
        )));
    }

    validate_delay_range("light", config.delay_min_ms, config.delay_max_ms)?;
    validate_timeout("light", config.timeout_secs)?;

    if let Some(proxy) = &config.proxy {
        Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid light.proxy: {}", e)))?;
    }

    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.endpoints.is_empty() {
        return Err(ConfigError::Validation(
            "browser.endpoints must list at least one instance".to_string(),
        ));
    }

    for endpoint in &config.endpoints {
        validate_http_url("browser endpoint", endpoint)?;
    }

    if config.tabs < 1 || config.tabs > 32 {
        return Err(ConfigError::Validation(format!(
            "browser.tabs must be between 1 and 32, got {}",
            config.tabs
        )));
    }

    validate_delay_range("browser", config.delay_min_ms, config.delay_max_ms)?;
    validate_timeout("browser", config.timeout_secs)?;

    if config.profile_dir.is_empty() {
        return Err(ConfigError::Validation(
            "browser.profile_dir cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "browser.user_agent cannot be empty".to_string(),
        ));
    }

    parse_viewport(&config.viewport)?;

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "retry.max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }
    Ok(())
}

fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("pa_skip_threshold", config.pa_skip_threshold),
        ("dedup_threshold", config.dedup_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{} must be between 0 and 1, got {}",
                name, value
            )));
        }
    }

    if config.max_results == Some(0) {
        return Err(ConfigError::Validation(
            "max_results must be >= 1 when set".to_string(),
        ));
    }

    if config.max_pages_per_category < 1 {
        return Err(ConfigError::Validation(
            "max_pages_per_category must be >= 1".to_string(),
        ));
    }

    if config.bulk_concurrency < 1 {
        return Err(ConfigError::Validation(
            "bulk_concurrency must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_http_url(name: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", name, value, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} '{}' must use http or https",
            name, value
        )));
    }

    Ok(())
}

fn validate_delay_range(section: &str, min_ms: u64, max_ms: u64) -> Result<(), ConfigError> {
    if min_ms > max_ms {
        return Err(ConfigError::Validation(format!(
            "{}.delay_min_ms ({}) must not exceed delay_max_ms ({})",
            section, min_ms, max_ms
        )));
    }
    Ok(())
}

fn validate_timeout(section: &str, timeout_secs: u64) -> Result<(), ConfigError> {
    if timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.timeout_secs must be >= 1",
            section
        )));
    }
    Ok(())
}

/// Parses a "width,height" viewport string
pub(crate) fn parse_viewport(viewport: &str) -> Result<(u32, u32), ConfigError> {
    let invalid = || ConfigError::Validation(format!("Invalid viewport '{}'", viewport));

    let (width, height) = viewport.split_once(',').ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;

    if width == 0 || height == 0 {
        return Err(invalid());
    }

    Ok((width, height))
}
