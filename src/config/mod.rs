mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./hls-relay.toml",
        "./config.toml",
        "~/.config/hls-relay/config.toml",
        "/etc/hls-relay/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Apply environment overrides on top of a loaded config.
///
/// Recognised variables: `HOST`, `PORT`, `SOCKS_PROXY`, `CACHE_TTL`,
/// `UPSTREAM_URL`, `UPSTREAM_TIMEOUT`. The result is re-validated.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    apply_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(config)
}

fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("PORT") {
        config.server.port = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid PORT: {port:?}"))?;
    }
    if let Some(proxy) = lookup("SOCKS_PROXY") {
        // An empty value explicitly disables a proxy set in the config file.
        config.upstream.proxy_url = Some(proxy);
    }
    if let Some(ttl) = lookup("CACHE_TTL") {
        config.cache.ttl_secs = ttl
            .trim()
            .parse()
            .with_context(|| format!("Invalid CACHE_TTL: {ttl:?}"))?;
    }
    if let Some(template) = lookup("UPSTREAM_URL") {
        config.upstream.url_template = template;
    }
    if let Some(timeout) = lookup("UPSTREAM_TIMEOUT") {
        config.upstream.timeout_secs = timeout
            .trim()
            .parse()
            .with_context(|| format!("Invalid UPSTREAM_TIMEOUT: {timeout:?}"))?;
    }
    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let template = &config.upstream.url_template;
    if !template.contains(CHANNEL_PLACEHOLDER) || !template.contains(FILE_PLACEHOLDER) {
        anyhow::bail!(
            "Upstream url_template must contain {} and {}: {}",
            CHANNEL_PLACEHOLDER,
            FILE_PLACEHOLDER,
            template
        );
    }
    if !template.starts_with("http://") && !template.starts_with("https://") {
        anyhow::bail!("Upstream url_template must be an http(s) URL: {}", template);
    }

    if hls_relay_common::SegmentName::parse(&config.upstream.manifest_file).is_err() {
        anyhow::bail!(
            "Upstream manifest_file must be a plain file name: {}",
            config.upstream.manifest_file
        );
    }

    if config.upstream.timeout_secs == 0 {
        anyhow::bail!("Upstream timeout cannot be 0");
    }

    if let Some(proxy) = config.upstream.proxy() {
        crate::upstream::proxy::parse_proxy_url(proxy)
            .with_context(|| "Invalid upstream proxy_url".to_string())?;
    }

    if config.cache.ttl_secs == 0 {
        anyhow::bail!("Cache TTL cannot be 0");
    }

    if config.relay.chunk_size == 0 {
        anyhow::bail!("Relay chunk_size cannot be 0");
    }

    if config.relay.segment_extensions.is_empty() {
        anyhow::bail!("At least one segment extension is required");
    }
    for ext in &config.relay.segment_extensions {
        if ext.trim().is_empty() {
            anyhow::bail!("Segment extensions cannot be empty strings");
        }
    }

    Ok(())
}
