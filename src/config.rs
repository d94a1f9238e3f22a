use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use url::Url;

use crate::error::WardenError;

/// A single rate-limit gate: at most `max_requests` within a window of
/// `seconds`. Multiple rules may be active at once; each applies
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub seconds: f64,
}

/// Proxy configuration, loaded from the environment and an optional
/// `.proxy.env` file.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub debug: bool,
    /// Static allowed origins, stripped to bare hosts and de-duplicated.
    pub origins: Vec<String>,
    /// Block-store database file.
    pub database: PathBuf,
    pub allow_public_ip: bool,
    pub allow_private_ip: bool,
    /// Origin re-resolution interval in seconds. The refresher only runs
    /// when this is set and a dynamic IP source is enabled.
    pub origin_refresh: Option<u64>,
    pub rate_limit: Vec<RateLimitRule>,
    pub unsupported_browsers: Vec<String>,
    pub error_page: PathBuf,
    pub warn_page: PathBuf,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, WardenError> {
        dotenvy::from_filename(".proxy.env").ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);
        let workers = env::var("WORKERS")
            .ok()
            .and_then(|w| w.parse().ok())
            .unwrap_or(1);

        let origins = parse_origins(&env::var("ORIGINS").unwrap_or_default());

        let rate_limit = match env::var("RATE_LIMIT") {
            Ok(raw) => parse_rate_limit(&raw)?,
            Err(_) => Vec::new(),
        };

        let unsupported_browsers =
            parse_browsers(&env::var("UNSUPPORTED_BROWSERS").unwrap_or_default())?;

        Ok(Self {
            host,
            port,
            workers,
            debug: env_flag("DEBUG"),
            origins,
            database: env::var("DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("proxy.db")),
            allow_public_ip: env_flag("ALLOW_PUBLIC_IP"),
            allow_private_ip: env_flag("ALLOW_PRIVATE_IP"),
            origin_refresh: env::var("ORIGIN_REFRESH").ok().and_then(|v| v.parse().ok()),
            rate_limit,
            unsupported_browsers,
            error_page: env::var("ERROR_PAGE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("templates/error.html")),
            warn_page: env::var("WARN_PAGE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("templates/warn.html")),
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Reduce a configured origin to its bare host: no scheme, no port, no path.
pub(crate) fn strip_origin(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(entry)
        && let Some(host) = url.host_str()
    {
        return Some(host.to_string());
    }
    // No scheme: drop anything after the first slash, then a numeric port.
    let host = entry.split('/').next().unwrap_or(entry);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Parse the comma-separated origins list, stripping each entry to a bare
/// host and de-duplicating while preserving order.
pub(crate) fn parse_origins(raw: &str) -> Vec<String> {
    let mut origins = Vec::new();
    for entry in raw.split(',') {
        if let Some(host) = strip_origin(entry)
            && !origins.contains(&host)
        {
            origins.push(host);
        }
    }
    origins
}

/// Rate-limit rules arrive as JSON: either a single object or a list of
/// objects. A single object is coerced to a one-element list.
pub(crate) fn parse_rate_limit(raw: &str) -> Result<Vec<RateLimitRule>, WardenError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(rules) = serde_json::from_str::<Vec<RateLimitRule>>(raw) {
        return Ok(rules);
    }
    serde_json::from_str::<RateLimitRule>(raw)
        .map(|rule| vec![rule])
        .map_err(|e| WardenError::Config(format!("Invalid RATE_LIMIT value: {e}")))
}

/// Browser family names must be bare words: no punctuation, no whitespace.
pub(crate) fn parse_browsers(raw: &str) -> Result<Vec<String>, WardenError> {
    let mut browsers = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if !entry.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(WardenError::Config(format!(
                "Invalid browser name {entry:?}: must be alphanumeric"
            )));
        }
        browsers.push(entry.to_string());
    }
    Ok(browsers)
}
