use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::model::Secret;

const DEFAULT_REPLICATE_URL: &str = "https://api.replicate.com/v1";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// Process-wide settings, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub template_dir: String,
    pub replicate_api_token: Option<Secret>,
    pub gemini_api_key: Option<Secret>,
    pub replicate_api_url: String,
    pub gemini_api_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub session_idle_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", 120)?;
        let poll_ms: u64 = parse_var("REPLICATE_POLL_INTERVAL_MS", 500)?;
        let idle_secs: u64 = parse_var("SESSION_IDLE_SECS", 3600)?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_var("PORT", 8080)?,
            template_dir: env::var("TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string()),
            replicate_api_token: secret_var("REPLICATE_API_TOKEN"),
            gemini_api_key: secret_var("GEMINI_API_KEY"),
            replicate_api_url: env::var("REPLICATE_API_URL")
                .unwrap_or_else(|_| DEFAULT_REPLICATE_URL.to_string()),
            gemini_api_url: env::var("GEMINI_API_URL")
                .unwrap_or_else(|_| DEFAULT_GEMINI_URL.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(poll_ms),
            session_idle_ttl: Duration::from_secs(idle_secs),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            template_dir: "templates".to_string(),
            replicate_api_token: None,
            gemini_api_key: None,
            replicate_api_url: DEFAULT_REPLICATE_URL.to_string(),
            gemini_api_url: DEFAULT_GEMINI_URL.to_string(),
            request_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
            session_idle_ttl: Duration::from_secs(3600),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

// Empty values count as absent
fn secret_var(name: &str) -> Option<Secret> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(Secret::new)
}
