use std::time::Duration;

use anyhow::{Context, Result};

/// Environment-driven service configuration. Invalid numeric values are
/// startup errors, not silent defaults.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub session_ttl: Duration,
    pub draft_ttl: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            session_ttl: ttl_from_env("SESSION_TTL_SECS", 30 * 60)?,
            draft_ttl: ttl_from_env("DRAFT_TTL_SECS", 7 * 24 * 60 * 60)?,
        })
    }
}

fn ttl_from_env(var: &str, default_secs: u64) -> Result<Duration> {
    match std::env::var(var) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{var} must be a whole number of seconds, got {raw:?}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}
