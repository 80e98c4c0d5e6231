use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your-secret-key",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: Option<String>,
    pub auth_service_url: Option<String>,
    pub user_service_url: String,
    pub upstream_timeout: Duration,
    pub store_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("DUET_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("DUET_PORT is not a port: {raw}"))?,
            None => 3003,
        };

        let jwt_secret = get("DUET_JWT_SECRET");
        let auth_service_url = get("DUET_AUTH_SERVICE_URL");
        if let Some(secret) = &jwt_secret {
            if PLACEHOLDER_SECRETS.contains(&secret.as_str()) {
                bail!("DUET_JWT_SECRET is still a placeholder; set a real secret");
            }
        } else if auth_service_url.is_none() {
            bail!("DUET_JWT_SECRET is unset and no DUET_AUTH_SERVICE_URL is configured");
        }

        Ok(Self {
            host: get("DUET_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("DUET_DB_PATH").unwrap_or_else(|| "duet.db".into())),
            jwt_secret,
            auth_service_url,
            user_service_url: get("DUET_USER_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:3002".into()),
            upstream_timeout: millis(get("DUET_UPSTREAM_TIMEOUT_MS"), "DUET_UPSTREAM_TIMEOUT_MS")?,
            store_timeout: millis(get("DUET_STORE_TIMEOUT_MS"), "DUET_STORE_TIMEOUT_MS")?,
        })
    }
}

fn millis(raw: Option<String>, key: &str) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::from_millis(5000));
    };
    let ms: u64 = raw
        .parse()
        .with_context(|| format!("{key} is not a number of milliseconds: {raw}"))?;
    if ms == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(Duration::from_millis(ms))
}
