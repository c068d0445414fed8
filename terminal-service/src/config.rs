use anyhow::{Context, Result};
use std::env;
use std::time::Duration;
use uuid::Uuid;

const SANDBOX_API_URL: &str = "https://connect.squareupsandbox.com";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: Option<String>,
    pub square_access_token: String,
    pub square_api_url: String,
    pub square_version: String,
    pub square_location_id: String,
    pub default_currency: String,
    pub gateway_timeout: Duration,
    pub poll_interval: Duration,
    pub poll_max_attempts: u32,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_leeway_seconds: Option<u32>,
    pub dev_tenant_id: Option<Uuid>,
    pub host: String,
    pub port: u16,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let square_access_token =
            env::var("SQUARE_ACCESS_TOKEN").context("SQUARE_ACCESS_TOKEN must be set")?;
        let square_location_id =
            env::var("SQUARE_LOCATION_ID").context("SQUARE_LOCATION_ID must be set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").context("JWT_ISSUER must be set")?;
        let jwt_audience = env::var("JWT_AUDIENCE").context("JWT_AUDIENCE must be set")?;
        let database_url = env::var("DATABASE_URL").ok();
        let square_api_url = env::var("SQUARE_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| SANDBOX_API_URL.to_string());
        let square_version =
            env::var("SQUARE_VERSION").unwrap_or_else(|_| "2024-01-18".to_string());
        let default_currency = env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "USD".to_string());
        let gateway_timeout_secs = env::var("GATEWAY_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(15);
        let poll_interval_secs = env::var("POLL_INTERVAL_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(2);
        let poll_max_attempts = env::var("POLL_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(150);
        let jwt_leeway_seconds = env::var("JWT_LEEWAY_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok());
        let dev_tenant_id = env::var("DEV_TENANT_ID")
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok());
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8087);

        Ok(Self {
            database_url,
            square_access_token,
            square_api_url,
            square_version,
            square_location_id,
            default_currency,
            // The processor recommends keeping request deadlines between
            // 10 and 30 seconds; anything outside that window is a config
            // mistake, not a tuning choice.
            gateway_timeout: Duration::from_secs(gateway_timeout_secs.clamp(10, 30)),
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            poll_max_attempts: poll_max_attempts.max(1),
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_leeway_seconds,
            dev_tenant_id,
            host,
            port,
        })
    }
}
