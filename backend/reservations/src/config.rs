//! Application configuration loaded from environment variables.

use std::fmt;

use crate::errors::{AppError, Result};

/// Deployment profile of this backend (not of the processor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProfile {
    Development,
    Staging,
    Production,
}

impl AppProfile {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "" => Ok(Self::Development),
            "staging" | "test" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(AppError::Config(format!("Invalid APP_ENV: {other}"))),
        }
    }
}

/// Which processor endpoints the real gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "test" | "" => Ok(Self::Sandbox),
            "production" | "live" => Ok(Self::Production),
            other => Err(AppError::Config(format!("Invalid GATEWAY_ENVIRONMENT: {other}"))),
        }
    }

    pub fn hosted_checkout_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://testsecureacceptance.cybersource.com/pay",
            Self::Production => "https://secureacceptance.cybersource.com/pay",
        }
    }

    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Sandbox => "https://apitest.cybersource.com",
            Self::Production => "https://api.cybersource.com",
        }
    }
}

/// Processor credentials. Built once and handed to the gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub merchant_id: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub profile_id: Option<String>,
    /// Shared secret of the REST payments API (direct charges and refunds).
    pub api_secret: Option<String>,
    pub environment: GatewayEnvironment,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "✓" } else { "✗" };
        f.debug_struct("GatewayConfig")
            .field("merchant_id", &self.merchant_id)
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("profile_id", &self.profile_id)
            .field("api_secret", &mask(&self.api_secret))
            .field("environment", &self.environment)
            .finish()
    }
}

impl GatewayConfig {
    /// `true` when no credential at all has been provided.
    pub fn is_unconfigured(&self) -> bool {
        [
            &self.merchant_id,
            &self.access_key,
            &self.secret_key,
            &self.profile_id,
            &self.api_secret,
        ]
        .iter()
        .all(|v| v.is_none())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL or path
    pub database_url: String,
    /// Maximum pooled SQLite connections
    pub db_max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// Public base URL of this backend, used to build processor callback URLs
    pub backend_url: String,
    /// Base URL of the guest-facing frontend, target of result redirects
    pub frontend_url: String,
    pub profile: AppProfile,
    /// Optional HTTP mail relay; email is only logged when unset
    pub mail_relay_url: Option<String>,
    pub mail_from: String,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./grand_hotel.db".to_string()),
            db_max_connections: env_var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid DB_MAX_CONNECTIONS".to_string()))?,
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid API_PORT".to_string()))?,
            backend_url: trim_slash(
                env_var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:5000".to_string()),
            ),
            frontend_url: trim_slash(
                env_var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            ),
            profile: AppProfile::parse(&env_var("APP_ENV").unwrap_or_default())?,
            mail_relay_url: optional_env("MAIL_RELAY_URL"),
            mail_from: env_var("MAIL_FROM")
                .unwrap_or_else(|_| "reservations@grandhotel.local".to_string()),
            gateway: GatewayConfig {
                merchant_id: optional_env("GATEWAY_MERCHANT_ID"),
                access_key: optional_env("GATEWAY_ACCESS_KEY"),
                secret_key: optional_env("GATEWAY_SECRET_KEY"),
                profile_id: optional_env("GATEWAY_PROFILE_ID"),
                api_secret: optional_env("GATEWAY_API_SECRET"),
                environment: GatewayEnvironment::parse(
                    &env_var("GATEWAY_ENVIRONMENT").unwrap_or_default(),
                )?,
            },
        })
    }

    pub fn callback_url(&self) -> String {
        format!("{}/api/payments/callback", self.backend_url)
    }

    pub fn cancel_url(&self) -> String {
        format!("{}/api/payments/cancel", self.backend_url)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}

/// A set, non-blank variable.
fn optional_env(key: &str) -> Option<String> {
    env_var(key).ok().filter(|v| !v.trim().is_empty())
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
