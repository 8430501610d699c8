//! Environment-driven configuration.

use std::{env, fmt::Display, net::SocketAddr, str::FromStr};

use secrecy::SecretString;
use thiserror::Error;
use time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::store::DEFAULT_TTL;

const BOT_NAME_PLACEHOLDER: &str = "your_bot_name";
const BOT_TOKEN_PLACEHOLDER: &str = "your_bot_token";

#[derive(Error, Debug)]
#[error("invalid value for {key}: {message}")]
pub struct ConfigError {
    pub key: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Bot username used in deep links. Checked when a login starts, not at boot.
    pub bot_name: Option<String>,
    pub bot_token: Option<SecretString>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook calls. Set the
    /// same value as `secret_token` when registering the webhook.
    pub webhook_secret: Option<SecretString>,
    pub session_ttl: Duration,
    pub max_verify_attempts: Option<u32>,
    pub site_name: String,
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_ttl = DEFAULT_TTL.whole_seconds();
        let ttl_secs: i64 = try_load(&lookup, "LOGIN_SESSION_TTL_SECS", default_ttl)?;
        if ttl_secs <= 0 {
            return Err(ConfigError {
                key: "LOGIN_SESSION_TTL_SECS",
                message: "must be positive".to_string(),
            });
        }

        let default_addr = SocketAddr::from(([127, 0, 0, 1], 3000));

        Ok(Self {
            bind_addr: try_load(&lookup, "BIND_ADDR", default_addr)?,
            bot_name: configured(&lookup, "TELEGRAM_BOT_NAME", BOT_NAME_PLACEHOLDER),
            bot_token: configured(&lookup, "TELEGRAM_BOT_TOKEN", BOT_TOKEN_PLACEHOLDER)
                .map(SecretString::from),
            webhook_secret: lookup("TELEGRAM_WEBHOOK_SECRET")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
            session_ttl: Duration::seconds(ttl_secs),
            max_verify_attempts: try_load_optional(&lookup, "LOGIN_MAX_VERIFY_ATTEMPTS")?,
            site_name: lookup("LOGIN_SITE_NAME").unwrap_or_else(|| "StroyMarket".to_string()),
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match try_load_optional(lookup, key)? {
        Some(value) => Ok(value),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

fn try_load_optional<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };

    match raw.trim().parse::<T>() {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Invalid {key} value: {e}");
            Err(ConfigError {
                key,
                message: e.to_string(),
            })
        }
    }
}

/// A non-empty value that is not the sample placeholder.
fn configured<F>(lookup: &F, key: &str, placeholder: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != placeholder);

    if value.is_none() {
        warn!("{key} is not configured");
    }
    value
}
