use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Runtime settings, read once at start-up and handed to each component.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_addr: SocketAddr,
    /// Base URL of the platform's auth service, e.g. `https://xyz.example.co/auth/v1`.
    pub auth_url: String,
    pub api_key: Option<String>,
    /// Empty disables the lookup.
    pub ip_lookup_url: String,
    pub local_store_path: String,
    pub vote_page_size: usize,
    pub use_default_banners: bool,
    pub default_banners: Vec<String>,
    pub auth_retry_attempts: u32,
    pub profile_sync_attempts: u32,
    pub retry_delay: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| {
            lookup(key).unwrap_or_else(|| {
                info!("{} not set, using default: {}", key, default);
                default.to_string()
            })
        };

        let vote_page_size: usize = parse(
            "VOTE_PAGE_SIZE",
            &get("VOTE_PAGE_SIZE", &DEFAULT_PAGE_SIZE.to_string()),
        )?;
        if vote_page_size == 0 {
            return Err(Error::Config("VOTE_PAGE_SIZE must be at least 1".to_string()));
        }

        Ok(Self {
            database_url: get("DATABASE_URL", "sqlite:dj_vote.db"),
            database_max_connections: parse(
                "DATABASE_MAX_CONNECTIONS",
                &get("DATABASE_MAX_CONNECTIONS", "5"),
            )?,
            bind_addr: parse("BIND_ADDR", &get("BIND_ADDR", "0.0.0.0:3000"))?,
            auth_url: get("AUTH_URL", "http://localhost:9999/auth/v1")
                .trim_end_matches('/')
                .to_string(),
            api_key: lookup("PLATFORM_API_KEY").filter(|k| !k.is_empty()),
            ip_lookup_url: get("IP_LOOKUP_URL", "https://api.ipify.org?format=json"),
            local_store_path: get("LOCAL_STORE_PATH", "dj_vote_state.json"),
            vote_page_size,
            use_default_banners: parse(
                "USE_DEFAULT_BANNERS",
                &get("USE_DEFAULT_BANNERS", "false"),
            )?,
            default_banners: get("DEFAULT_BANNERS", "/banners/default-1.jpg,/banners/default-2.jpg")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            auth_retry_attempts: parse("AUTH_RETRY_ATTEMPTS", &get("AUTH_RETRY_ATTEMPTS", "3"))?,
            profile_sync_attempts: parse(
                "PROFILE_SYNC_ATTEMPTS",
                &get("PROFILE_SYNC_ATTEMPTS", "3"),
            )?,
            retry_delay: Duration::from_millis(parse(
                "RETRY_DELAY_MS",
                &get("RETRY_DELAY_MS", "250"),
            )?),
            http_timeout: Duration::from_secs(parse(
                "HTTP_TIMEOUT_SECS",
                &get("HTTP_TIMEOUT_SECS", "10"),
            )?),
        })
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} value {:?}: {}", key, value, e)))
}
