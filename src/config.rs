use crate::history::{DEFAULT_CAPACITY, DEFAULT_HEADROOM};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

/// Worker's own listen address. Behind the `/api` forwarding layer use
/// `http://<host>/api` instead.
pub const DEFAULT_API_BASE: &str = "http://localhost:8002";

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid API base URL {url:?}: {reason}")]
    InvalidApiBase { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Runtime settings for the dashboard.
#[derive(Debug, Clone)]
pub struct DashConfig {
    /// Base that `/stats`, `/start` and `/stop` are appended to.
    pub api_base: String,
    pub tick_interval: Duration,
    /// Upper bound for any single request; a hung worker shows up as unreachable.
    pub request_timeout: Duration,
    pub history_capacity: usize,
    pub chart_headroom: f64,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            history_capacity: DEFAULT_CAPACITY,
            chart_headroom: DEFAULT_HEADROOM,
        }
    }
}

impl DashConfig {
    /// Check the settings and normalize the base URL (no trailing slash).
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let trimmed = self.api_base.trim().trim_end_matches('/').to_string();
        let url = Url::parse(&trimmed).map_err(|e| ConfigError::InvalidApiBase {
            url: self.api_base.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidApiBase {
                url: self.api_base,
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        self.api_base = trimmed;

        if self.tick_interval.is_zero() {
            return Err(ConfigError::Zero("refresh interval"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero("request timeout"));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero("history capacity"));
        }
        Ok(self)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints::new(&self.api_base)
    }
}

/// Fully-qualified worker URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub stats: String,
    pub start: String,
    pub stop: String,
    pub health: String,
}

impl Endpoints {
    pub fn new(api_base: &str) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            stats: format!("{}/stats", base),
            start: format!("{}/start", base),
            stop: format!("{}/stop", base),
            health: format!("{}/", base),
        }
    }
}
