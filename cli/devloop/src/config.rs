//! Configuration from `DEVLOOP_*` environment variables

use std::time::Duration;

use devloop_core::Settings;
use devloop_core::settings::{
    DEFAULT_BUILD_TIMEOUT, DEFAULT_CLAIM_SIZE, DEFAULT_DELETE_TIMEOUT, DEFAULT_POD_TIMEOUT, DEFAULT_SECRET_TIMEOUT,
    DEFAULT_SUPERVISOR_IMAGE, DEFAULT_UPDATE_TIMEOUT,
};

use crate::error::CliError;

/// Polling interval of `watch`
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(1000);

/// Everything the binary reads from its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `None` falls back to the kubeconfig namespace
    pub namespace: Option<String>,
    pub settings: Settings,
    pub watch_interval: Duration,
}

fn parse_number(key: &str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<u64>, CliError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| CliError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn secs(key: &str, default: Duration, lookup: &impl Fn(&str) -> Option<String>) -> Result<Duration, CliError> {
    Ok(parse_number(key, lookup)?.map_or(default, Duration::from_secs))
}

impl Config {
    pub fn from_env() -> Result<Self, CliError> {
        Self::from_lookup(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CliError> {
        let settings = Settings {
            update_timeout: secs("DEVLOOP_UPDATE_TIMEOUT_SECS", DEFAULT_UPDATE_TIMEOUT, &lookup)?,
            pod_timeout: secs("DEVLOOP_POD_TIMEOUT_SECS", DEFAULT_POD_TIMEOUT, &lookup)?,
            build_timeout: secs("DEVLOOP_BUILD_TIMEOUT_SECS", DEFAULT_BUILD_TIMEOUT, &lookup)?,
            secret_timeout: secs("DEVLOOP_SECRET_TIMEOUT_SECS", DEFAULT_SECRET_TIMEOUT, &lookup)?,
            delete_timeout: secs("DEVLOOP_DELETE_TIMEOUT_SECS", DEFAULT_DELETE_TIMEOUT, &lookup)?,
            claim_size: lookup("DEVLOOP_CLAIM_SIZE").unwrap_or_else(|| DEFAULT_CLAIM_SIZE.to_string()),
            supervisor_image: lookup("DEVLOOP_SUPERVISOR_IMAGE")
                .unwrap_or_else(|| DEFAULT_SUPERVISOR_IMAGE.to_string()),
            ..Settings::default()
        };

        let watch_interval = parse_number("DEVLOOP_WATCH_INTERVAL_MS", &lookup)?
            .map_or(DEFAULT_WATCH_INTERVAL, Duration::from_millis);
        if watch_interval.is_zero() {
            return Err(CliError::InvalidConfig("DEVLOOP_WATCH_INTERVAL_MS must be positive".to_string()));
        }

        Ok(Self {
            namespace: lookup("DEVLOOP_NAMESPACE"),
            settings,
            watch_interval,
        })
    }
}
