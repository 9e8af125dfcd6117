// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregator::CountingPolicy;
use crate::error::HarvestError;
use crate::window::{RemainderPolicy, MAX_WINDOWS};

pub const DEFAULT_APPLICATION_ID: u64 = 3042;
pub const DEFAULT_LOOKBACK_MINUTES: u32 = 1440;
pub const DEFAULT_WINDOW_MINUTES: u32 = 20;
pub const DEFAULT_MAX_CONCURRENCY: usize = 20;
pub const DEFAULT_CONFIG_FILE: &str = "./conf.json";
pub const DEFAULT_OUTPUT_FILE: &str = "resultado.json";
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;

/// Connection details for the controller, read from the credentials file.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerCredentials {
    #[serde(alias = "Protocol")]
    pub protocol: String,
    #[serde(alias = "Host")]
    pub host: String,
    #[serde(alias = "Port")]
    pub port: u16,
    #[serde(alias = "User")]
    pub user: String,
    #[serde(alias = "Password")]
    pub password: String,
    #[serde(alias = "Account")]
    pub account: String,
}

impl ControllerCredentials {
    pub fn from_file(path: &Path) -> Result<Self, HarvestError> {
        Self::read(path).map_err(|e| HarvestError::Config(format!("{e:#}")))
    }

    fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read credentials file {}", path.display()))?;
        let credentials: ControllerCredentials = serde_json::from_str(&raw)
            .with_context(|| format!("malformed credentials file {}", path.display()))?;
        credentials.validate()?;
        Ok(credentials)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.protocol.as_str(), "http" | "https") {
            anyhow::bail!(
                "Invalid protocol '{}'. Must be one of: http, https",
                self.protocol
            );
        }
        if self.host.trim().is_empty() {
            anyhow::bail!("controller host cannot be empty");
        }
        if self.port == 0 {
            anyhow::bail!("controller port must be greater than 0");
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Controllers authenticate `user@account`.
    pub fn username(&self) -> String {
        format!("{}@{}", self.user, self.account)
    }
}

impl fmt::Debug for ControllerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerCredentials")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("account", &self.account)
            .finish()
    }
}

/// Settings for a single harvest run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// User-facing application id, resolved to the internal id before harvesting
    pub application_id: u64,
    /// How far back to look, in minutes
    pub lookback_minutes: u32,
    /// Size of each query window, in minutes
    pub window_minutes: u32,
    /// Maximum number of snapshot queries in flight
    pub max_concurrency: usize,
    /// Upper bound for a single snapshot query
    pub query_timeout: Duration,
    pub remainder_policy: RemainderPolicy,
    pub counting_policy: CountingPolicy,
    pub credentials_file: PathBuf,
    pub output_path: PathBuf,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            application_id: DEFAULT_APPLICATION_ID,
            lookback_minutes: DEFAULT_LOOKBACK_MINUTES,
            window_minutes: DEFAULT_WINDOW_MINUTES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            remainder_policy: RemainderPolicy::default(),
            counting_policy: CountingPolicy::default(),
            credentials_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            output_path: PathBuf::from(DEFAULT_OUTPUT_FILE),
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `APPD_*` environment variables.
    pub fn from_env() -> Result<Self, HarvestError> {
        let mut config = Self::default();

        if let Ok(path) = env::var("APPD_CONFIG_FILE") {
            config.credentials_file = PathBuf::from(path);
        }
        if let Ok(secs) = env::var("APPD_QUERY_TIMEOUT_SECS") {
            let secs = secs.parse::<u64>().map_err(|_| {
                HarvestError::Config(format!("APPD_QUERY_TIMEOUT_SECS is not a number: {secs}"))
            })?;
            config.query_timeout = Duration::from_secs(secs);
        }
        config.https_proxy = env::var("APPD_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        if let Ok(level) = env::var("APPD_LOG_LEVEL") {
            config.log_level = level.to_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.lookback_minutes == 0 {
            return Err(HarvestError::Config(
                "lookback minutes must be greater than 0".to_string(),
            ));
        }
        if self.window_minutes == 0 {
            return Err(HarvestError::Config(
                "window minutes must be greater than 0".to_string(),
            ));
        }
        if (self.lookback_minutes / self.window_minutes).max(1) > MAX_WINDOWS {
            return Err(HarvestError::Config(format!(
                "lookback of {} minutes needs more than {MAX_WINDOWS} windows of {} minutes",
                self.lookback_minutes, self.window_minutes
            )));
        }
        if self.max_concurrency == 0 {
            return Err(HarvestError::Config(
                "max concurrency must be greater than 0".to_string(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(HarvestError::Config(
                "query timeout must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(HarvestError::Config(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
