// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide configuration, loaded once from environment variables.

use std::sync::OnceLock;
use std::time::Duration;

use crate::error::ConfigError;

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Immutable, process-wide configuration populated from environment
/// variables at startup.
///
/// # Examples
///
/// ```no_run
/// use device_core::Config;
///
/// let config = Config::from_env().expect("valid configuration");
/// Config::init(config);
///
/// let cfg = Config::get();
/// println!("broker at {}:{}", cfg.broker_address, cfg.broker_port);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Message broker network address.
    pub broker_address: String,
    /// Message broker port.
    pub broker_port: u16,
    /// Broker username.
    pub broker_username: String,
    /// Broker password.
    pub broker_password: String,
    /// Broker virtual host.
    pub broker_vhost: String,
    /// Connection string for the persistent store.
    pub database_url: String,
    /// Seconds of silence after which a device is considered offline.
    pub liveness_offline_threshold: Duration,
    /// Interval between liveness sweeps.
    pub liveness_sweep_interval: Duration,
    /// Number of concurrent ingest workers.
    pub ingest_worker_count: usize,
    /// Broker prefetch (unacknowledged messages in flight) per worker.
    pub ingest_prefetch: u16,
    /// Timeout for a broker publisher confirm.
    pub command_publish_timeout: Duration,
    /// Maximum dispatch retries on transient failure.
    pub command_max_retries: u32,
    /// Per-subscriber outbound event buffer size.
    pub fanout_buffer_size: usize,
}

impl Config {
    /// Loads configuration from environment variables, applying the
    /// defaults below for anything unset.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CORE_BROKER_ADDRESS` | required |
    /// | `CORE_BROKER_PORT` | required |
    /// | `CORE_BROKER_USERNAME` | required |
    /// | `CORE_BROKER_PASSWORD` | required |
    /// | `CORE_BROKER_VHOST` | `/` |
    /// | `CORE_DATABASE_URL` | required |
    /// | `CORE_LIVENESS_OFFLINE_THRESHOLD_S` | 15 |
    /// | `CORE_LIVENESS_SWEEP_INTERVAL_S` | 5 |
    /// | `CORE_INGEST_WORKER_COUNT` | 1 |
    /// | `CORE_INGEST_PREFETCH` | 10 |
    /// | `CORE_COMMAND_PUBLISH_TIMEOUT_S` | 10 |
    /// | `CORE_COMMAND_MAX_RETRIES` | 3 |
    /// | `CORE_FANOUT_BUFFER_SIZE` | 256 |
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingVar` for a required-but-absent
    /// variable, or `ConfigError::InvalidValue` for one that doesn't parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            broker_address: required("CORE_BROKER_ADDRESS")?,
            broker_port: parsed_or("CORE_BROKER_PORT", None)?.ok_or(ConfigError::MissingVar(
                "CORE_BROKER_PORT",
            ))?,
            broker_username: required("CORE_BROKER_USERNAME")?,
            broker_password: required("CORE_BROKER_PASSWORD")?,
            broker_vhost: optional_or("CORE_BROKER_VHOST", "/"),
            database_url: required("CORE_DATABASE_URL")?,
            liveness_offline_threshold: Duration::from_secs(
                parsed_or("CORE_LIVENESS_OFFLINE_THRESHOLD_S", Some(15))?.unwrap(),
            ),
            liveness_sweep_interval: Duration::from_secs(
                parsed_or("CORE_LIVENESS_SWEEP_INTERVAL_S", Some(5))?.unwrap(),
            ),
            ingest_worker_count: parsed_or("CORE_INGEST_WORKER_COUNT", Some(1))?.unwrap(),
            ingest_prefetch: parsed_or("CORE_INGEST_PREFETCH", Some(10))?.unwrap(),
            command_publish_timeout: Duration::from_secs(
                parsed_or("CORE_COMMAND_PUBLISH_TIMEOUT_S", Some(10))?.unwrap(),
            ),
            command_max_retries: parsed_or("CORE_COMMAND_MAX_RETRIES", Some(3))?.unwrap(),
            fanout_buffer_size: parsed_or("CORE_FANOUT_BUFFER_SIZE", Some(256))?.unwrap(),
        })
    }

    /// Installs `config` as the process-wide configuration. Must be
    /// called exactly once, before any call to [`Config::get`].
    pub fn init(config: Self) {
        let _ = CONFIG.set(config);
    }

    /// Returns the process-wide configuration.
    ///
    /// # Panics
    ///
    /// Panics if called before [`Config::init`].
    #[must_use]
    pub fn get() -> &'static Self {
        CONFIG
            .get()
            .expect("Config::init must run before Config::get")
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::MissingVar(var))
}

fn optional_or(var: &'static str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(
    var: &'static str,
    default: Option<T>,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var,
                reason: format!("could not parse {raw:?}"),
            }),
        Err(_) => Ok(default),
    }
}
