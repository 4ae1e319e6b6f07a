// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::checkpoint::FileCheckpointStore;
use crate::constants::{
    DEFAULT_MAX_FIELD_BYTES, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_BUFFER_BYTES,
    DEFAULT_REQUEST_TIMEOUT, ENV_PREFIX, MAX_DELIVERY_DELAY, MIN_DELIVERY_DELAY,
};
use crate::delivery::Backoff;
use crate::errors::ConfigError;
use crate::http_sink::HttpSinkConfig;
use crate::sink::{SinkLimits, SinkProfile};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Exporter configuration, read from `JOURNALD_EXPORTER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// URL batches are POSTed to
    pub endpoint: String,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
    /// Directory holding the checkpoint; no checkpoint is kept when unset
    pub state_dir: Option<PathBuf>,
    /// Distinguishes the checkpoints of exporters sharing a state directory
    pub instance_id: Option<String>,
    pub sink_profile: SinkProfile,
    /// Profile limits with any overrides applied
    pub limits: SinkLimits,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub queue_capacity: usize,
    pub read_buffer_bytes: usize,
    pub max_field_bytes: usize,
    /// Path or name of the journalctl binary
    pub journalctl: String,
    pub request_timeout: Duration,
    /// zstd level for request bodies; uncompressed when unset
    pub compression_level: Option<i32>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(&format!("{ENV_PREFIX}{key}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let endpoint = var("ENDPOINT").ok_or(ConfigError::Missing("JOURNALD_EXPORTER_ENDPOINT"))?;
        let sink_profile = var("SINK_PROFILE")
            .map(|value| value.parse::<SinkProfile>())
            .transpose()?
            .unwrap_or_default();

        let mut limits = sink_profile.limits();
        if let Some(value) = var("MAX_BATCH_BYTES") {
            limits.max_batch_bytes = parse("MAX_BATCH_BYTES", &value)?;
        }
        if let Some(value) = var("MAX_BATCH_ENTRIES") {
            limits.max_batch_entries = parse_optional("MAX_BATCH_ENTRIES", &value)?;
        }
        if let Some(value) = var("ENTRY_OVERHEAD_BYTES") {
            limits.entry_overhead_bytes = parse("ENTRY_OVERHEAD_BYTES", &value)?;
        }
        if let Some(value) = var("MAX_ENTRY_BYTES") {
            limits.max_entry_bytes = parse_optional("MAX_ENTRY_BYTES", &value)?;
        }

        let config = Self {
            endpoint,
            api_key: var("API_KEY"),
            state_dir: var("STATE_DIR").map(PathBuf::from),
            instance_id: var("INSTANCE_ID"),
            sink_profile,
            limits,
            min_delay: var("MIN_DELAY_MS")
                .map(|value| parse("MIN_DELAY_MS", &value).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(MIN_DELIVERY_DELAY),
            max_delay: var("MAX_DELAY_MS")
                .map(|value| parse("MAX_DELAY_MS", &value).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(MAX_DELIVERY_DELAY),
            queue_capacity: var("QUEUE_CAPACITY")
                .map(|value| parse("QUEUE_CAPACITY", &value))
                .transpose()?
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            read_buffer_bytes: var("READ_BUFFER_BYTES")
                .map(|value| parse("READ_BUFFER_BYTES", &value))
                .transpose()?
                .unwrap_or(DEFAULT_READ_BUFFER_BYTES),
            max_field_bytes: var("MAX_FIELD_BYTES")
                .map(|value| parse("MAX_FIELD_BYTES", &value))
                .transpose()?
                .unwrap_or(DEFAULT_MAX_FIELD_BYTES),
            journalctl: var("JOURNALCTL").unwrap_or_else(|| "journalctl".to_string()),
            request_timeout: var("REQUEST_TIMEOUT_SECS")
                .map(|value| parse("REQUEST_TIMEOUT_SECS", &value).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            compression_level: var("COMPRESSION_LEVEL")
                .map(|value| parse("COMPRESSION_LEVEL", &value))
                .transpose()?,
            https_proxy: var("PROXY_HTTPS").or_else(|| {
                lookup("HTTPS_PROXY").filter(|value| !value.trim().is_empty())
            }),
            log_level: var("LOG_LEVEL")
                .map(|value| value.to_lowercase())
                .unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(invalid("ENDPOINT", format!("{:?} is not an http(s) URL", self.endpoint)));
        }

        self.limits.validate()?;

        if self.min_delay.is_zero() {
            return Err(invalid("MIN_DELAY_MS", "must be greater than 0"));
        }
        if self.max_delay < self.min_delay {
            return Err(invalid("MAX_DELAY_MS", "must not be below MIN_DELAY_MS"));
        }

        for (key, value) in [
            ("QUEUE_CAPACITY", self.queue_capacity),
            ("READ_BUFFER_BYTES", self.read_buffer_bytes),
            ("MAX_FIELD_BYTES", self.max_field_bytes),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be greater than 0"));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(invalid("REQUEST_TIMEOUT_SECS", "must be greater than 0"));
        }

        if let Some(level) = self.compression_level {
            let range = zstd::compression_level_range();
            if !range.contains(&level) {
                return Err(invalid(
                    "COMPRESSION_LEVEL",
                    format!("{level} is outside {}..={}", range.start(), range.end()),
                ));
            }
        }

        if self.instance_id.is_some() && self.state_dir.is_none() {
            return Err(invalid("INSTANCE_ID", "requires STATE_DIR"));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(invalid(
                "LOG_LEVEL",
                format!(
                    "'{}' must be one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            ));
        }

        Ok(())
    }

    /// The checkpoint store, or `None` when no state directory is configured.
    pub fn checkpoint_store(&self) -> Result<Option<FileCheckpointStore>, ConfigError> {
        self.state_dir
            .as_ref()
            .map(|dir| FileCheckpointStore::new(dir, self.instance_id.as_deref()))
            .transpose()
    }

    pub fn http_sink_config(&self) -> HttpSinkConfig {
        HttpSinkConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            timeout: self.request_timeout,
            https_proxy: self.https_proxy.clone(),
            compression_level: self.compression_level,
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.min_delay, self.max_delay)
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| invalid(key, format!("{value:?}: {e}")))
}

/// Like [`parse`], with `none` meaning no limit.
fn parse_optional<T>(key: &'static str, value: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if value.eq_ignore_ascii_case("none") {
        Ok(None)
    } else {
        parse(key, value).map(Some)
    }
}
