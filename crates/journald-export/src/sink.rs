// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destination of delivered batches.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{ConfigError, SinkError};
use crate::queue::QueuedEntry;

/// A destination that accepts whole batches.
///
/// `Ok` acknowledges every entry in the batch. A failure leaves the batch
/// queued; [`SinkError::InvalidSequenceToken`] additionally carries state the
/// delivery loop hands back through [`Sink::adopt_sequence_token`] before the
/// next attempt.
#[async_trait]
pub trait Sink: Send {
    async fn send(&mut self, batch: &[Arc<QueuedEntry>]) -> Result<(), SinkError>;

    fn adopt_sequence_token(&mut self, _token: String) {}
}

/// Batch ceilings and truncation policy of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkLimits {
    /// Ceiling on the summed size of a batch, overhead included.
    pub max_batch_bytes: usize,
    /// Ceiling on the number of entries per batch, if the sink has one.
    pub max_batch_entries: Option<usize>,
    /// Bytes the sink adds around every entry.
    pub entry_overhead_bytes: usize,
    /// Envelope size entries are truncated to, if the sink truncates.
    pub max_entry_bytes: Option<usize>,
}

impl SinkLimits {
    /// Size an entry counts for against [`SinkLimits::max_batch_bytes`].
    pub fn size_of(&self, entry: &QueuedEntry) -> usize {
        entry.payload.len() + self.entry_overhead_bytes
    }

    /// Envelope size every entry is truncated to before it is queued.
    ///
    /// Besides the sink's own policy an entry never gets larger than a batch
    /// can carry, otherwise it would stay at the head of the queue forever.
    pub fn entry_limit(&self) -> usize {
        let batch_room = self
            .max_batch_bytes
            .saturating_sub(self.entry_overhead_bytes);
        self.max_entry_bytes
            .map_or(batch_room, |limit| limit.min(batch_room))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_bytes <= self.entry_overhead_bytes {
            return Err(ConfigError::Invalid {
                key: "MAX_BATCH_BYTES",
                reason: format!(
                    "{} leaves no room for entries after {} bytes of overhead",
                    self.max_batch_bytes, self.entry_overhead_bytes
                ),
            });
        }
        if self.max_batch_entries == Some(0) {
            return Err(ConfigError::Invalid {
                key: "MAX_BATCH_ENTRIES",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_entry_bytes == Some(0) {
            return Err(ConfigError::Invalid {
                key: "MAX_ENTRY_BYTES",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Limit presets of known backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkProfile {
    #[default]
    Http,
    CloudWatch,
    Oci,
}

impl SinkProfile {
    pub fn limits(self) -> SinkLimits {
        match self {
            Self::Http => SinkLimits {
                max_batch_bytes: 5 * 1_024 * 1_024,
                max_batch_entries: Some(1_000),
                entry_overhead_bytes: 128,
                max_entry_bytes: Some(1_024 * 1_024),
            },
            // PutLogEvents: 1 MiB per call, 10,000 events, 26 bytes of
            // accounting per event plus our record framing, 256 KiB per event.
            Self::CloudWatch => SinkLimits {
                max_batch_bytes: 1_048_576,
                max_batch_entries: Some(10_000),
                entry_overhead_bytes: 50,
                max_entry_bytes: Some(262_094),
            },
            Self::Oci => SinkLimits {
                max_batch_bytes: 11 * 1_024 * 1_024,
                max_batch_entries: None,
                entry_overhead_bytes: 512,
                max_entry_bytes: None,
            },
        }
    }
}

impl FromStr for SinkProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "cloudwatch" => Ok(Self::CloudWatch),
            "oci" => Ok(Self::Oci),
            other => Err(ConfigError::Invalid {
                key: "SINK_PROFILE",
                reason: format!("unknown profile {other:?}, expected http, cloudwatch or oci"),
            }),
        }
    }
}
