// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and fixed limits of the exporter.
//!
//! Sink ceilings live in [`crate::sink::SinkProfile`]; the values here are the
//! ones the core owns.

use std::time::Duration;

/// Delay between delivery cycles while things are healthy.
///
/// Kept short so that a burst of new entries is picked up quickly after an
/// idle period. Sink failures double it up to [`MAX_DELIVERY_DELAY`].
pub const MIN_DELIVERY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound of the delivery backoff.
///
/// A longer cap would let the backlog grow too far when the journal is busy.
pub const MAX_DELIVERY_DELAY: Duration = Duration::from_secs(60);

/// Maximum number of entries buffered between the reader and the sink.
///
/// # Value: 100,000 entries
///
/// When the queue is full the producer waits for the delivery loop to commit
/// a batch. Nothing is evicted, so the journal reader is throttled through its
/// pipe instead of the process growing without bound during a sink outage.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Size of the buffer used to read the export stream.
pub const DEFAULT_READ_BUFFER_BYTES: usize = 64 * 1_024;

/// Largest single field accepted from the export stream.
///
/// # Value: 64MB
///
/// A binary length prefix beyond this is treated as a corrupt stream rather
/// than an allocation request.
pub const DEFAULT_MAX_FIELD_BYTES: usize = 64 * 1_024 * 1_024;

/// Length in bytes of the sequence number id in a journal cursor (a 128-bit id).
pub const SEQNUM_ID_LEN: usize = 16;

/// Syslog priority used when an entry carries no `PRIORITY` field ("error").
pub const DEFAULT_PRIORITY: u8 = 3;

/// Highest valid syslog priority ("debug").
pub const MAX_PRIORITY: u8 = 7;

/// Checkpoint file name inside the state directory when no instance id is set.
pub const CHECKPOINT_FILE_NAME: &str = "after.cursor";

/// Timeout of a single request to the HTTP sink.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of every configuration environment variable.
pub const ENV_PREFIX: &str = "JOURNALD_EXPORTER_";
