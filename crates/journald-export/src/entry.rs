// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of raw journal entries into the record forwarded to sinks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::{DEFAULT_PRIORITY, MAX_PRIORITY};
use crate::cursor::Cursor;
use crate::errors::{CursorError, NormalizeError};
use crate::export::RawEntry;

const REALTIME_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";
const CURSOR: &str = "__CURSOR";
const PRIORITY: &str = "PRIORITY";
const MESSAGE: &str = "MESSAGE";

/// Fields that are either carried elsewhere in the record or describe the
/// machine rather than the entry. Other address fields such as `__SEQNUM` are
/// forwarded.
const IGNORED_FIELDS: &[&str] = &[
    "__MONOTONIC_TIMESTAMP",
    "_BOOT_ID",
    "_HOSTNAME",
    "_MACHINE_ID",
    "_SOURCE_MONOTONIC_TIMESTAMP",
    "_SOURCE_REALTIME_TIMESTAMP",
];

/// A journal entry in the shape sent to sinks.
///
/// Serializes to the wire envelope `{"id", "field", "message", "priority"}`;
/// the timestamp travels next to it as record metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEntry {
    #[serde(skip)]
    pub timestamp: DateTime<Utc>,
    pub id: String,
    #[serde(rename = "field")]
    pub fields: BTreeMap<String, String>,
    pub message: String,
    pub priority: u8,
}

impl CanonicalEntry {
    /// The JSON wire envelope.
    pub fn to_envelope(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Encodes the envelope, shortening the message (then the longest field
    /// values) until it fits in `limit` bytes.
    ///
    /// Returns the envelope and whether anything was cut. If nothing is left to
    /// shorten the oversized envelope is returned as is.
    pub fn envelope_within(&mut self, limit: usize) -> serde_json::Result<(String, bool)> {
        let mut truncated = false;
        loop {
            let envelope = self.to_envelope()?;
            if envelope.len() <= limit {
                return Ok((envelope, truncated));
            }
            let excess = envelope.len() - limit;
            let target = if !self.message.is_empty() {
                &mut self.message
            } else {
                match self
                    .fields
                    .values_mut()
                    .filter(|value| !value.is_empty())
                    .max_by_key(|value| value.len())
                {
                    Some(value) => value,
                    None => return Ok((envelope, truncated)),
                }
            };
            truncate_from_end(target, excess);
            truncated = true;
        }
    }
}

/// Turns a raw entry into its position marker (the raw cursor) and canonical
/// form. Pure: no I/O.
pub fn normalize(mut raw: RawEntry) -> Result<(String, CanonicalEntry), NormalizeError> {
    let timestamp = raw
        .remove(REALTIME_TIMESTAMP)
        .ok_or(NormalizeError::MissingField(REALTIME_TIMESTAMP))?;
    let timestamp = parse_timestamp(&lossy(timestamp))?;

    let position = raw
        .remove(CURSOR)
        .ok_or(NormalizeError::MissingField(CURSOR))?;
    let position = String::from_utf8(position)
        .map_err(|e| CursorError::Malformed(String::from_utf8_lossy(e.as_bytes()).into_owned()))?;
    let id = Cursor::parse(&position)?.derive_id()?;

    let priority = match raw.remove(PRIORITY) {
        Some(value) => parse_priority(&lossy(value))?,
        None => DEFAULT_PRIORITY,
    };

    let message = raw.remove(MESSAGE).map(lossy).unwrap_or_default();

    raw.retain(|name, _| !IGNORED_FIELDS.contains(&name.as_str()));
    let fields = raw
        .into_iter()
        .map(|(name, value)| (name, lossy(value)))
        .collect();

    Ok((
        position,
        CanonicalEntry {
            timestamp,
            id,
            fields,
            message,
            priority,
        },
    ))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_micros)
        .ok_or_else(|| NormalizeError::InvalidTimestamp(raw.to_string()))
}

fn parse_priority(raw: &str) -> Result<u8, NormalizeError> {
    raw.parse::<u8>()
        .ok()
        .filter(|priority| *priority <= MAX_PRIORITY)
        .ok_or_else(|| NormalizeError::InvalidPriority(raw.to_string()))
}

fn lossy(value: Vec<u8>) -> String {
    String::from_utf8(value)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn truncate_from_end(value: &mut String, excess: usize) {
    let mut end = value.len().saturating_sub(excess);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}
