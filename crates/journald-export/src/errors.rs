// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the exporter.
//!
//! Errors fall into two groups. [`SinkError`] is retryable: the delivery loop
//! contains it and keeps the batch queued. Everything that converts into
//! [`ExportError`] is fatal: the stream can no longer be trusted, or a local
//! invariant was broken, and the process should stop so that its supervisor
//! restarts it from the last durable checkpoint.

use std::path::PathBuf;

/// Violations of the journal export format.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid field name {name:?}: {reason}")]
    InvalidFieldName { name: String, reason: &'static str },

    #[error("field {field:?} is {length} bytes, over the {limit} byte limit")]
    FieldTooLarge {
        field: String,
        length: u64,
        limit: usize,
    },

    #[error("binary field {field:?} is followed by byte {found:#04x} instead of a newline")]
    MissingBinaryTerminator { field: String, found: u8 },

    #[error("stream ended in the middle of an entry")]
    TruncatedStream,
}

/// Problems decoding a journal cursor or deriving an id from it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor component {0:?} is not a key=value pair")]
    Malformed(String),

    #[error("cursor component {key}={value:?} is not valid hex")]
    InvalidHex { key: String, value: String },

    #[error("cursor has no {0} component")]
    MissingComponent(&'static str),

    #[error("sequence number id is {actual} bytes, expected {expected}")]
    SeqnumIdLength { expected: usize, actual: usize },
}

/// Problems turning a raw entry into a canonical one.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("entry has no {0} field")]
    MissingField(&'static str),

    #[error("invalid realtime timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid priority {0:?}")]
    InvalidPriority(String),

    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// Failures reported by a sink. All of them are retryable.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The sink answered with a non-success status.
    #[error("{status}: {body}")]
    Status { status: u16, body: String },

    /// The request body could not be prepared.
    #[error("failed to prepare payload: {0}")]
    Payload(String),

    /// The sink rejected a stale sequence token and told us the one it expects.
    /// The batch can be retried immediately once the token is adopted.
    #[error("invalid sequence token, sink expects {expected:?}")]
    InvalidSequenceToken { expected: String },
}

impl SinkError {
    /// Whether the error carries state that makes an immediate retry useful.
    pub fn is_corrective(&self) -> bool {
        matches!(self, Self::InvalidSequenceToken { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Unrecoverable errors. Any of these terminates the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export stream format violation: {0}")]
    Parse(#[from] ParseError),

    #[error("malformed journal entry: {0}")]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read export stream: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("entry {id} is {size} bytes and cannot be truncated below the {limit} byte entry limit")]
    EntryTooLarge { id: String, size: usize, limit: usize },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("journal reader exited after {0} entries")]
    SourceEnded(u64),
}
