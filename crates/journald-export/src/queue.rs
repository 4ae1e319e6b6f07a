// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The queue shared by the producer and the delivery loop.
//!
//! Entries are appended at the tail and only ever leave as a prefix, after the
//! sink has acknowledged them. Readers get `Arc`s to the queued entries so the
//! lock is never held while a batch is in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::entry::CanonicalEntry;
use crate::errors::ExportError;

/// A normalized entry waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEntry {
    /// Raw journal cursor, saved as the checkpoint once the entry is delivered.
    pub position: String,
    pub entry: CanonicalEntry,
    /// The encoded wire envelope, possibly truncated to the sink's entry limit.
    pub payload: String,
}

impl QueuedEntry {
    /// Encodes `entry` once, truncating it to `max_entry_bytes` of envelope.
    ///
    /// An entry whose field names alone exceed the limit could never be
    /// delivered and is an error.
    pub fn encode(
        position: String,
        mut entry: CanonicalEntry,
        max_entry_bytes: usize,
    ) -> Result<Self, ExportError> {
        let (payload, truncated) = entry.envelope_within(max_entry_bytes)?;
        if payload.len() > max_entry_bytes {
            return Err(ExportError::EntryTooLarge {
                id: entry.id,
                size: payload.len(),
                limit: max_entry_bytes,
            });
        }
        if truncated {
            warn!(
                "Entry {} truncated to {} bytes to fit the sink's entry limit",
                entry.id,
                payload.len()
            );
        }
        Ok(Self {
            position,
            entry,
            payload,
        })
    }
}

/// Bounded FIFO with atomic peek and commit.
pub struct BatchQueue<T = QueuedEntry> {
    entries: Mutex<VecDeque<Arc<T>>>,
    capacity: usize,
    space: Notify,
}

impl<T> BatchQueue<T> {
    /// Creates a queue holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            space: Notify::new(),
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<T>>> {
        self.entries.lock().expect("lock poisoned")
    }

    /// Appends at the tail, waiting for a commit while the queue is full.
    pub async fn append(&self, entry: T) {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            // Register before checking so a commit in between is not missed.
            notified.as_mut().enable();
            {
                let mut entries = self.lock();
                if entries.len() < self.capacity {
                    entries.push_back(Arc::new(entry));
                    return;
                }
            }
            debug!("Queue is full ({} entries), waiting for delivery", self.capacity);
            notified.await;
        }
    }

    /// Returns the longest prefix whose count stays within `max_count` (when
    /// set) and whose summed `size_of` stays within `max_bytes`. Nothing is
    /// removed.
    pub fn peek_batch<F>(&self, max_count: Option<usize>, max_bytes: usize, size_of: F) -> Vec<Arc<T>>
    where
        F: Fn(&T) -> usize,
    {
        let entries = self.lock();
        let max_count = max_count.unwrap_or(usize::MAX);
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        for entry in entries.iter() {
            if batch.len() >= max_count {
                break;
            }
            let size = size_of(entry);
            if bytes.saturating_add(size) > max_bytes {
                break;
            }
            bytes += size;
            batch.push(Arc::clone(entry));
        }
        batch
    }

    /// Drops the first `n` entries and wakes a producer waiting for space.
    pub fn commit(&self, n: usize) {
        {
            let mut entries = self.lock();
            let n = n.min(entries.len());
            entries.drain(..n);
        }
        self.space.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
