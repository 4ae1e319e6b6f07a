// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Moves batches from the queue to the sink.
//!
//! Every cycle peeks the longest batch the sink accepts, sends it and, once
//! the sink acknowledges it, saves the checkpoint and only then drops the
//! batch from the queue. A crash in between re-delivers the batch on restart
//! instead of losing it. Sink failures keep the batch queued and double the
//! delay between cycles; they never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::checkpoint::CheckpointStore;
use crate::constants::{MAX_DELIVERY_DELAY, MIN_DELIVERY_DELAY};
use crate::errors::{ExportError, SinkError};
use crate::queue::BatchQueue;
use crate::sink::{Sink, SinkLimits};

/// Capped exponential delay between delivery cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Doubles the delay up to the cap and returns it.
    pub fn escalate(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(MIN_DELIVERY_DELAY, MAX_DELIVERY_DELAY)
    }
}

/// Outcome of a single delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Nothing was queued.
    Idle,
    /// The sink acknowledged this many entries.
    Delivered(usize),
    /// The sink asked for corrected state, which was adopted.
    Corrected,
    /// The sink failed and the delay was escalated.
    Failed,
}

pub struct DeliveryLoop<S> {
    queue: Arc<BatchQueue>,
    sink: S,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    limits: SinkLimits,
    backoff: Backoff,
}

impl<S: Sink> DeliveryLoop<S> {
    pub fn new(
        queue: Arc<BatchQueue>,
        sink: S,
        checkpoint: Option<Arc<dyn CheckpointStore>>,
        limits: SinkLimits,
    ) -> Self {
        Self {
            queue,
            sink,
            checkpoint,
            limits,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait before the next cycle.
    pub fn delay(&self) -> Duration {
        self.backoff.current()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs one cycle. Failing to save the checkpoint and a queue head that no
    /// batch can carry are errors.
    pub async fn tick(&mut self) -> Result<Cycle, ExportError> {
        let limits = self.limits;
        let batch = self.queue.peek_batch(
            limits.max_batch_entries,
            limits.max_batch_bytes,
            |entry| limits.size_of(entry),
        );
        let Some(last) = batch.last() else {
            if let Some(head) = self.queue.peek_batch(Some(1), usize::MAX, |_| 0).first() {
                return Err(ExportError::EntryTooLarge {
                    id: head.entry.id.clone(),
                    size: limits.size_of(head),
                    limit: limits.max_batch_bytes,
                });
            }
            self.backoff.reset();
            return Ok(Cycle::Idle);
        };

        match self.sink.send(&batch).await {
            Ok(()) => {
                if let Some(checkpoint) = &self.checkpoint {
                    // Off the runtime so the fsyncs do not stall the reader.
                    let checkpoint = Arc::clone(checkpoint);
                    let position = last.position.clone();
                    tokio::task::spawn_blocking(move || checkpoint.save(&position)).await??;
                }
                self.queue.commit(batch.len());
                self.backoff.reset();
                debug!(
                    "DELIVERY | Delivered {} entries, {} still queued",
                    batch.len(),
                    self.queue.len()
                );
                Ok(Cycle::Delivered(batch.len()))
            }
            Err(SinkError::InvalidSequenceToken { expected }) => {
                warn!("DELIVERY | Sink rejected the sequence token, retrying with {expected}");
                self.sink.adopt_sequence_token(expected);
                Ok(Cycle::Corrected)
            }
            Err(e) => {
                let delay = self.backoff.escalate();
                error!(
                    "DELIVERY | Failed to deliver {} entries, retrying in {}s: {e}",
                    batch.len(),
                    delay.as_secs_f64()
                );
                Ok(Cycle::Failed)
            }
        }
    }

    /// Runs cycles until a fatal error.
    ///
    /// A corrected batch is retried right away; a second correction in a row
    /// waits for the regular delay so a confused sink cannot spin the loop.
    pub async fn run(mut self) -> Result<(), ExportError> {
        let mut retry_now = false;
        loop {
            if !retry_now {
                tokio::time::sleep(self.delay()).await;
            }
            let cycle = self.tick().await?;
            retry_now = cycle == Cycle::Corrected && !retry_now;
        }
    }
}
