// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer side of the pipeline: read, parse, normalize, queue.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::constants::DEFAULT_READ_BUFFER_BYTES;
use crate::entry::normalize;
use crate::errors::ExportError;
use crate::export::ExportParser;
use crate::queue::{BatchQueue, QueuedEntry};

pub struct Producer {
    queue: Arc<BatchQueue>,
    parser: ExportParser,
    entry_limit: usize,
    read_buffer_bytes: usize,
}

impl Producer {
    /// `entry_limit` is the envelope size entries are truncated to, usually
    /// [`crate::sink::SinkLimits::entry_limit`].
    pub fn new(queue: Arc<BatchQueue>, parser: ExportParser, entry_limit: usize) -> Self {
        Self {
            queue,
            parser,
            entry_limit,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }

    #[must_use]
    pub fn with_read_buffer_bytes(mut self, read_buffer_bytes: usize) -> Self {
        self.read_buffer_bytes = read_buffer_bytes.max(1);
        self
    }

    /// Queues every entry of `reader` and returns how many there were once it
    /// ends cleanly. Any malformed input is fatal.
    pub async fn run<R>(mut self, mut reader: R) -> Result<u64, ExportError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; self.read_buffer_bytes];
        let mut complete = Vec::new();
        let mut count = 0u64;
        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                self.parser.finish()?;
                info!("READER | Export stream ended after {count} entries");
                return Ok(count);
            }
            self.parser
                .push(&buffer[..read], |entry| complete.push(entry))?;
            if !complete.is_empty() {
                debug!("READER | Queueing {} entries", complete.len());
            }
            for raw in complete.drain(..) {
                let (position, entry) = normalize(raw)?;
                let queued = QueuedEntry::encode(position, entry, self.entry_limit)?;
                self.queue.append(queued).await;
                count += 1;
            }
        }
    }
}
