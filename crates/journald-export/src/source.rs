// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where the export stream comes from.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tracing::info;

/// Opens the journal export stream, resuming after `after` when given.
pub trait StreamSource {
    type Stream: AsyncRead + Unpin + Send;

    fn open(&self, after: Option<&str>) -> io::Result<Self::Stream>;
}

/// Follows the local journal with `journalctl --output=export`.
#[derive(Debug, Clone)]
pub struct JournalctlSource {
    program: String,
}

impl JournalctlSource {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(after: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "--follow".to_string(),
            // Without an explicit count journalctl starts at the last 10 entries.
            "--lines=2147483647".to_string(),
            "--no-pager".to_string(),
            "--output=export".to_string(),
        ];
        if let Some(cursor) = after {
            args.push(format!("--after-cursor={cursor}"));
        }
        args
    }
}

impl Default for JournalctlSource {
    fn default() -> Self {
        Self::new("journalctl")
    }
}

impl StreamSource for JournalctlSource {
    type Stream = JournalStream;

    fn open(&self, after: Option<&str>) -> io::Result<JournalStream> {
        let mut child = Command::new(&self.program)
            .args(Self::args(after))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("journalctl stdout is not piped"))?;
        match after {
            Some(cursor) => info!("READER | Following the journal after {cursor}"),
            None => info!("READER | Following the journal from the beginning"),
        }
        Ok(JournalStream {
            _child: child,
            stdout,
        })
    }
}

/// Stdout of the journal reader. Dropping it kills the process.
#[derive(Debug)]
pub struct JournalStream {
    _child: Child,
    stdout: ChildStdout,
}

impl AsyncRead for JournalStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}
