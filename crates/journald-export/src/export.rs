// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Incremental parser for the journal export format.
//!
//! An entry is a sequence of fields terminated by an empty line. Each field is
//! either
//!
//! ```text
//! NAME=value without newlines\n
//! ```
//!
//! or, for values that may contain anything,
//!
//! ```text
//! NAME\n<u64 little-endian length><length bytes>\n
//! ```
//!
//! Bytes arrive in chunks of arbitrary size, and any boundary (inside a name,
//! inside the length prefix, inside a value) may fall anywhere. The parser
//! consumes whatever can be resolved from a chunk and buffers only the field
//! that is still in flight, so memory is bounded by the largest single field.

use std::collections::BTreeMap;

use crate::constants::DEFAULT_MAX_FIELD_BYTES;
use crate::errors::ParseError;

/// Field name to raw value for one journal entry.
pub type RawEntry = BTreeMap<String, Vec<u8>>;

const BINARY_LENGTH_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingFieldName,
    AwaitingBinaryLength,
    AwaitingValue(ValueKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    /// Terminated by the next newline.
    Text,
    /// Exactly this many bytes, then a mandatory newline.
    Binary(usize),
}

#[derive(Debug)]
pub struct ExportParser {
    state: State,
    /// Bytes of the name, length prefix or value currently being read.
    pending: Vec<u8>,
    field_name: String,
    entry: RawEntry,
    max_field_bytes: usize,
}

impl Default for ExportParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_BYTES)
    }
}

impl ExportParser {
    /// Creates a parser that rejects any single name or value longer than
    /// `max_field_bytes`.
    pub fn new(max_field_bytes: usize) -> Self {
        ExportParser {
            state: State::AwaitingFieldName,
            pending: Vec::new(),
            field_name: String::new(),
            entry: RawEntry::new(),
            max_field_bytes,
        }
    }

    /// Feeds the next chunk of the stream, calling `on_entry` for every entry
    /// completed by it, in stream order.
    ///
    /// Any error is fatal: the stream is out of sync and the parser must not be
    /// fed again.
    pub fn push<F>(&mut self, chunk: &[u8], mut on_entry: F) -> Result<(), ParseError>
    where
        F: FnMut(RawEntry),
    {
        let mut rest = chunk;
        while !rest.is_empty() {
            rest = match self.state {
                State::AwaitingFieldName => self.read_field_name(rest, &mut on_entry)?,
                State::AwaitingBinaryLength => self.read_binary_length(rest)?,
                State::AwaitingValue(ValueKind::Text) => self.read_text_value(rest)?,
                State::AwaitingValue(ValueKind::Binary(length)) => {
                    self.read_binary_value(rest, length)?
                }
            };
        }
        Ok(())
    }

    /// Checks that the stream stopped on an entry boundary.
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.is_idle() {
            Ok(())
        } else {
            Err(ParseError::TruncatedStream)
        }
    }

    /// True when no entry is partially read.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingFieldName && self.pending.is_empty() && self.entry.is_empty()
    }

    fn read_field_name<'a, F>(
        &mut self,
        chunk: &'a [u8],
        on_entry: &mut F,
    ) -> Result<&'a [u8], ParseError>
    where
        F: FnMut(RawEntry),
    {
        let Some(pos) = chunk.iter().position(|b| *b == b'=' || *b == b'\n') else {
            // Still in name.
            self.buffer(chunk)?;
            return Ok(&[]);
        };

        if pos == 0 && chunk[0] == b'\n' && self.pending.is_empty() {
            // Empty line: entry ended.
            on_entry(std::mem::take(&mut self.entry));
            return Ok(&chunk[1..]);
        }

        self.buffer(&chunk[..pos])?;
        self.field_name = self.take_field_name()?;
        self.state = if chunk[pos] == b'=' {
            State::AwaitingValue(ValueKind::Text)
        } else {
            State::AwaitingBinaryLength
        };
        Ok(&chunk[pos + 1..])
    }

    fn read_binary_length<'a>(&mut self, chunk: &'a [u8]) -> Result<&'a [u8], ParseError> {
        let wanted = BINARY_LENGTH_BYTES - self.pending.len();
        let (head, rest) = chunk.split_at(wanted.min(chunk.len()));
        self.pending.extend_from_slice(head);
        if self.pending.len() < BINARY_LENGTH_BYTES {
            return Ok(rest);
        }

        let mut raw = [0u8; BINARY_LENGTH_BYTES];
        raw.copy_from_slice(&self.pending);
        self.pending.clear();

        let length = u64::from_le_bytes(raw);
        let length = usize::try_from(length)
            .ok()
            .filter(|length| *length <= self.max_field_bytes)
            .ok_or_else(|| ParseError::FieldTooLarge {
                field: self.field_name.clone(),
                length,
                limit: self.max_field_bytes,
            })?;

        // Payload plus the trailing newline.
        self.pending.reserve(length + 1);
        self.state = State::AwaitingValue(ValueKind::Binary(length));
        Ok(rest)
    }

    fn read_text_value<'a>(&mut self, chunk: &'a [u8]) -> Result<&'a [u8], ParseError> {
        let Some(pos) = chunk.iter().position(|b| *b == b'\n') else {
            self.buffer(chunk)?;
            return Ok(&[]);
        };
        self.buffer(&chunk[..pos])?;
        let value = std::mem::take(&mut self.pending);
        self.complete_field(value);
        Ok(&chunk[pos + 1..])
    }

    fn read_binary_value<'a>(
        &mut self,
        chunk: &'a [u8],
        length: usize,
    ) -> Result<&'a [u8], ParseError> {
        let wanted = length + 1 - self.pending.len();
        let (head, rest) = chunk.split_at(wanted.min(chunk.len()));
        self.pending.extend_from_slice(head);
        if self.pending.len() <= length {
            return Ok(rest);
        }

        let mut value = std::mem::take(&mut self.pending);
        match value.pop() {
            Some(b'\n') => {}
            found => {
                return Err(ParseError::MissingBinaryTerminator {
                    field: self.field_name.clone(),
                    found: found.unwrap_or_default(),
                })
            }
        }
        self.complete_field(value);
        Ok(rest)
    }

    fn complete_field(&mut self, value: Vec<u8>) {
        let name = std::mem::take(&mut self.field_name);
        self.entry.insert(name, value);
        self.state = State::AwaitingFieldName;
    }

    fn take_field_name(&mut self) -> Result<String, ParseError> {
        let raw = std::mem::take(&mut self.pending);
        if raw.is_empty() {
            return Err(ParseError::InvalidFieldName {
                name: String::new(),
                reason: "empty name",
            });
        }
        String::from_utf8(raw).map_err(|e| ParseError::InvalidFieldName {
            name: String::from_utf8_lossy(e.as_bytes()).into_owned(),
            reason: "not valid UTF-8",
        })
    }

    /// Appends to the in-flight field, enforcing the size limit.
    fn buffer(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        let length = self.pending.len() + bytes.len();
        if length > self.max_field_bytes {
            let field = if self.state == State::AwaitingFieldName {
                String::from_utf8_lossy(&self.pending).into_owned()
            } else {
                self.field_name.clone()
            };
            return Err(ParseError::FieldTooLarge {
                field,
                length: length as u64,
                limit: self.max_field_bytes,
            });
        }
        self.pending.extend_from_slice(bytes);
        Ok(())
    }
}

/// Serializes entries in the export format. Values containing a newline are
/// written in the binary form, everything else as text.
pub fn encode_entries<'a, I>(entries: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a RawEntry>,
{
    let mut out = Vec::new();
    for entry in entries {
        for (name, value) in entry {
            out.extend_from_slice(name.as_bytes());
            if value.contains(&b'\n') {
                encode_binary_value(&mut out, value);
            } else {
                out.push(b'=');
                out.extend_from_slice(value);
                out.push(b'\n');
            }
        }
        out.push(b'\n');
    }
    out
}

/// Writes the binary form of a field value (the name must already be written).
pub fn encode_binary_value(out: &mut Vec<u8>, value: &[u8]) {
    out.push(b'\n');
    out.extend_from_slice(&(value.len() as u64).to_le_bytes());
    out.extend_from_slice(value);
    out.push(b'\n');
}
