// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Journal cursor decoding and sortable id derivation.
//!
//! A cursor looks like
//! `s=<seqnum id>;i=<seqnum>;b=<boot id>;m=<monotonic>;t=<realtime>;x=<xor hash>`
//! with every value hex encoded. The 128-bit ids (`s`, `b`) are decoded as
//! bytes; the counters (`i`, `m`, `t`, `x`) are unpadded hex numbers and are
//! decoded as `u64`.
//!
//! The raw cursor is what the journal accepts back with `--after-cursor`, but
//! it does not sort in stream order, so entries get a separate id built from
//! the sequence number id followed by the sequence number as a fixed-width
//! big-endian integer. The alphabet below contains only URL-safe characters
//! laid out in ASCII order, so byte-wise comparison of two ids matches the
//! comparison of the bytes they encode.

use std::str::FromStr;

use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::Engine as _;

use crate::constants::SEQNUM_ID_LEN;
use crate::errors::CursorError;

#[allow(clippy::panic)]
const SORTABLE_ALPHABET: Alphabet =
    match Alphabet::new("-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("sortable base64 alphabet is invalid"),
    };

const SORTABLE_BASE64: GeneralPurpose = GeneralPurpose::new(&SORTABLE_ALPHABET, NO_PAD);

/// Decoded components of a journal cursor. Components absent from the cursor
/// are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub seqnum_id: Option<Vec<u8>>,
    pub seqnum: Option<u64>,
    pub boot_id: Option<Vec<u8>>,
    pub monotonic: Option<u64>,
    pub realtime: Option<u64>,
    pub xor_hash: Option<u64>,
}

impl Cursor {
    /// Parses a raw cursor string. Unknown keys are ignored.
    pub fn parse(raw: &str) -> Result<Self, CursorError> {
        let mut cursor = Cursor::default();
        for piece in raw.split(';').filter(|piece| !piece.is_empty()) {
            let (key, value) = piece
                .split_once('=')
                .ok_or_else(|| CursorError::Malformed(piece.to_string()))?;
            match key {
                "s" => cursor.seqnum_id = Some(decode_bytes(key, value)?),
                "i" => cursor.seqnum = Some(decode_number(key, value)?),
                "b" => cursor.boot_id = Some(decode_bytes(key, value)?),
                "m" => cursor.monotonic = Some(decode_number(key, value)?),
                "t" => cursor.realtime = Some(decode_number(key, value)?),
                "x" => cursor.xor_hash = Some(decode_number(key, value)?),
                _ => {}
            }
        }
        Ok(cursor)
    }

    /// Derives the sortable entry id: base64 of the sequence number id followed
    /// by the big-endian sequence number.
    pub fn derive_id(&self) -> Result<String, CursorError> {
        let seqnum_id = self
            .seqnum_id
            .as_deref()
            .ok_or(CursorError::MissingComponent("s"))?;
        if seqnum_id.len() != SEQNUM_ID_LEN {
            return Err(CursorError::SeqnumIdLength {
                expected: SEQNUM_ID_LEN,
                actual: seqnum_id.len(),
            });
        }
        let seqnum = self.seqnum.ok_or(CursorError::MissingComponent("i"))?;

        let mut raw = [0u8; SEQNUM_ID_LEN + 8];
        raw[..SEQNUM_ID_LEN].copy_from_slice(seqnum_id);
        raw[SEQNUM_ID_LEN..].copy_from_slice(&seqnum.to_be_bytes());
        Ok(SORTABLE_BASE64.encode(raw))
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

fn decode_bytes(key: &str, value: &str) -> Result<Vec<u8>, CursorError> {
    hex::decode(value).map_err(|_| invalid_hex(key, value))
}

fn decode_number(key: &str, value: &str) -> Result<u64, CursorError> {
    u64::from_str_radix(value, 16).map_err(|_| invalid_hex(key, value))
}

fn invalid_hex(key: &str, value: &str) -> CursorError {
    CursorError::InvalidHex {
        key: key.to_string(),
        value: value.to_string(),
    }
}
