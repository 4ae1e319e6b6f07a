// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use journald_export::export::{encode_entries, RawEntry};

pub const SEQNUM_ID: &str = "6d0a7f3c2b1e4d5f8a9b0c1d2e3f4a5b";

pub fn cursor(seqnum: u64) -> String {
    format!("s={SEQNUM_ID};i={seqnum:x};b=0f1e2d3c4b5a69788796a5b4c3d2e1f0;m={seqnum:x};t=5f1e2d3c4b5a6;x=1")
}

/// A journal entry as `journalctl --output=export` would print it.
pub fn journal_entry(seqnum: u64, message: &[u8]) -> RawEntry {
    let mut entry = RawEntry::new();
    entry.insert("__CURSOR".to_string(), cursor(seqnum).into_bytes());
    entry.insert(
        "__REALTIME_TIMESTAMP".to_string(),
        (1_700_000_000_000_000 + seqnum).to_string().into_bytes(),
    );
    entry.insert("__MONOTONIC_TIMESTAMP".to_string(), b"123456".to_vec());
    entry.insert("_BOOT_ID".to_string(), b"0f1e2d3c4b5a69788796a5b4c3d2e1f0".to_vec());
    entry.insert("_HOSTNAME".to_string(), b"build-01".to_vec());
    entry.insert("PRIORITY".to_string(), b"6".to_vec());
    entry.insert("SYSLOG_IDENTIFIER".to_string(), b"cron".to_vec());
    entry.insert("MESSAGE".to_string(), message.to_vec());
    entry
}

pub fn export_stream(seqnums: std::ops::RangeInclusive<u64>) -> Vec<u8> {
    let entries: Vec<RawEntry> = seqnums
        .map(|seqnum| journal_entry(seqnum, format!("message {seqnum}").as_bytes()))
        .collect();
    encode_entries(&entries)
}
