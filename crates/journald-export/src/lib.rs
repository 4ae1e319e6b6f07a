// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streams systemd journal entries to a remote sink.
//!
//! The journal is read in its export format, normalized and queued by a
//! [`pipeline::Producer`]; a [`delivery::DeliveryLoop`] ships queued entries in
//! batches and records the position of the last delivered entry in a
//! [`checkpoint::CheckpointStore`] so a restart resumes after it.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod delivery;
pub mod entry;
pub mod errors;
pub mod export;
pub mod http_sink;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod source;
