// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use journald_export::{
    checkpoint::CheckpointStore,
    config::Config,
    delivery::DeliveryLoop,
    errors::ExportError,
    export::ExportParser,
    http_sink::HttpSink,
    pipeline::Producer,
    queue::BatchQueue,
    source::{JournalctlSource, StreamSource},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("JOURNALD_EXPORTER_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Shutting down journald exporter: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the reader and the delivery loop as separate tasks until either of
/// them fails. Both are expected to run forever, so the reader finishing is an
/// error too.
async fn run() -> Result<(), ExportError> {
    let config = Config::from_env()?;

    let checkpoint: Option<Arc<dyn CheckpointStore>> = match config.checkpoint_store()? {
        Some(store) => {
            info!("Checkpointing to {}", store.path().display());
            Some(Arc::new(store))
        }
        None => {
            warn!("JOURNALD_EXPORTER_STATE_DIR is not set, every start reads the whole journal");
            None
        }
    };
    let after = match &checkpoint {
        Some(store) => store.load()?,
        None => None,
    };

    let queue = Arc::new(BatchQueue::new(config.queue_capacity));
    let sink = HttpSink::new(config.http_sink_config())?;
    let delivery = DeliveryLoop::new(Arc::clone(&queue), sink, checkpoint, config.limits)
        .with_backoff(config.backoff());

    let stream = JournalctlSource::new(config.journalctl.clone()).open(after.as_deref())?;
    let producer = Producer::new(
        queue,
        ExportParser::new(config.max_field_bytes),
        config.limits.entry_limit(),
    )
    .with_read_buffer_bytes(config.read_buffer_bytes);

    info!(
        "Exporting journal to {} with the {:?} sink profile",
        config.endpoint, config.sink_profile
    );

    let mut producer = tokio::spawn(producer.run(stream));
    let mut delivery = tokio::spawn(delivery.run());
    let result = tokio::select! {
        result = &mut producer => match result? {
            Ok(count) => Err(ExportError::SourceEnded(count)),
            Err(e) => Err(e),
        },
        result = &mut delivery => result?,
    };
    producer.abort();
    delivery.abort();
    result
}
