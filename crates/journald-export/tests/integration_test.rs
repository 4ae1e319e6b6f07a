// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use journald_export::checkpoint::{CheckpointStore, FileCheckpointStore};
use journald_export::config::Config;
use journald_export::delivery::{Cycle, DeliveryLoop};
use journald_export::export::ExportParser;
use journald_export::http_sink::{HttpSink, EXPECTED_SEQUENCE_TOKEN_HEADER, SEQUENCE_TOKEN_HEADER};
use journald_export::pipeline::Producer;
use journald_export::queue::BatchQueue;
use mockito::{Matcher, Server};

fn config(server: &Server, state_dir: &std::path::Path, extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        (
            "JOURNALD_EXPORTER_ENDPOINT".to_string(),
            format!("{}/ingest", server.url()),
        ),
        ("JOURNALD_EXPORTER_API_KEY".to_string(), "mock-api-key".to_string()),
        (
            "JOURNALD_EXPORTER_STATE_DIR".to_string(),
            state_dir.display().to_string(),
        ),
        ("JOURNALD_EXPORTER_REQUEST_TIMEOUT_SECS".to_string(), "5".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).expect("failed to build config")
}

async fn fill_queue(config: &Config, stream: &[u8]) -> Arc<BatchQueue> {
    let queue = Arc::new(BatchQueue::new(config.queue_capacity));
    Producer::new(
        Arc::clone(&queue),
        ExportParser::new(config.max_field_bytes),
        config.limits.entry_limit(),
    )
    .with_read_buffer_bytes(5)
    .run(stream)
    .await
    .expect("producer failed");
    queue
}

fn delivery_loop(
    config: &Config,
    queue: &Arc<BatchQueue>,
    store: &FileCheckpointStore,
) -> DeliveryLoop<HttpSink> {
    let sink = HttpSink::new(config.http_sink_config()).expect("failed to build sink");
    DeliveryLoop::new(
        Arc::clone(queue),
        sink,
        Some(Arc::new(store.clone()) as Arc<dyn CheckpointStore>),
        config.limits,
    )
    .with_backoff(config.backoff())
}

#[tokio::test]
async fn delivers_journal_in_batches_and_checkpoints() {
    let state_dir = tempfile::tempdir().expect("failed to create state dir");
    let mut server = Server::new_async().await;
    let failure = server
        .mock("POST", "/ingest")
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(1)
        .create_async()
        .await;
    let success = server
        .mock("POST", "/ingest")
        .match_header("authorization", "Bearer mock-api-key")
        .match_header("content-type", "application/json")
        .with_status(200)
        .expect(2)
        .create_async()
        .await;

    let config = config(
        &server,
        state_dir.path(),
        &[("JOURNALD_EXPORTER_MAX_BATCH_ENTRIES", "3")],
    );
    let store = config
        .checkpoint_store()
        .expect("invalid checkpoint config")
        .expect("checkpoint store not configured");
    assert_eq!(store.load().expect("failed to load checkpoint"), None);

    let queue = fill_queue(&config, &common::export_stream(1..=5)).await;
    assert_eq!(queue.len(), 5);
    let mut delivery = delivery_loop(&config, &queue, &store);

    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Failed);
    assert_eq!(delivery.delay(), Duration::from_secs(4));
    assert_eq!(queue.len(), 5);
    assert_eq!(store.load().expect("failed to load checkpoint"), None);

    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Delivered(3));
    assert_eq!(
        store.load().expect("failed to load checkpoint"),
        Some(common::cursor(3))
    );

    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Delivered(2));
    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Idle);
    assert_eq!(delivery.delay(), Duration::from_secs(2));
    assert!(queue.is_empty());

    failure.assert_async().await;
    success.assert_async().await;

    // A restart resumes after the last delivered entry.
    let restarted = FileCheckpointStore::new(state_dir.path(), None).expect("invalid state dir");
    assert_eq!(
        restarted.load().expect("failed to load checkpoint"),
        Some(common::cursor(5))
    );
}

#[tokio::test]
async fn unreachable_sink_keeps_everything_queued() {
    let state_dir = tempfile::tempdir().expect("failed to create state dir");
    let server = Server::new_async().await;
    let mut config = config(&server, state_dir.path(), &[]);
    config.endpoint = "http://127.0.0.1:1/ingest".to_string();
    let store = config
        .checkpoint_store()
        .expect("invalid checkpoint config")
        .expect("checkpoint store not configured");
    store.save(&common::cursor(1)).expect("failed to save checkpoint");

    let queue = fill_queue(&config, &common::export_stream(2..=4)).await;
    let mut delivery = delivery_loop(&config, &queue, &store);

    for expected in [4, 8, 16, 32, 60, 60] {
        assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Failed);
        assert_eq!(delivery.delay(), Duration::from_secs(expected));
    }

    assert_eq!(queue.len(), 3);
    assert_eq!(
        store.load().expect("failed to load checkpoint"),
        Some(common::cursor(1))
    );
}

#[tokio::test]
async fn sequence_token_rejection_is_retried_with_expected_token() {
    let state_dir = tempfile::tempdir().expect("failed to create state dir");
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/ingest")
        .match_header(SEQUENCE_TOKEN_HEADER, Matcher::Missing)
        .with_status(409)
        .with_header(EXPECTED_SEQUENCE_TOKEN_HEADER, "49590302")
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("POST", "/ingest")
        .match_header(SEQUENCE_TOKEN_HEADER, "49590302")
        .match_body(Matcher::Regex("message 1".to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = config(&server, state_dir.path(), &[]);
    let store = FileCheckpointStore::new(state_dir.path(), Some("web")).expect("invalid instance");
    let queue = fill_queue(&config, &common::export_stream(1..=1)).await;
    let mut delivery = delivery_loop(&config, &queue, &store);

    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Corrected);
    assert_eq!(delivery.delay(), Duration::from_secs(2));
    assert_eq!(delivery.tick().await.expect("fatal error"), Cycle::Delivered(1));

    rejected.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(
        std::fs::read_to_string(state_dir.path().join("after.web.cursor"))
            .expect("checkpoint not written"),
        common::cursor(1)
    );
}
