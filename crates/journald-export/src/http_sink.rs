// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sink that POSTs batches as JSON to an HTTP endpoint.
//!
//! The body is an array of records:
//! ```json
//! [{"id":"...","time":"2024-01-01T00:00:00.000000Z","data":{"id":"...","field":{},"message":"","priority":6}}]
//! ```
//! where `data` is the queued wire envelope. Endpoints that order writes with
//! sequence tokens hand out the next token in `X-Next-Sequence-Token` and
//! answer a stale one with `409 Conflict` and `X-Expected-Sequence-Token`.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use tracing::debug;
use zstd::stream::write::Encoder;

use crate::errors::SinkError;
use crate::queue::QueuedEntry;
use crate::sink::Sink;

pub const SEQUENCE_TOKEN_HEADER: &str = "X-Sequence-Token";
pub const NEXT_SEQUENCE_TOKEN_HEADER: &str = "X-Next-Sequence-Token";
pub const EXPECTED_SEQUENCE_TOKEN_HEADER: &str = "X-Expected-Sequence-Token";

#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    /// zstd level; `None` sends the body uncompressed.
    pub compression_level: Option<i32>,
}

pub struct HttpSink {
    client: reqwest::Client,
    config: HttpSinkConfig,
    sequence_token: Option<String>,
}

impl HttpSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            config,
            sequence_token: None,
        })
    }

    pub fn sequence_token(&self) -> Option<&str> {
        self.sequence_token.as_deref()
    }

    fn encode(&self, data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
        let mut encoder = Encoder::new(Vec::new(), level)?;
        encoder.write_all(data)?;
        encoder.finish()
    }

    async fn rejection(response: Response) -> SinkError {
        let status = response.status();
        if status == StatusCode::CONFLICT {
            if let Some(expected) = header(&response, EXPECTED_SEQUENCE_TOKEN_HEADER) {
                return SinkError::InvalidSequenceToken { expected };
            }
        }
        let body = response.text().await.unwrap_or_default();
        SinkError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&mut self, batch: &[Arc<QueuedEntry>]) -> Result<(), SinkError> {
        let mut body = build_body(batch);
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(CONTENT_TYPE, "application/json");
        if let Some(level) = self.config.compression_level {
            body = self
                .encode(&body, level)
                .map_err(|e| SinkError::Payload(e.to_string()))?;
            request = request.header(CONTENT_ENCODING, "zstd");
        }
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        if let Some(token) = &self.sequence_token {
            request = request.header(SEQUENCE_TOKEN_HEADER, token);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        if let Some(next) = header(&response, NEXT_SEQUENCE_TOKEN_HEADER) {
            self.sequence_token = Some(next);
        }
        debug!(
            "SINK | {} accepted {} entries",
            self.config.endpoint,
            batch.len()
        );
        Ok(())
    }

    fn adopt_sequence_token(&mut self, token: String) {
        self.sequence_token = Some(token);
    }
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Builds the JSON array body around the pre-encoded envelopes.
fn build_body(batch: &[Arc<QueuedEntry>]) -> Vec<u8> {
    let capacity = batch.iter().map(|e| e.payload.len() + 96).sum::<usize>() + 2;
    let mut body = String::with_capacity(capacity);
    body.push('[');
    for (i, queued) in batch.iter().enumerate() {
        if i > 0 {
            body.push(',');
        }
        // Ids only use URL-safe characters and need no escaping.
        body.push_str(r#"{"id":""#);
        body.push_str(&queued.entry.id);
        body.push_str(r#"","time":""#);
        body.push_str(
            &queued
                .entry
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        );
        body.push_str(r#"","data":"#);
        body.push_str(&queued.payload);
        body.push('}');
    }
    body.push(']');
    body.into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;
    use mockito::{Matcher, Server};
    use serde_json::json;

    use super::*;
    use crate::entry::CanonicalEntry;

    fn queued(id: &str, message: &str) -> Arc<QueuedEntry> {
        let entry = CanonicalEntry {
            timestamp: DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap(),
            id: id.to_string(),
            fields: [("UNIT".to_string(), "cron".to_string())].into(),
            message: message.to_string(),
            priority: 6,
        };
        Arc::new(QueuedEntry::encode(format!("cursor-{id}"), entry, 4_096).unwrap())
    }

    fn sink_for(server: &Server, api_key: Option<&str>, compression_level: Option<i32>) -> HttpSink {
        HttpSink::new(HttpSinkConfig {
            endpoint: format!("{}/logs", server.url()),
            api_key: api_key.map(str::to_string),
            timeout: Duration::from_secs(5),
            https_proxy: None,
            compression_level,
        })
        .unwrap()
    }

    #[test]
    fn test_body_is_array_of_records() {
        let body = build_body(&[queued("a", "first"), queued("b", "second")]);

        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            json!([
                {
                    "id": "a",
                    "time": "2023-11-14T22:13:20.123456Z",
                    "data": {"id": "a", "field": {"UNIT": "cron"}, "message": "first", "priority": 6}
                },
                {
                    "id": "b",
                    "time": "2023-11-14T22:13:20.123456Z",
                    "data": {"id": "b", "field": {"UNIT": "cron"}, "message": "second", "priority": 6}
                }
            ])
        );
    }

    #[test]
    fn test_record_framing_fits_http_overhead() {
        let entry = queued("--------------------------------", "");
        let body = build_body(&[entry.clone(), entry.clone()]);

        let framing = (body.len() - 2) / 2 + 1 - entry.payload.len();
        assert!(framing <= crate::sink::SinkProfile::Http.limits().entry_overhead_bytes);
    }

    #[tokio::test]
    async fn test_send_posts_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#"^\[\{"id":"a","time":"#.to_string()))
            .with_status(200)
            .create_async()
            .await;
        let mut sink = sink_for(&server, Some("secret"), None);

        sink.send(&[queued("a", "hello")]).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_compresses_with_zstd() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-encoding", "zstd")
            .with_status(202)
            .create_async()
            .await;
        let mut sink = sink_for(&server, None, Some(3));

        sink.send(&[queued("a", "hello")]).await.unwrap();

        mock.assert_async().await;
    }

    #[test]
    fn test_encode_round_trips() {
        let sink = HttpSink::new(HttpSinkConfig {
            endpoint: "http://localhost/logs".to_string(),
            api_key: None,
            timeout: Duration::from_secs(1),
            https_proxy: None,
            compression_level: Some(3),
        })
        .unwrap();
        let body = build_body(&[queued("a", &"hello ".repeat(100))]);

        let compressed = sink.encode(&body, 3).unwrap();

        assert!(compressed.len() < body.len());
        assert_eq!(zstd::decode_all(&compressed[..]).unwrap(), body);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable_status() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/logs")
            .with_status(503)
            .with_body("try later")
            .create_async()
            .await;
        let mut sink = sink_for(&server, None, None);

        let err = sink.send(&[queued("a", "hello")]).await.unwrap_err();

        assert!(matches!(err, SinkError::Status { status: 503, ref body } if body == "try later"));
        assert!(!err.is_corrective());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let mut sink = HttpSink::new(HttpSinkConfig {
            endpoint: "http://127.0.0.1:1/logs".to_string(),
            api_key: None,
            timeout: Duration::from_secs(1),
            https_proxy: None,
            compression_level: None,
        })
        .unwrap();

        let err = sink.send(&[queued("a", "hello")]).await.unwrap_err();

        assert!(matches!(err, SinkError::Transport(_)));
    }

    #[tokio::test]
    async fn test_sequence_tokens() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/logs")
            .match_header(SEQUENCE_TOKEN_HEADER, Matcher::Missing)
            .with_status(200)
            .with_header(NEXT_SEQUENCE_TOKEN_HEADER, "t1")
            .create_async()
            .await;
        let mut sink = sink_for(&server, None, None);

        sink.send(&[queued("a", "one")]).await.unwrap();
        first.assert_async().await;
        assert_eq!(sink.sequence_token(), Some("t1"));

        let stale = server
            .mock("POST", "/logs")
            .match_header(SEQUENCE_TOKEN_HEADER, "t1")
            .with_status(409)
            .with_header(EXPECTED_SEQUENCE_TOKEN_HEADER, "t7")
            .create_async()
            .await;
        let err = sink.send(&[queued("b", "two")]).await.unwrap_err();
        stale.assert_async().await;
        assert!(err.is_corrective());

        let SinkError::InvalidSequenceToken { expected } = err else {
            panic!("unexpected error {err:?}");
        };
        sink.adopt_sequence_token(expected);
        let retried = server
            .mock("POST", "/logs")
            .match_header(SEQUENCE_TOKEN_HEADER, "t7")
            .with_status(200)
            .create_async()
            .await;
        sink.send(&[queued("b", "two")]).await.unwrap();
        retried.assert_async().await;
    }

    #[tokio::test]
    async fn test_conflict_without_expected_token_is_plain_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/logs")
            .with_status(409)
            .create_async()
            .await;
        let mut sink = sink_for(&server, None, None);

        let err = sink.send(&[queued("a", "hello")]).await.unwrap_err();

        assert!(matches!(err, SinkError::Status { status: 409, .. }));
    }
}
