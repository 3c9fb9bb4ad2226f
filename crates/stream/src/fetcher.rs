//! One-shot bulk retrieval of recent logs and container metrics.
//!
//! Unlike the streaming frame reader, which skips undecodable frames and
//! keeps going, this path stops scanning at the first undecodable
//! multipart part and returns the cleanly parsed prefix with no error —
//! a bounded fetch favors returning what was good over availability.

use std::sync::OnceLock;

use prost::Message as _;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header;
use url::Url;

use strato_types::{ContainerMetric, Envelope, LogMessage};

use crate::consumer::Consumer;
use crate::error::ConsumerError;

impl Consumer {
    /// Fetch an app's buffered recent log messages.
    ///
    /// Order is whatever the server returned; see [`sort_recent_logs`].
    pub async fn recent_logs(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> Result<Vec<LogMessage>, ConsumerError> {
        let envelopes = self.read_envelopes(app_id, auth_token, "recentlogs").await?;
        Ok(envelopes.into_iter().filter_map(|e| e.log_message).collect())
    }

    /// Fetch the latest container metrics for an app, sorted by
    /// instance index.
    pub async fn container_metrics(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> Result<Vec<ContainerMetric>, ConsumerError> {
        let envelopes = self.read_envelopes(app_id, auth_token, "containermetrics").await?;

        let mut metrics = Vec::new();
        for envelope in envelopes {
            if envelope.is_log_message() {
                let message = envelope
                    .log_message
                    .map(|log| log.message_text())
                    .unwrap_or_default();
                return Err(ConsumerError::Upstream { message });
            }
            if let Some(metric) = envelope.container_metric {
                metrics.push(metric);
            }
        }
        sort_container_metrics(&mut metrics);
        Ok(metrics)
    }

    async fn read_envelopes(
        &self,
        app_id: &str,
        auth_token: &str,
        endpoint_path: &str,
    ) -> Result<Vec<Envelope>, ConsumerError> {
        let url = self.bulk_url(app_id, endpoint_path)?;
        let response = self
            .http()
            .get(url)
            .header(header::AUTHORIZATION, auth_token)
            .send()
            .await
            .map_err(|e| ConsumerError::Dial {
                endpoint: self.endpoint().to_string(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            return Err(ConsumerError::Unauthorized { message });
        }
        if status == StatusCode::BAD_REQUEST {
            return Err(ConsumerError::BadRequest);
        }
        if status != StatusCode::OK {
            return Err(ConsumerError::NotOk { status: status.as_u16() });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let boundary = multipart_boundary(&content_type).ok_or(ConsumerError::BadResponse)?;

        let body = response.bytes().await.map_err(|e| ConsumerError::Dial {
            endpoint: self.endpoint().to_string(),
            detail: e.to_string(),
        })?;
        Ok(decode_parts(&body, &boundary))
    }

    /// The bulk endpoints speak plain HTTP: `ws` maps to `http` and
    /// `wss` to `https` for this path only.
    fn bulk_url(&self, app_id: &str, endpoint_path: &str) -> Result<Url, ConsumerError> {
        let scheme = if self.endpoint().scheme() == "ws" { "http" } else { "https" };
        let mut url = self.endpoint().clone();
        url.set_scheme(scheme).map_err(|()| ConsumerError::InvalidEndpoint {
            url: self.endpoint().to_string(),
            detail: "endpoint scheme cannot be mapped to http(s)".into(),
        })?;
        url.set_path(&format!("/apps/{app_id}/{endpoint_path}"));
        Ok(url)
    }
}

/// Sort log messages by timestamp, oldest first.
pub fn sort_recent_logs(messages: &mut [LogMessage]) {
    messages.sort_by_key(|m| m.timestamp);
}

/// Sort container metrics by instance index.
pub fn sort_container_metrics(metrics: &mut [ContainerMetric]) {
    metrics.sort_by_key(|m| m.instance_index);
}

/// Extract the multipart boundary from a Content-Type header value.
///
/// Missing content type, absent boundary parameter, and a blank
/// `boundary=` all yield `None`.
fn multipart_boundary(content_type: &str) -> Option<String> {
    if content_type.trim().is_empty() {
        return None;
    }
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let pattern = BOUNDARY.get_or_init(|| Regex::new("boundary=(.*)").expect("static regex"));
    let boundary = pattern.captures(content_type)?.get(1)?.as_str().trim().trim_matches('"');
    if boundary.is_empty() {
        None
    } else {
        Some(boundary.to_string())
    }
}

/// Decode part payloads until the first undecodable one; the cleanly
/// parsed prefix is the result, not an error.
fn decode_parts(body: &[u8], boundary: &str) -> Vec<Envelope> {
    let mut envelopes = Vec::new();
    for part in split_parts(body, boundary) {
        match Envelope::decode(part) {
            Ok(envelope) => envelopes.push(envelope),
            Err(_) => break,
        }
    }
    envelopes
}

/// Split a multipart body into raw part payloads.
fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut starts = Vec::new();
    let mut offset = 0;
    while let Some(position) = find(&body[offset..], delimiter) {
        starts.push(offset + position);
        offset += position + delimiter.len();
    }

    let mut parts = Vec::new();
    for window in starts.windows(2) {
        let segment = &body[window[0] + delimiter.len()..window[1]];
        // The closing marker reads as a segment starting with "--".
        if segment.starts_with(b"--") {
            continue;
        }
        if let Some(payload) = part_payload(segment) {
            parts.push(payload);
        }
    }
    parts
}

/// The payload of one part: everything after the header block's blank
/// line, minus the trailing CRLF that precedes the next boundary.
fn part_payload(segment: &[u8]) -> Option<&[u8]> {
    let start = find(segment, b"\r\n\r\n")? + 4;
    let mut payload = &segment[start..];
    if payload.ends_with(b"\r\n") {
        payload = &payload[..payload.len() - 2];
    }
    Some(payload)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use strato_types::{EventType, LogMessageType};

    fn log_envelope(text: &str, timestamp: i64) -> Envelope {
        Envelope {
            origin: "rep".into(),
            event_type: EventType::LogMessage as i32,
            log_message: Some(LogMessage {
                message: text.as_bytes().to_vec(),
                message_type: LogMessageType::Out as i32,
                timestamp,
                app_id: "app-1".into(),
                source_type: "APP".into(),
                source_instance: "0".into(),
            }),
            error: None,
            container_metric: None,
        }
    }

    fn metric_envelope(instance_index: i32) -> Envelope {
        Envelope {
            origin: "rep".into(),
            event_type: EventType::ContainerMetric as i32,
            log_message: None,
            error: None,
            container_metric: Some(ContainerMetric {
                application_id: "app-1".into(),
                instance_index,
                cpu_percentage: 0.5,
                memory_bytes: 64,
                disk_bytes: 128,
            }),
        }
    }

    fn multipart_body(boundary: &str, parts: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{boundary}\r\n\r\n").as_bytes());
            body.extend_from_slice(part);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        body
    }

    fn consumer_for(server: &MockServer) -> Consumer {
        Consumer::new(&format!("ws://{}", server.address())).unwrap()
    }

    #[tokio::test]
    async fn recent_logs_parses_multipart_parts() {
        let server = MockServer::start_async().await;
        let body = multipart_body(
            "stream-boundary",
            &[
                log_envelope("first", 2).encode_to_vec(),
                log_envelope("second", 1).encode_to_vec(),
            ],
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/recentlogs");
                then.status(200)
                    .header("Content-Type", "multipart/x-protobuf; boundary=stream-boundary")
                    .body(body);
            })
            .await;

        let consumer = consumer_for(&server);
        let mut logs = consumer.recent_logs("app-1", "bearer tok").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message_text(), "first");

        sort_recent_logs(&mut logs);
        assert_eq!(logs[0].message_text(), "second", "sorted by timestamp");
    }

    #[tokio::test]
    async fn bad_part_stops_the_scan_and_keeps_the_prefix() {
        let server = MockServer::start_async().await;
        let body = multipart_body(
            "b",
            &[
                log_envelope("kept", 1).encode_to_vec(),
                b"\xff\xff\xff\xff not an envelope".to_vec(),
                log_envelope("lost", 2).encode_to_vec(),
            ],
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/recentlogs");
                then.status(200)
                    .header("Content-Type", "multipart/x-protobuf; boundary=b")
                    .body(body);
            })
            .await;

        let consumer = consumer_for(&server);
        let logs = consumer.recent_logs("app-1", "tok").await.unwrap();
        assert_eq!(logs.len(), 1, "scan stops at the bad part, prefix survives");
        assert_eq!(logs[0].message_text(), "kept");
    }

    #[tokio::test]
    async fn unauthorized_carries_server_body_verbatim() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/recentlogs");
                then.status(401).body("Invalid authorization");
            })
            .await;

        let consumer = consumer_for(&server);
        let err = consumer.recent_logs("app-1", "tok").await.unwrap_err();
        match err {
            ConsumerError::Unauthorized { message } => assert_eq!(message, "Invalid authorization"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn bad_request_and_not_ok_classification() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/bad/recentlogs");
                then.status(400);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/missing/recentlogs");
                then.status(404);
            })
            .await;

        let consumer = consumer_for(&server);
        assert!(matches!(
            consumer.recent_logs("bad", "tok").await.unwrap_err(),
            ConsumerError::BadRequest
        ));
        assert!(matches!(
            consumer.recent_logs("missing", "tok").await.unwrap_err(),
            ConsumerError::NotOk { status: 404 }
        ));
    }

    #[tokio::test]
    async fn missing_content_type_is_bad_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/recentlogs");
                then.status(200).body("data");
            })
            .await;

        let consumer = consumer_for(&server);
        let err = consumer.recent_logs("app-1", "tok").await.unwrap_err();
        assert!(matches!(err, ConsumerError::BadResponse));
    }

    #[tokio::test]
    async fn missing_and_blank_boundaries_are_bad_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/no-boundary/recentlogs");
                then.status(200).header("Content-Type", "multipart/x-protobuf").body("x");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/blank-boundary/recentlogs");
                then.status(200)
                    .header("Content-Type", "multipart/x-protobuf; boundary=")
                    .body("x");
            })
            .await;

        let consumer = consumer_for(&server);
        assert!(matches!(
            consumer.recent_logs("no-boundary", "tok").await.unwrap_err(),
            ConsumerError::BadResponse
        ));
        assert!(matches!(
            consumer.recent_logs("blank-boundary", "tok").await.unwrap_err(),
            ConsumerError::BadResponse
        ));
    }

    #[tokio::test]
    async fn container_metrics_sorted_by_instance_index() {
        let server = MockServer::start_async().await;
        let body = multipart_body(
            "b",
            &[metric_envelope(2).encode_to_vec(), metric_envelope(0).encode_to_vec()],
        );
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/containermetrics");
                then.status(200)
                    .header("Content-Type", "multipart/x-protobuf; boundary=b")
                    .body(body);
            })
            .await;

        let consumer = consumer_for(&server);
        let metrics = consumer.container_metrics("app-1", "tok").await.unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].instance_index, 0);
        assert_eq!(metrics[1].instance_index, 2);
    }

    #[tokio::test]
    async fn container_metrics_surface_upstream_log_as_error() {
        let server = MockServer::start_async().await;
        let body = multipart_body("b", &[log_envelope("metrics relay unavailable", 1).encode_to_vec()]);
        server
            .mock_async(|when, then| {
                when.method(GET).path("/apps/app-1/containermetrics");
                then.status(200)
                    .header("Content-Type", "multipart/x-protobuf; boundary=b")
                    .body(body);
            })
            .await;

        let consumer = consumer_for(&server);
        let err = consumer.container_metrics("app-1", "tok").await.unwrap_err();
        match err {
            ConsumerError::Upstream { message } => assert_eq!(message, "metrics relay unavailable"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn boundary_extraction_rules() {
        assert_eq!(multipart_boundary(""), None);
        assert_eq!(multipart_boundary("   "), None);
        assert_eq!(multipart_boundary("multipart/x-protobuf"), None);
        assert_eq!(multipart_boundary("multipart/x-protobuf; boundary="), None);
        assert_eq!(
            multipart_boundary("multipart/x-protobuf; boundary=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            multipart_boundary("multipart/mixed; boundary=\"quoted\"").as_deref(),
            Some("quoted")
        );
    }

    #[test]
    fn split_parts_handles_empty_and_malformed_bodies() {
        assert!(split_parts(b"", "b").is_empty());
        assert!(split_parts(b"no delimiters here", "b").is_empty());

        let body = multipart_body("b", &[b"one".to_vec(), b"two".to_vec()]);
        let parts = split_parts(&body, "b");
        assert_eq!(parts, vec![&b"one"[..], &b"two"[..]]);
    }
}
