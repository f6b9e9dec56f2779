use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};

use taskmesh_core::api::{EventFeed, EventRecord, EventStream};

use crate::http_client::{build_client, preview_body, send, HttpError};

use super::opencode::OpencodeEventParser;

/// Incremental server-sent-events decoder.
///
/// Bytes go in as they arrive; complete `data` payloads come out once their
/// terminating blank line has been seen. Multi-line data fields are joined
/// with `\n`. Other fields and comments are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data_lines.is_empty() {
                    out.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        out
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let mut tail = std::mem::take(&mut self.buffer);
            tail.push(b'\n');
            let mut flushed = self.push(&tail);
            if let Some(data) = flushed.pop() {
                return Some(data);
            }
        }
        if self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(data)
    }
}

/// Process-wide opencode event subscription (`GET {base}/event`).
pub struct SseEventFeed {
    http: reqwest::Client,
    url: String,
}

impl SseEventFeed {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            anyhow::bail!("event feed requires a base url");
        }
        Ok(Self {
            // The subscription lives for the whole run; no request timeout.
            http: build_client(0)?,
            url: format!("{}/event", base_url),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventFeed for SseEventFeed {
    fn name(&self) -> &str {
        "opencode-sse"
    }

    async fn subscribe(self: Box<Self>) -> anyhow::Result<EventStream> {
        let url = self.url.clone();
        let req = self
            .http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let resp = send(req, &url).await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HttpError::status_error(status.as_u16(), url, preview_body(&body)).into());
        }
        tracing::info!(url = %url, "subscribed to event feed");

        let mut bytes = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut parser = OpencodeEventParser::new();

            while let Some(chunk) = bytes.next().await {
                let chunk: Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let err = HttpError::from_reqwest(err, url.clone());
                        tracing::warn!(
                            url = %url,
                            kind = %err.kind(),
                            transient = err.is_transient(),
                            "event stream broke off"
                        );
                        let item: anyhow::Result<EventRecord> = Err(err.into());
                        yield item;
                        return;
                    }
                };
                for data in decoder.push(&chunk) {
                    if let Some(ev) = parser.parse_data(&data) {
                        let item: anyhow::Result<EventRecord> = Ok(ev);
                        yield item;
                    }
                }
            }

            if let Some(ev) = decoder.finish().and_then(|data| parser.parse_data(&data)) {
                yield Ok(ev);
            }
            tracing::debug!(url = %url, "event feed ended");
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use taskmesh_core::api::EventKind;

    #[test]
    fn decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\n"), vec![r#"{"a":1}"#.to_string()]);
    }

    #[test]
    fn decoder_joins_multiline_data_and_skips_comments() {
        let mut decoder = SseDecoder::new();
        let out = decoder.push(b": ping\n\nevent: message\ndata: one\ndata:two\nid: 4\n\n");
        assert_eq!(out, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn decoder_flushes_trailing_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: last").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("last"));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn feed_yields_parsed_events_then_ends() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"type\":\"server.connected\",\"properties\":{}}\n\n",
            "data: {\"type\":\"message.part.updated\",\"properties\":{\"part\":{\"type\":\"tool\",\"sessionID\":\"ses_1\",\"callID\":\"c1\",\"tool\":\"read\",\"state\":{\"status\":\"running\"}}}}\n\n",
            "data: {\"type\":\"session.idle\",\"properties\":{\"sessionID\":\"ses_1\"}}\n\n",
        );
        let mock = server
            .mock("GET", "/event")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let feed = Box::new(SseEventFeed::new(&server.url()).unwrap());
        let events: Vec<_> = feed.subscribe().await.unwrap().collect().await;

        mock.assert_async().await;
        let kinds: Vec<_> = events
            .into_iter()
            .map(|e| e.unwrap())
            .map(|e| (e.correlation_id, e.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("ses_1".to_string(), EventKind::OperationStarted),
                ("ses_1".to_string(), EventKind::TerminalSuccess),
            ]
        );
    }

    #[tokio::test]
    async fn subscribe_fails_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/event")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let feed = Box::new(SseEventFeed::new(&server.url()).unwrap());
        let err = match feed.subscribe().await {
            Ok(_) => panic!("expected subscribe to fail"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("status=503"), "{err}");
        assert!(err.contains("maintenance"), "{err}");
    }
}
