//! HTTP plumbing shared by the backend, the event feed and the expansion
//! lookup. Failures carry a kind, the status and the URL so callers can log
//! them as structured fields.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpErrorKind {
    Timeout,
    Connect,
    Request,
    /// Response body broke off mid-read (also a dropped event stream).
    Stream,
    Decode,
    Status,
    Other,
}

impl HttpErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Stream => "stream",
            Self::Decode => "decode",
            Self::Status => "status",
            Self::Other => "other",
        }
    }

    fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else if err.is_body() {
            Self::Stream
        } else if err.is_decode() {
            Self::Decode
        } else if err.is_request() {
            Self::Request
        } else if err.is_status() {
            Self::Status
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for HttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct HttpError {
    kind: HttpErrorKind,
    status: Option<u16>,
    url: String,
    detail: String,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl HttpError {
    pub fn kind(&self) -> HttpErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Worth retrying later: network trouble or a 5xx/429 answer.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            HttpErrorKind::Timeout | HttpErrorKind::Connect | HttpErrorKind::Stream => true,
            HttpErrorKind::Status => self
                .status
                .map(|s| s == 429 || (500..600).contains(&s))
                .unwrap_or(false),
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, url: impl Into<String>) -> Self {
        Self {
            kind: HttpErrorKind::classify(&err),
            status: err.status().map(|s| s.as_u16()),
            url: url.into(),
            detail: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub(crate) fn status_error(status: u16, url: impl Into<String>, body_preview: String) -> Self {
        Self {
            kind: HttpErrorKind::Status,
            status: Some(status),
            url: url.into(),
            detail: body_preview,
            source: None,
        }
    }

    pub(crate) fn decode_error(
        status: u16,
        url: impl Into<String>,
        err: serde_json::Error,
        body_preview: String,
    ) -> Self {
        Self {
            kind: HttpErrorKind::Decode,
            status: Some(status),
            url: url.into(),
            detail: format!("invalid JSON body ({}): {}", err, body_preview),
            source: Some(Box::new(err)),
        }
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http error kind={}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        write!(f, " url={}: {}", self.url, self.detail)
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Trimmed, length-limited body text for error messages.
pub(crate) fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    match trimmed.char_indices().nth(BODY_PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// `timeout_ms == 0` builds a client without a total request timeout, as the
/// long-lived event subscription needs.
pub(crate) fn build_client(timeout_ms: u64) -> anyhow::Result<reqwest::Client> {
    let builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    let builder = if timeout_ms > 0 {
        builder.timeout(Duration::from_millis(timeout_ms))
    } else {
        builder
    };
    Ok(builder.build()?)
}

pub(crate) async fn send(
    req: reqwest::RequestBuilder,
    url: &str,
) -> anyhow::Result<reqwest::Response> {
    req.send()
        .await
        .map_err(|err| HttpError::from_reqwest(err, url).into())
}

async fn read_body(resp: reqwest::Response) -> Result<(u16, String, String), HttpError> {
    let status = resp.status().as_u16();
    let url = resp.url().to_string();
    match resp.text().await {
        Ok(body) => Ok((status, url, body)),
        Err(err) => Err(HttpError::from_reqwest(err, url)),
    }
}

/// Decode a JSON body, failing on non-2xx. An empty body decodes to `Null`.
pub(crate) async fn parse_json_response(resp: reqwest::Response) -> anyhow::Result<Value> {
    let (status, url, body) = read_body(resp).await?;
    if !(200..300).contains(&status) {
        return Err(HttpError::status_error(status, url, preview_body(&body)).into());
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|err| HttpError::decode_error(status, url, err, preview_body(&body)).into())
}

pub(crate) async fn ensure_success(resp: reqwest::Response) -> anyhow::Result<()> {
    if resp.status().is_success() {
        return Ok(());
    }
    let (status, url, body) = read_body(resp).await?;
    Err(HttpError::status_error(status, url, preview_body(&body)).into())
}
