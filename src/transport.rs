use std::io::Read;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::trace;

use crate::error::{Error, Result};

/// Upper bound on the buffer reserved up front from a Content-Length header.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Status and body of a finished GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Issues GET requests on behalf of the clients.
///
/// Implementations return every HTTP status as a response; only failures to
/// obtain a response at all (connection refused, timeout) are errors.
pub trait Transport {
    fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: HttpClient,
    progress: bool,
}

impl HttpTransport {
    /// Builds a transport whose requests are bounded by `timeout` (none: wait forever).
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("hermes-client-rs/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("hermes-client-rs")),
        );

        let http = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport {
                url: String::new(),
                source: Box::new(e),
            })?;

        Ok(Self {
            http,
            progress: false,
        })
    }

    /// Shows a byte progress bar while reading response bodies.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn progress_bar(&self, len: Option<u64>) -> Option<ProgressBar> {
        if !self.progress {
            return None;
        }
        let pb = ProgressBar::new(len?);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
        ) {
            pb.set_style(style.progress_chars("=>-"));
        }
        Some(pb)
    }
}

fn capacity_hint(content_length: Option<u64>) -> usize {
    content_length.unwrap_or(0).min(MAX_PREALLOC) as usize
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let transport_err = |e: Box<dyn std::error::Error + Send + Sync>| Error::Transport {
            url: url.to_string(),
            source: e,
        };

        let mut resp = self
            .http
            .get(url)
            .send()
            .map_err(|e| transport_err(Box::new(e)))?;
        let status = resp.status();
        let pb = self.progress_bar(resp.content_length());

        let mut body = Vec::with_capacity(capacity_hint(resp.content_length()));
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = match resp.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(transport_err(Box::new(e))),
            };
            body.extend_from_slice(&buf[..n]);
            if let Some(pb) = &pb {
                pb.inc(n as u64);
            }
        }

        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        trace!(%url, %status, bytes = body.len(), "response read");

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_hint_is_capped() {
        assert_eq!(capacity_hint(None), 0);
        assert_eq!(capacity_hint(Some(1024)), 1024);
        assert_eq!(capacity_hint(Some(u64::MAX)), MAX_PREALLOC as usize);
    }
}
