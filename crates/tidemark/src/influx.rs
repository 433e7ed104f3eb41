//! Blocking InfluxDB 2.x write client.
//!
//! One client per source run, connected through the
//! [`RemoteStore`](crate::pipeline::RemoteStore) seam. `write_batch` encodes
//! the batch as line protocol, POSTs it to `/api/v2/write` and retries
//! transient failures with doubling backoff before giving up; the pipeline
//! above never re-drives a batch.

use crate::config::DatabaseConfig;
use crate::pipeline::{BatchWriter, RemoteStore};
use std::time::Duration;
use thiserror::Error;
use tidemark_protocol::{EncodeError, Point};
use tracing::warn;

/// Total attempts per batch, first try included.
const MAX_ATTEMPTS: u32 = 3;
/// Delay before the second attempt; doubles per retry.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Remote write error type
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected write (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("cannot encode batch: {0}")]
    Encode(#[from] EncodeError),
}

impl WriteError {
    /// Whether a retry has any chance of succeeding. Client-side mistakes
    /// (auth, malformed protocol, unknown bucket) are rejected with a 4xx
    /// and retrying them just delays the failure.
    pub fn is_transient(&self) -> bool {
        match self {
            WriteError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            WriteError::Rejected { status, .. } => *status == 429 || *status >= 500,
            WriteError::Encode(_) => false,
        }
    }
}

/// A connected write session against one bucket.
pub struct InfluxClient {
    http: reqwest::blocking::Client,
    write_url: String,
    token: String,
}

impl InfluxClient {
    fn post(&self, body: String) -> Result<(), WriteError> {
        let response = self
            .http
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        let body: String = body.trim().chars().take(500).collect();
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl BatchWriter for InfluxClient {
    fn write_batch(&mut self, batch: &[Point]) -> Result<(), WriteError> {
        let body = Point::encode_batch(batch)?;

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.post(body.clone()) {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        attempt,
                        max_attempts = MAX_ATTEMPTS,
                        error = %err,
                        "transient write failure, backing off {}s",
                        backoff.as_secs()
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Build the write endpoint URL for one org/bucket at nanosecond precision.
fn write_url(base: &str, org: &str, bucket: &str) -> String {
    let base = base.trim_end_matches('/');
    format!(
        "{base}/api/v2/write?org={}&bucket={}&precision=ns",
        url_escape(org),
        url_escape(bucket)
    )
}

// Minimal query escaping; org and bucket names are the only caller input.
fn url_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(c),
            _ => {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}

impl RemoteStore for DatabaseConfig {
    type Writer = InfluxClient;

    fn connect(&self) -> Result<InfluxClient, WriteError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;
        Ok(InfluxClient {
            http,
            write_url: write_url(&self.url, &self.org, &self.bucket),
            token: self.token.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_url_shape() {
        assert_eq!(
            write_url("http://localhost:8086/", "acme", "telemetry"),
            "http://localhost:8086/api/v2/write?org=acme&bucket=telemetry&precision=ns"
        );
    }

    #[test]
    fn url_escaping() {
        assert_eq!(url_escape("my bucket"), "my%20bucket");
        assert_eq!(url_escape("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn rejected_5xx_and_429_are_transient() {
        let err = WriteError::Rejected {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_transient());
        let err = WriteError::Rejected {
            status: 429,
            body: String::new(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn rejected_4xx_is_fatal() {
        let err = WriteError::Rejected {
            status: 401,
            body: "unauthorized".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn encode_errors_are_fatal() {
        let err = WriteError::Encode(EncodeError::NoFields {
            measurement: "m".into(),
        });
        assert!(!err.is_transient());
    }
}
