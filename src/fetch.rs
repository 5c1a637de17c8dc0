use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{StatusCode, Url};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

use crate::error::HarvestError;

pub const CHUNK_SIZE: usize = 8 * 1024;

/// Backoff schedule for connection-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Total attempts including the first; `None` retries forever at `max_wait`.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
            max_attempts: Some(8),
        }
    }
}

impl RetryPolicy {
    pub fn waits(&self) -> Backoff {
        Backoff {
            next: self.min_wait,
            max: self.max_wait,
        }
    }
}

/// Endless doubling sequence capped at the policy maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.max);
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// Outcome of a single attempt inside [`retry_with_backoff`].
#[derive(Debug)]
pub enum Attempt {
    Transient(String),
    Fatal(HarvestError),
}

/// Runs `op` until it succeeds, fails fatally or the policy runs out of
/// attempts, sleeping through `sleep` between transient failures.
pub fn retry_with_backoff<T>(
    policy: &RetryPolicy,
    url: &str,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut() -> Result<T, Attempt>,
) -> Result<T, HarvestError> {
    let mut waits = policy.waits();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(err)) => return Err(err),
            Err(Attempt::Transient(message)) => {
                if policy.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(HarvestError::RetriesExhausted {
                        url: url.to_string(),
                        attempts,
                        message,
                    });
                }
                let wait = waits.next().unwrap_or(policy.max_wait);
                warn!(url, attempt = attempts, wait_secs = wait.as_secs_f64(), error = %message, "connection failed, backing off");
                sleep(wait);
            }
        }
    }
}

pub trait ResourceFetcher: Send + Sync {
    /// Streams `url` into `destination`, returning the number of bytes written.
    fn download(&self, url: &str, destination: &Path) -> Result<u64, HarvestError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy, connect_timeout: Duration) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .default_headers(default_headers()?)
            .connect_timeout(connect_timeout)
            .timeout(Option::<Duration>::None)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Issues the GET, retrying connection failures. Any status is returned;
    /// the body is left unread.
    pub fn open(&self, url: &str) -> Result<Response, HarvestError> {
        let parsed = check_scheme(url)?;
        retry_with_backoff(&self.policy, url, thread::sleep, || {
            self.client
                .get(parsed.clone())
                .send()
                .map_err(|err| classify(&err))
        })
    }
}

impl ResourceFetcher for HttpFetcher {
    fn download(&self, url: &str, destination: &Path) -> Result<u64, HarvestError> {
        debug!(url, "requesting");
        let response = self.open(url)?;
        if response.status() != StatusCode::OK {
            return Err(HarvestError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        stream_response(url, response, destination)
    }
}

/// Sends the request built by `request` for API calls, retrying connection
/// failures and throttled or unavailable responses under `policy`. Any other
/// status is returned with the body unread.
pub fn send_retrying(
    policy: &RetryPolicy,
    url: &str,
    request: impl Fn() -> RequestBuilder,
) -> Result<Response, HarvestError> {
    retry_with_backoff(policy, url, thread::sleep, || match request().send() {
        Ok(response) if is_retryable_status(response.status()) => Err(Attempt::Transient(
            format!("status {}", response.status().as_u16()),
        )),
        Ok(response) => Ok(response),
        Err(err) => Err(classify(&err)),
    })
}

pub fn default_headers() -> Result<HeaderMap, HarvestError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("catalog-harvester/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| HarvestError::Http(err.to_string()))?,
    );
    Ok(headers)
}

pub fn check_scheme(url: &str) -> Result<Url, HarvestError> {
    let parsed = Url::parse(url).map_err(|err| HarvestError::Http(format!("{url}: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(HarvestError::InvalidScheme(url.to_string())),
    }
}

pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504)
}

fn classify(err: &reqwest::Error) -> Attempt {
    if is_transient(err) {
        Attempt::Transient(err.to_string())
    } else {
        Attempt::Fatal(HarvestError::Http(err.to_string()))
    }
}

/// Copies the body in fixed-size chunks into a hidden sibling temp file and
/// renames it into place, so the final path only ever holds a complete body.
pub fn stream_to_file(
    url: &str,
    mut body: impl Read,
    destination: &Path,
) -> Result<u64, HarvestError> {
    stream_checked(url, &mut body, None, destination)
}

fn stream_checked(
    url: &str,
    body: &mut dyn Read,
    expected: Option<u64>,
    destination: &Path,
) -> Result<u64, HarvestError> {
    let mut partial = PartialFile::create(destination)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(HarvestError::Http(format!("{url}: {err}"))),
        };
        partial.write_chunk(&buffer[..read])?;
    }
    partial.finish(url, expected, destination)
}

/// A body being written to a hidden `.partial-` sibling of its destination.
/// Dropping it without [`PartialFile::finish`] removes the temp file.
pub struct PartialFile {
    temp: NamedTempFile,
    received: u64,
}

impl PartialFile {
    pub fn create(destination: &Path) -> Result<Self, HarvestError> {
        let parent = destination
            .parent()
            .ok_or_else(|| HarvestError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let temp = Builder::new()
            .prefix(".partial-")
            .tempfile_in(parent)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(Self { temp, received: 0 })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), HarvestError> {
        self.temp
            .write_all(chunk)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        self.received += chunk.len() as u64;
        Ok(())
    }

    /// Renames the temp file onto `destination`, unless fewer than
    /// `expected` bytes arrived.
    pub fn finish(
        mut self,
        url: &str,
        expected: Option<u64>,
        destination: &Path,
    ) -> Result<u64, HarvestError> {
        if let Some(expected) = expected {
            if self.received < expected {
                return Err(HarvestError::Truncated {
                    url: url.to_string(),
                    expected,
                    received: self.received,
                });
            }
        }
        self.temp
            .flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        self.temp
            .persist(destination)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        Ok(self.received)
    }
}

/// Like [`stream_to_file`], but rejects a body shorter than the response's
/// declared `Content-Length`.
pub fn stream_response(
    url: &str,
    mut response: Response,
    destination: &Path,
) -> Result<u64, HarvestError> {
    let expected = response.content_length();
    stream_checked(url, &mut response, expected, destination)
}
