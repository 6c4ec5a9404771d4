//! Stateful request/response session with bounded automatic retry.
//!
//! A [`RetryableSession`] wraps one conversation with the rendering endpoint:
//! - [`Transport`] sends one [`RenderRequest`] and returns a [`SessionResponse`]
//! - the session caches the last request and the last response
//! - responses matching a transient [`FaultSignature`] are replayed after a
//!   randomized backoff until the retry bound is reached
//!
//! A transport-level timeout never surfaces as an error. It becomes a synthetic
//! response carrying [`TIMEOUT_SENTINEL_STATUS`] so the same signature check can
//! examine it.

mod http;
mod page;


pub use http::HttpTransport;
pub use page::RenderedPage;
pub use crate::retry::TIMEOUT_SENTINEL_STATUS;

use crate::config::{RenderTimeout, SessionRetryConfig};
use crate::error::{Error, Result};
use crate::retry::{FaultSignature, random_backoff};
use async_trait::async_trait;
use std::sync::Arc;

/// One replayable request to the rendering endpoint
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRequest {
    /// Target page the endpoint should render
    pub url: String,
    /// JSON arguments posted to the endpoint
    pub payload: serde_json::Value,
    /// Timeout for this request
    pub timeout: RenderTimeout,
}

/// Response cached by a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionResponse {
    /// Status code of the rendering endpoint (not the target site)
    pub status: u16,
    /// Raw body
    pub content: Vec<u8>,
    /// URL the response came from
    pub url: Option<String>,
}

impl SessionResponse {
    /// Build a response
    pub fn new(status: u16, content: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content: content.into(),
            url: None,
        }
    }

    /// Synthetic response standing in for a local transport timeout
    pub fn timed_out(url: Option<String>) -> Self {
        Self {
            status: TIMEOUT_SENTINEL_STATUS,
            content: Vec::new(),
            url,
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }
}

/// Sends one request to the rendering endpoint
///
/// Implementations return `Err` only for transport failures; any HTTP status,
/// including 5xx, is an `Ok` response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the raw response
    async fn send(&self, request: &RenderRequest) -> Result<SessionResponse>;
}

/// Where a session stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No request has been sent
    Fresh,
    /// A successful response is cached
    Established,
    /// A transient fault was seen and replays are in progress
    Retrying,
    /// The last response is unusable: unrecognized failure or retries exhausted
    Failed,
}

/// Session around a [`Transport`] with a bounded replay state machine
///
/// The retry counter belongs to this instance. It only grows, is never reset
/// while the session lives, and is dropped with it.
pub struct RetryableSession {
    transport: Arc<dyn Transport>,
    retry: SessionRetryConfig,
    state: SessionState,
    retries: u32,
    last_request: Option<RenderRequest>,
    response: SessionResponse,
}

impl std::fmt::Debug for RetryableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableSession")
            .field("state", &self.state)
            .field("retries", &self.retries)
            .field("status", &self.response.status)
            .finish()
    }
}

impl RetryableSession {
    /// Create a fresh session
    pub fn new(transport: Arc<dyn Transport>, retry: SessionRetryConfig) -> Self {
        Self {
            transport,
            retry,
            state: SessionState::Fresh,
            retries: 0,
            last_request: None,
            response: SessionResponse::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of replays performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether a successful response is cached
    pub fn is_valid(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Status of the cached response (0 while fresh)
    pub fn status(&self) -> u16 {
        self.response.status
    }

    /// Raw content of the cached response
    pub fn content(&self) -> &[u8] {
        &self.response.content
    }

    /// The cached response
    pub fn response(&self) -> &SessionResponse {
        &self.response
    }

    /// The last request sent, if any
    pub fn last_request(&self) -> Option<&RenderRequest> {
        self.last_request.as_ref()
    }

    /// Parse the cached content as a rendered page
    pub fn page(&self) -> Option<RenderedPage> {
        RenderedPage::parse(&self.response.content)
    }

    /// Send a request, then run the retry state machine on its response
    ///
    /// Returns the final response. A response that still carries a fault after
    /// the retry bound, or an unrecognized failure, is returned as-is: callers
    /// inspect [`status`](Self::status).
    pub async fn open(&mut self, request: RenderRequest) -> Result<SessionResponse> {
        self.last_request = Some(request);
        self.send_last().await?;
        self.settle().await
    }

    /// Replay the last request without running the retry state machine
    pub async fn refresh(&mut self) -> Result<SessionResponse> {
        self.send_last().await?;
        Ok(self.response.clone())
    }

    async fn send_last(&mut self) -> Result<()> {
        let request = self.last_request.as_ref().ok_or(Error::NotRefreshable)?;
        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(url = %request.url, error = %e, "Render request timed out");
                SessionResponse::timed_out(Some(request.url.clone()))
            }
            Err(e) => return Err(e),
        };
        self.response = response;
        Ok(())
    }

    async fn settle(&mut self) -> Result<SessionResponse> {
        loop {
            if self.response.is_success() {
                self.state = SessionState::Established;
                return Ok(self.response.clone());
            }

            let signature = FaultSignature::classify(self.response.status, &self.response.content)
                .filter(|s| *s != FaultSignature::LocalTimeout || self.retry.retry_local_timeout);

            let Some(signature) = signature else {
                self.state = SessionState::Failed;
                return Ok(self.response.clone());
            };

            if self.retries >= self.retry.max_retries {
                tracing::error!(
                    retries = self.retries,
                    status = self.response.status,
                    signature = %signature,
                    "Retried {} times and all were unsuccessful",
                    self.retries
                );
                self.state = SessionState::Failed;
                return Ok(self.response.clone());
            }

            self.retries += 1;
            self.state = SessionState::Retrying;
            let delay = random_backoff(self.retry.min_backoff, self.retry.max_backoff);
            tracing::warn!(
                status = self.response.status,
                signature = %signature,
                attempt = self.retries,
                max_retries = self.retry.max_retries,
                delay_ms = delay.as_millis(),
                "Transient upstream fault, replaying last request"
            );
            tokio::time::sleep(delay).await;
            self.send_last().await?;
        }
    }
}
