//! HTTP transport to a Splash-compatible rendering endpoint

use super::{RenderRequest, SessionResponse, Transport};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// POSTs render payloads as JSON to one endpoint
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    /// Build a transport from session settings
    ///
    /// # Errors
    /// Returns a configuration error for a bad endpoint, or an error if the HTTP
    /// client cannot be created
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let endpoint = config.endpoint_url()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("transistor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Endpoint requests are sent to
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RenderRequest) -> Result<SessionResponse> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&request.payload)
            .timeout(request.timeout.total());

        if let Some(user) = &self.username {
            builder = builder.basic_auth(user, self.password.as_deref());
        }

        tracing::debug!(endpoint = %self.endpoint, url = %request.url, "Sending render request");

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let content = response.bytes().await?.to_vec();

        Ok(SessionResponse {
            status,
            content,
            url: Some(url),
        })
    }
}
