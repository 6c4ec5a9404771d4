//! Rendered page parsed from the rendering endpoint's JSON body

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header carrying the proxy session id that follow-on requests may reuse
pub const CRAWLERA_SESSION_HEADER: &str = "X-Crawlera-Session";

/// One header as reported by the rendering endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// JSON document returned by the rendering script
///
/// Every field is optional: scripts decide what they report.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    /// Rendered HTML
    #[serde(default)]
    pub html: Option<String>,
    /// Final URL after redirects
    #[serde(default)]
    pub url: Option<String>,
    /// Status the target site answered the rendering service with
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Response headers of the target site
    #[serde(default)]
    pub headers: Vec<PageHeader>,
    /// Cookies left in the browser after rendering
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,
    /// HAR log, if requested
    #[serde(default)]
    pub har: Option<serde_json::Value>,
    /// Base64 screenshot, if requested
    #[serde(default)]
    pub png: Option<String>,
}

impl RenderedPage {
    /// Parse a response body; returns `None` when it is not a render document
    pub fn parse(content: &[u8]) -> Option<Self> {
        serde_json::from_slice(content).ok()
    }

    /// Status of the target site as seen by the rendering service
    pub fn endpoint_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Proxy session id, if the proxy assigned one
    pub fn crawlera_session(&self) -> Option<&str> {
        self.header(CRAWLERA_SESSION_HEADER)
    }

    /// Content type of the rendered page
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Cookies as name/value pairs, skipping malformed entries
    pub fn cookie_map(&self) -> HashMap<String, String> {
        self.cookies
            .iter()
            .filter_map(|c| {
                let name = c.get("name")?.as_str()?;
                let value = c.get("value")?.as_str()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }
}
