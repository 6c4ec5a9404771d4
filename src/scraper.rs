//! Scrapers: the job-specific side of one task
//!
//! A worker builds a fresh [`Scraper`] for every task through a [`ScraperFactory`],
//! then calls [`Scraper::start`]. Site-specific scrapers wrap [`SplashScraper`] or
//! implement the trait themselves and issue follow-on requests with
//! [`Scraper::open`].

use crate::config::{RenderTimeout, SessionRetryConfig};
use crate::error::{Error, Result};
use crate::session::{RenderRequest, RetryableSession, SessionResponse, Transport};
use crate::types::{JobId, Kwargs};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Lua script rendering a page and reporting it as JSON
pub const BASIC_SPLASH_SCRIPT: &str = include_str!("scripts/basic_splash.lua");

/// Options for a follow-on request
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Payload to post instead of the standard execute payload
    pub json: Option<serde_json::Value>,
    /// Continue the current proxy session instead of creating a new one
    pub reuse_session: bool,
    /// Timeout for this request (scraper default when `None`)
    pub timeout: Option<RenderTimeout>,
}

/// Capability interface of a per-task scraper
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Name of the group the scraper works for
    fn name(&self) -> &str;

    /// Ordinal of the worker driving it
    fn number(&self) -> usize;

    /// The task (keyword) being scraped
    fn task(&self) -> &str;

    /// Land on the first page
    ///
    /// `url` overrides the scraper's own search URL; `timeout` overrides its
    /// default timeout. Returns the cached response without a new request when
    /// the session is already established.
    async fn start(
        &mut self,
        url: Option<&str>,
        timeout: Option<RenderTimeout>,
    ) -> Result<SessionResponse>;

    /// Follow-on request within the same session
    async fn open(&mut self, url: &str, options: OpenOptions) -> Result<SessionResponse>;

    /// The session holding the last response
    fn session(&self) -> &RetryableSession;

    /// Cookies reported by the last rendered page
    fn cookies(&self) -> HashMap<String, String> {
        self.session()
            .page()
            .map(|page| page.cookie_map())
            .unwrap_or_default()
    }
}

/// What a factory knows about the worker asking for a scraper
#[derive(Clone, Debug)]
pub struct ScraperContext {
    /// Group name
    pub name: String,
    /// Worker ordinal
    pub number: usize,
    /// Job the results belong to
    pub job_id: JobId,
    /// Landing URL configured for the group
    pub url: Option<String>,
    /// Timeout configured for the group
    pub timeout: RenderTimeout,
    /// Group kwargs
    pub kwargs: Kwargs,
}

/// Builds one scraper per task
pub trait ScraperFactory: Send + Sync {
    /// Build a scraper for `task`
    fn build(&self, task: &str, ctx: &ScraperContext) -> Result<Box<dyn Scraper>>;
}

impl<F> ScraperFactory for F
where
    F: Fn(&str, &ScraperContext) -> Result<Box<dyn Scraper>> + Send + Sync,
{
    fn build(&self, task: &str, ctx: &ScraperContext) -> Result<Box<dyn Scraper>> {
        self(task, ctx)
    }
}

/// Scraper rendering pages through a Splash-compatible `/execute` endpoint
pub struct SplashScraper {
    name: String,
    number: usize,
    task: String,
    searchurl: Option<String>,
    referrer: String,
    crawlera_user: Option<String>,
    lua_source: String,
    cookies: serde_json::Map<String, serde_json::Value>,
    timeout: RenderTimeout,
    session: RetryableSession,
    payload: Option<serde_json::Value>,
}

impl std::fmt::Debug for SplashScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplashScraper")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("task", &self.task)
            .field("session", &self.session)
            .finish()
    }
}

impl SplashScraper {
    /// Create a scraper with the built-in script and default timeout
    pub fn new(
        task: impl Into<String>,
        name: impl Into<String>,
        number: usize,
        session: RetryableSession,
    ) -> Self {
        Self {
            name: name.into(),
            number,
            task: task.into(),
            searchurl: None,
            referrer: "https://www.google.com".to_string(),
            crawlera_user: None,
            lua_source: BASIC_SPLASH_SCRIPT.to_string(),
            cookies: serde_json::Map::new(),
            timeout: RenderTimeout::default(),
            session,
            payload: None,
        }
    }

    /// URL `start` lands on when none is given
    pub fn with_searchurl(mut self, url: impl Into<String>) -> Self {
        self.searchurl = Some(url.into());
        self
    }

    /// Referrer sent with every render
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    /// Proxy user passed to the script
    pub fn with_crawlera_user(mut self, user: impl Into<String>) -> Self {
        self.crawlera_user = Some(user.into());
        self
    }

    /// Replace the built-in Lua script
    pub fn with_lua_source(mut self, script: impl Into<String>) -> Self {
        self.lua_source = script.into();
        self
    }

    /// Cookies the script initializes the browser with
    pub fn with_cookies(mut self, cookies: serde_json::Map<String, serde_json::Value>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Default timeout for requests without an explicit one
    pub fn with_timeout(mut self, timeout: RenderTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Payload of the last request
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.payload.as_ref()
    }

    /// Standard execute payload for `url`
    pub fn execute_payload(&self, url: &str, timeout: RenderTimeout) -> serde_json::Value {
        serde_json::json!({
            "lua_source": self.lua_source,
            "url": url,
            "crawlera_user": self.crawlera_user,
            "cache_args": "lua_source",
            "timeout": timeout.read.as_secs_f64(),
            "session_id": "create",
            "referrer": self.referrer,
            "searchurl": self.searchurl,
            "keyword": self.task,
            "cookies": self.cookies,
        })
    }

    /// Proxy session id of the last rendered page
    pub fn session_id(&self) -> Option<String> {
        self.session
            .page()
            .and_then(|page| page.crawlera_session().map(str::to_string))
    }

    async fn post(
        &mut self,
        url: &str,
        payload: serde_json::Value,
        timeout: RenderTimeout,
    ) -> Result<SessionResponse> {
        self.payload = Some(payload.clone());
        let response = self
            .session
            .open(RenderRequest {
                url: url.to_string(),
                payload,
                timeout,
            })
            .await?;

        tracing::debug!(
            scraper = %self.name,
            number = self.number,
            url = %url,
            status = response.status,
            "Render finished"
        );
        Ok(response)
    }
}

#[async_trait]
impl Scraper for SplashScraper {
    fn name(&self) -> &str {
        &self.name
    }

    fn number(&self) -> usize {
        self.number
    }

    fn task(&self) -> &str {
        &self.task
    }

    async fn start(
        &mut self,
        url: Option<&str>,
        timeout: Option<RenderTimeout>,
    ) -> Result<SessionResponse> {
        if self.session.is_valid() {
            return Ok(self.session.response().clone());
        }

        let url = url
            .map(str::to_string)
            .or_else(|| self.searchurl.clone())
            .ok_or_else(|| Error::Scraper(format!("no url to start task '{}' on", self.task)))?;
        let timeout = timeout.unwrap_or(self.timeout);
        let payload = self.execute_payload(&url, timeout);
        self.post(&url, payload, timeout).await
    }

    async fn open(&mut self, url: &str, options: OpenOptions) -> Result<SessionResponse> {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let mut payload = options
            .json
            .unwrap_or_else(|| self.execute_payload(url, timeout));

        if options.reuse_session {
            if let (Some(id), Some(fields)) = (self.session_id(), payload.as_object_mut()) {
                fields.insert("session_id".to_string(), serde_json::Value::String(id));
            }
        }

        self.post(url, payload, timeout).await
    }

    fn session(&self) -> &RetryableSession {
        &self.session
    }
}

/// Factory producing a [`SplashScraper`] per task over a shared transport
///
/// The search URL may contain `{task}`, replaced by the URL-encoded task.
pub struct SplashScraperFactory {
    transport: Arc<dyn Transport>,
    retry: SessionRetryConfig,
    searchurl: Option<String>,
    referrer: Option<String>,
    crawlera_user: Option<String>,
    lua_source: Option<String>,
}

impl SplashScraperFactory {
    /// Create a factory
    pub fn new(transport: Arc<dyn Transport>, retry: SessionRetryConfig) -> Self {
        Self {
            transport,
            retry,
            searchurl: None,
            referrer: None,
            crawlera_user: None,
            lua_source: None,
        }
    }

    /// Search URL template
    pub fn searchurl(mut self, template: impl Into<String>) -> Self {
        self.searchurl = Some(template.into());
        self
    }

    /// Referrer for every scraper
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Proxy user for every scraper
    pub fn crawlera_user(mut self, user: impl Into<String>) -> Self {
        self.crawlera_user = Some(user.into());
        self
    }

    /// Lua script for every scraper
    pub fn lua_source(mut self, script: impl Into<String>) -> Self {
        self.lua_source = Some(script.into());
        self
    }
}

impl ScraperFactory for SplashScraperFactory {
    fn build(&self, task: &str, ctx: &ScraperContext) -> Result<Box<dyn Scraper>> {
        let session = RetryableSession::new(self.transport.clone(), self.retry.clone());
        let mut scraper =
            SplashScraper::new(task, &ctx.name, ctx.number, session).with_timeout(ctx.timeout);

        if let Some(template) = &self.searchurl {
            let encoded: String = url::form_urlencoded::byte_serialize(task.as_bytes()).collect();
            scraper = scraper.with_searchurl(template.replace("{task}", &encoded));
        }
        if let Some(referrer) = &self.referrer {
            scraper = scraper.with_referrer(referrer);
        }
        if let Some(user) = &self.crawlera_user {
            scraper = scraper.with_crawlera_user(user);
        }
        if let Some(script) = &self.lua_source {
            scraper = scraper.with_lua_source(script);
        }
        if let Some(serde_json::Value::Object(cookies)) = ctx.kwargs.get("cookies") {
            scraper = scraper.with_cookies(cookies.clone());
        }

        Ok(Box::new(scraper))
    }
}
