//! Shared fixtures for manager, worker and work group tests

use crate::config::{ManagerConfig, RenderTimeout, SessionRetryConfig};
use crate::error::{Error, Result};
use crate::export::MemoryJobStore;
use crate::scraper::{
    OpenOptions, Scraper, ScraperContext, ScraperFactory, SplashScraper, SplashScraperFactory,
};
use crate::session::{RenderRequest, RetryableSession, SessionResponse, Transport};
use crate::workgroup::WorkGroup;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Answers every render with a 200 page
pub(crate) struct OkTransport;

#[async_trait]
impl Transport for OkTransport {
    async fn send(&self, request: &RenderRequest) -> Result<SessionResponse> {
        let body = serde_json::json!({
            "html": format!("<html>{}</html>", request.payload["keyword"].as_str().unwrap_or("")),
            "url": request.url,
            "http_status": 200,
            "headers": [],
            "cookies": []
        });
        let mut response = SessionResponse::new(200, body.to_string());
        response.url = Some(request.url.clone());
        Ok(response)
    }
}

pub(crate) fn fast_retry() -> SessionRetryConfig {
    SessionRetryConfig {
        max_retries: 5,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        retry_local_timeout: false,
    }
}

/// Splash scrapers over [`OkTransport`] searching `https://site.test/search?q={task}`
pub(crate) fn scripted_factory() -> Arc<dyn ScraperFactory> {
    Arc::new(
        SplashScraperFactory::new(Arc::new(OkTransport), fast_retry())
            .searchurl("https://site.test/search?q={task}"),
    )
}

/// Factory whose scrapers never get built
pub(crate) fn failing_factory() -> Arc<dyn ScraperFactory> {
    Arc::new(|task: &str, _ctx: &ScraperContext| -> Result<Box<dyn Scraper>> {
        Err(Error::Scraper(format!("cannot scrape '{task}'")))
    })
}

/// Scraper that waits for a gate permit before rendering
struct GatedScraper {
    inner: SplashScraper,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Scraper for GatedScraper {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn number(&self) -> usize {
        self.inner.number()
    }

    fn task(&self) -> &str {
        self.inner.task()
    }

    async fn start(
        &mut self,
        url: Option<&str>,
        timeout: Option<RenderTimeout>,
    ) -> Result<SessionResponse> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Other(e.to_string()))?;
        permit.forget();
        self.inner.start(url, timeout).await
    }

    async fn open(&mut self, url: &str, options: OpenOptions) -> Result<SessionResponse> {
        self.inner.open(url, options).await
    }

    fn session(&self) -> &RetryableSession {
        self.inner.session()
    }
}

/// Scrapers that block in `start` until a permit is added to `gate`
pub(crate) fn gated_factory(gate: Arc<Semaphore>) -> Arc<dyn ScraperFactory> {
    Arc::new(move |task: &str, ctx: &ScraperContext| -> Result<Box<dyn Scraper>> {
        let session = RetryableSession::new(Arc::new(OkTransport), fast_retry());
        let inner = SplashScraper::new(task, &ctx.name, ctx.number, session)
            .with_searchurl(format!("https://site.test/search?q={task}"));
        Ok(Box::new(GatedScraper {
            inner,
            gate: gate.clone(),
        }))
    })
}

pub(crate) fn fast_config() -> ManagerConfig {
    ManagerConfig {
        pool_size: 20,
        pop_timeout: Duration::from_millis(20),
        should_stop: false,
    }
}

/// Group exporting into `store`
pub(crate) fn group(name: &str, staff: usize, store: &Arc<MemoryJobStore>) -> WorkGroup {
    WorkGroup::builder(name, staff, scripted_factory())
        .exporter(store.clone())
        .build()
        .expect("valid group")
}
