//! Item loading and export pipeline
//!
//! After a scraper finishes, the worker turns it into [`Items`] with an
//! [`ItemLoader`] and hands them to every configured [`Exporter`].

use crate::error::Result;
use crate::scraper::Scraper;
use crate::types::JobId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::io::AsyncWriteExt;

/// Fields extracted from one finished scraper
pub type Items = serde_json::Map<String, serde_json::Value>;

/// Turns a finished scraper into items
pub trait ItemLoader: Send + Sync {
    /// Extract the items
    fn write(&self, scraper: &dyn Scraper) -> Result<Items>;
}

/// Loader recording the scraper identity and its last session response
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionItemLoader;

impl ItemLoader for SessionItemLoader {
    fn write(&self, scraper: &dyn Scraper) -> Result<Items> {
        let session = scraper.session();
        let page = session.page();
        let response = session.response();

        let mut items = Items::new();
        items.insert("name".into(), scraper.name().into());
        items.insert("number".into(), scraper.number().into());
        items.insert("task".into(), scraper.task().into());
        items.insert("status".into(), response.status.into());
        items.insert("ucontent".into(), response.text().into());
        items.insert("retries".into(), session.retries().into());
        // The page the endpoint rendered, not the endpoint itself
        let url = page
            .as_ref()
            .and_then(|p| p.url.clone())
            .or_else(|| session.last_request().map(|r| r.url.clone()));
        items.insert("url".into(), url.into());
        items.insert(
            "endpoint_status".into(),
            page.as_ref().and_then(|p| p.endpoint_status()).into(),
        );
        items.insert(
            "html".into(),
            page.as_ref().and_then(|p| p.html.clone()).into(),
        );
        items.insert(
            "crawlera_session".into(),
            page.as_ref()
                .and_then(|p| p.crawlera_session().map(str::to_string))
                .into(),
        );
        items.insert("cookies".into(), serde_json::to_value(scraper.cookies())?);
        items.insert("scraped_at".into(), chrono::Utc::now().to_rfc3339().into());
        Ok(items)
    }
}

/// Serializes and persists items
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Export one set of items for a job
    async fn export_item(&self, job_id: &JobId, items: &Items) -> Result<()>;
}

/// Read access to persisted job results
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Every item set exported for a job, in export order
    async fn get_job_results(&self, job_id: &JobId) -> Result<Vec<Items>>;

    /// Forget a job; returns how many item sets were removed (0 for an unknown job)
    async fn delete_job(&self, job_id: &JobId) -> Result<usize>;
}

/// Appends one JSON object per line to a file
#[derive(Debug)]
pub struct JsonLinesExporter {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonLinesExporter {
    /// Export to `path`, creating the file on first write
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Exporter for JsonLinesExporter {
    async fn export_item(&self, job_id: &JobId, items: &Items) -> Result<()> {
        let mut record = items.clone();
        record.insert("job_id".into(), job_id.as_str().into());
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        // One writer at a time so lines never interleave
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// In-memory job results, usable both as exporter and store
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Vec<Items>>>,
}

impl MemoryJobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of item sets recorded for a job
    pub fn count(&self, job_id: &JobId) -> usize {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Exporter for MemoryJobStore {
    async fn export_item(&self, job_id: &JobId, items: &Items) -> Result<()> {
        self.jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(job_id.clone())
            .or_default()
            .push(items.clone());
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get_job_results(&self, job_id: &JobId) -> Result<Vec<Items>> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_job(&self, job_id: &JobId) -> Result<usize> {
        let removed = self
            .jobs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id)
            .map_or(0, |items| items.len());
        Ok(removed)
    }
}
