//! WorkGroup: a named, fixed-size crew of workers sharing one configuration

use crate::config::RenderTimeout;
use crate::error::{Error, Result};
use crate::export::{Exporter, ItemLoader, SessionItemLoader};
use crate::scraper::ScraperFactory;
use crate::types::{JobId, Kwargs, WorkerId};
use crate::worker::{NoHooks, Worker, WorkerHooks, WorkerShared};
use std::sync::Arc;
use std::time::Duration;

/// Factory for the workers serving one tracker
///
/// The group name must equal the tracker name for the manager to bind them.
/// A group never runs work itself.
pub struct WorkGroup {
    name: String,
    staff: usize,
    shared: Arc<WorkerShared>,
}

impl std::fmt::Debug for WorkGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkGroup")
            .field("name", &self.name)
            .field("staff", &self.staff)
            .field("timeout", &self.shared.timeout)
            .field("qtimeout", &self.shared.qtimeout)
            .finish()
    }
}

impl WorkGroup {
    /// Start building a group of `staff` workers
    pub fn builder(
        name: impl Into<String>,
        staff: usize,
        factory: Arc<dyn ScraperFactory>,
    ) -> WorkGroupBuilder {
        WorkGroupBuilder {
            name: name.into(),
            staff,
            factory,
            loader: Arc::new(SessionItemLoader),
            exporters: Vec::new(),
            hooks: Arc::new(NoHooks),
            url: None,
            timeout: RenderTimeout::group_default(),
            kwargs: Kwargs::new(),
            qtimeout: None,
        }
    }

    /// Group (and tracker) name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of workers
    pub fn staff(&self) -> usize {
        self.staff
    }

    /// Worker qtimeout; `None` means workers wait until the manager closes their inbox
    pub fn qtimeout(&self) -> Option<Duration> {
        self.shared.qtimeout
    }

    /// Render timeout handed to every scraper
    pub fn timeout(&self) -> RenderTimeout {
        self.shared.timeout
    }

    /// Create workers numbered `1..=staff`
    pub fn init_workers(&self, job_id: &JobId) -> WorkerList {
        (1..=self.staff)
            .map(|number| {
                Worker::new(
                    WorkerId::new(&self.name, number),
                    job_id.clone(),
                    self.shared.clone(),
                )
            })
            .collect()
    }
}

/// Builder for [`WorkGroup`]
pub struct WorkGroupBuilder {
    name: String,
    staff: usize,
    factory: Arc<dyn ScraperFactory>,
    loader: Arc<dyn ItemLoader>,
    exporters: Vec<Arc<dyn Exporter>>,
    hooks: Arc<dyn WorkerHooks>,
    url: Option<String>,
    timeout: RenderTimeout,
    kwargs: Kwargs,
    qtimeout: Option<Duration>,
}

impl WorkGroupBuilder {
    /// Landing URL passed to every scraper's `start`
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Render timeout (default: 3.05 s connect, 700 s read)
    pub fn timeout(mut self, timeout: RenderTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop idle workers after this long
    ///
    /// Must exceed the manager's pop timeout, or workers quit while the manager
    /// is merely slow.
    pub fn qtimeout(mut self, qtimeout: Duration) -> Self {
        self.qtimeout = Some(qtimeout);
        self
    }

    /// Arguments forwarded to the scraper factory
    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Item loader (default: [`SessionItemLoader`])
    pub fn loader(mut self, loader: Arc<dyn ItemLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Add an exporter
    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    /// Export hooks
    pub fn hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    /// Returns a configuration error for an empty name or zero staff
    pub fn build(self) -> Result<WorkGroup> {
        if self.name.trim().is_empty() {
            return Err(Error::config("work group name must not be empty", "group.name"));
        }
        if self.staff == 0 {
            return Err(Error::config(
                format!("work group '{}' needs at least one worker", self.name),
                "group.staff",
            ));
        }
        if self.qtimeout.is_some_and(|q| q.is_zero()) {
            return Err(Error::config(
                format!("work group '{}' qtimeout must be greater than zero", self.name),
                "group.qtimeout",
            ));
        }

        Ok(WorkGroup {
            name: self.name,
            staff: self.staff,
            shared: Arc::new(WorkerShared {
                factory: self.factory,
                loader: self.loader,
                exporters: self.exporters,
                hooks: self.hooks,
                url: self.url,
                timeout: self.timeout,
                kwargs: self.kwargs,
                qtimeout: self.qtimeout,
            }),
        })
    }
}

/// Ordered, indexable collection of workers
#[derive(Debug, Default)]
pub struct WorkerList(Vec<Worker>);

impl WorkerList {
    /// Number of workers
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, Worker> {
        self.0.iter()
    }

    /// Iterate mutably in order
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Worker> {
        self.0.iter_mut()
    }
}

impl std::ops::Index<usize> for WorkerList {
    type Output = Worker;

    fn index(&self, index: usize) -> &Worker {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for WorkerList {
    fn index_mut(&mut self, index: usize) -> &mut Worker {
        &mut self.0[index]
    }
}

impl std::ops::Add for WorkerList {
    type Output = WorkerList;

    fn add(mut self, rhs: WorkerList) -> WorkerList {
        self.0.extend(rhs.0);
        self
    }
}

impl FromIterator<Worker> for WorkerList {
    fn from_iter<I: IntoIterator<Item = Worker>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for WorkerList {
    type Item = Worker;
    type IntoIter = std::vec::IntoIter<Worker>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a WorkerList {
    type Item = &'a Worker;
    type IntoIter = std::slice::Iter<'a, Worker>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
