//! Catalog of named job executables.
//!
//! The catalog maps logical job names (e.g. "PopulateDatabase") to factories
//! that build a fresh executable on every call. Administrative triggers can
//! then enqueue a job by name alone, and orphan recovery can requeue work
//! after a restart.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::queue::{Executable, JobFuture};

type ExecutableFactory = Arc<dyn Fn(CancellationToken) -> JobFuture + Send + Sync>;

/// Registry that maps job names to executable factories.
///
/// # Example
///
/// ```ignore
/// let mut catalog = JobCatalog::new();
/// catalog.register("RebuildRelationshipGraph", |token| async move {
///     graph::rebuild(token).await
/// });
///
/// let manager = JobManager::new(store).with_catalog(catalog);
/// manager.enqueue_named("RebuildRelationshipGraph").await?;
/// ```
#[derive(Default, Clone)]
pub struct JobCatalog {
    factories: HashMap<String, ExecutableFactory>,
}

impl JobCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job name with its factory. Re-registering a name replaces
    /// the previous factory.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let factory: ExecutableFactory =
            Arc::new(move |token: CancellationToken| -> JobFuture { Box::pin(factory(token)) });
        self.factories.insert(name.into(), factory);
    }

    /// Build a fresh executable for `name`.
    pub fn executable(&self, name: &str) -> Option<Executable> {
        let factory = self.factories.get(name)?.clone();
        Some(Box::new(move |token: CancellationToken| factory(token)))
    }

    /// Check if a job name is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
