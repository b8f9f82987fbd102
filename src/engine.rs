use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError, Weak},
};

use crate::{
    config::EngineConfig,
    error::{Result, SourceError},
    handle::{HandleInner, SourceHandle},
    manifest::{Manifest, ProgressHooks},
    range_stream::RangeStream,
    scheduler::Scheduler,
    source::Entry,
};

/// Entry point of the library: one worker pool plus a cache of opened sources.
///
/// Opening the same path again while a handle to it is alive reuses its parsed index.
#[derive(Debug)]
pub struct Engine {
    scheduler: Scheduler,
    config: EngineConfig,
    handles: Mutex<HashMap<PathBuf, Weak<HandleInner>>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let scheduler = Scheduler::new(config.worker_threads)?;
        debug!("Engine started with {} worker threads", scheduler.num_threads());
        Ok(Self {
            scheduler,
            config,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn cached(&self, key: &Path) -> Option<SourceHandle> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.retain(|_, weak| weak.strong_count() > 0);
        handles
            .get(key)
            .and_then(Weak::upgrade)
            .map(SourceHandle::from_inner)
    }

    pub async fn open(&self, path: impl AsRef<Path>) -> Result<SourceHandle> {
        let path = path.as_ref().to_path_buf();
        let key = self
            .scheduler
            .run(move |_| {
                std::fs::canonicalize(&path).map_err(|e| SourceError::io(path.display().to_string(), e))
            })
            .await??;

        if let Some(handle) = self.cached(&key) {
            trace!("Reusing opened source '{}'", key.display());
            return Ok(handle);
        }

        let opened = SourceHandle::open(&key, self.scheduler.clone(), self.config.clone()).await?;

        // Another caller may have opened the same path meanwhile; keep a single index.
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = handles.get(&key).and_then(Weak::upgrade) {
            return Ok(SourceHandle::from_inner(existing));
        }
        handles.insert(key, opened.downgrade());
        Ok(opened)
    }

    pub async fn list(&self, path: impl AsRef<Path>) -> Result<Vec<Entry>> {
        self.open(path).await?.list().await
    }

    pub async fn peek(&self, path: impl AsRef<Path>, entry_path: &str) -> Result<Entry> {
        self.open(path).await?.peek(entry_path).await
    }

    pub async fn read_range(
        &self,
        path: impl AsRef<Path>,
        entry_path: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<RangeStream> {
        self.open(path).await?.read_range(entry_path, start, end).await
    }

    pub async fn generate_manifest(&self, path: impl AsRef<Path>, hooks: ProgressHooks) -> Result<Manifest> {
        self.open(path).await?.generate_manifest(hooks).await
    }

    /// Number of sources currently held open by live handles.
    pub fn open_sources(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.values().filter(|weak| weak.strong_count() > 0).count()
    }
}
