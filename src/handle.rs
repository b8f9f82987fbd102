use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::EngineConfig,
    error::Result,
    manifest::{Manifest, ManifestGenerator, ProgressHooks, VerifyReport},
    range_stream::{resolve_range, RangeStream, StreamOptions},
    scheduler::Scheduler,
    source::{open_source, Entry, VirtualSource},
};

#[derive(Debug)]
pub(crate) struct HandleInner {
    source: Arc<dyn VirtualSource>,
    scheduler: Scheduler,
    config: EngineConfig,
}

/// An opened source whose parsed index is shared by every clone of the handle.
///
/// All operations run on the scheduler and only read the index, so any number of them
/// may be in flight at once. Dropping the last clone releases the index.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    inner: Arc<HandleInner>,
}

impl SourceHandle {
    /// Parses the source at `path` on the scheduler.
    pub async fn open(path: impl AsRef<Path>, scheduler: Scheduler, config: EngineConfig) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let source = scheduler.run(move |_| open_source(&path)).await??;
        Ok(Self::from_source(source, scheduler, config))
    }

    pub fn from_source(source: Arc<dyn VirtualSource>, scheduler: Scheduler, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                source,
                scheduler,
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<HandleInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn root(&self) -> &Path {
        self.inner.source.root()
    }

    pub fn source(&self) -> &Arc<dyn VirtualSource> {
        &self.inner.source
    }

    pub async fn list(&self) -> Result<Vec<Entry>> {
        let source = self.inner.source.clone();
        self.inner.scheduler.run(move |_| source.list_entries()).await?
    }

    pub async fn peek(&self, path: &str) -> Result<Entry> {
        let source = self.inner.source.clone();
        let path = path.to_string();
        self.inner.scheduler.run(move |_| source.entry(&path)).await?
    }

    /// Streams `[start, end)` of an entry. Omitted offsets cover the whole entry.
    ///
    /// Lookup and bounds errors are returned here; read errors arrive through the stream.
    pub async fn read_range(&self, path: &str, start: Option<u64>, end: Option<u64>) -> Result<RangeStream> {
        let entry = self.peek(path).await?;
        let range = resolve_range(&entry, start, end)?;
        trace!("Streaming {:?} of '{}'", range, entry.path);

        Ok(RangeStream::spawn(
            &self.inner.scheduler,
            self.inner.source.clone(),
            entry,
            range,
            StreamOptions {
                buffer_size: self.inner.config.stream_buffer_size,
                queue_depth: self.inner.config.stream_queue_depth,
            },
        ))
    }

    /// Generator used by [`Self::generate_manifest`] and [`Self::verify_manifest`].
    pub fn generator(&self) -> ManifestGenerator {
        ManifestGenerator::new(self.inner.config.hash_window_size)
    }

    /// Dropping the returned future abandons generation: a pending one never starts and a
    /// running one stops at its next read window.
    pub async fn generate_manifest(&self, hooks: ProgressHooks) -> Result<Manifest> {
        self.generate_manifest_with(self.generator(), hooks).await
    }

    pub async fn generate_manifest_with(
        &self,
        generator: ManifestGenerator,
        hooks: ProgressHooks,
    ) -> Result<Manifest> {
        let source = self.inner.source.clone();
        self.inner
            .scheduler
            .run(move |cancel| generator.generate(source.as_ref(), &hooks, cancel))
            .await?
    }

    pub async fn verify_manifest(&self, manifest: Manifest) -> Result<VerifyReport> {
        self.verify_manifest_with(self.generator(), manifest).await
    }

    pub async fn verify_manifest_with(
        &self,
        generator: ManifestGenerator,
        manifest: Manifest,
    ) -> Result<VerifyReport> {
        let source = self.inner.source.clone();
        self.inner
            .scheduler
            .run(move |cancel| generator.verify(source.as_ref(), &manifest, cancel))
            .await?
    }
}
