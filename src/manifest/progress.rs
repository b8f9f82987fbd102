/// Reported once per entry, after all of its chunks were recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryProgress {
    pub path: String,

    /// 1-based position of the entry in listing order.
    pub current: usize,
    pub total: usize,
}

/// Reported once per chunk, after it was hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProgress {
    pub path: String,
    pub index: u64,
    pub count: u64,
    pub length: u64,

    /// Bytes of the current entry hashed so far, this chunk included.
    pub bytes_done: u64,
    pub bytes_total: u64,
}

type Hook<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Optional callbacks invoked from the worker thread running the generation.
#[derive(Default)]
pub struct ProgressHooks {
    on_entry: Option<Hook<EntryProgress>>,
    on_chunk: Option<Hook<ChunkProgress>>,
}

impl ProgressHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_entry<F>(mut self, f: F) -> Self
    where
        F: Fn(&EntryProgress) + Send + Sync + 'static,
    {
        self.on_entry = Some(Box::new(f));
        self
    }

    pub fn on_chunk<F>(mut self, f: F) -> Self
    where
        F: Fn(&ChunkProgress) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Box::new(f));
        self
    }

    pub(crate) fn entry(&self, progress: EntryProgress) {
        if let Some(f) = &self.on_entry {
            f(&progress);
        }
    }

    pub(crate) fn chunk(&self, progress: ChunkProgress) {
        if let Some(f) = &self.on_chunk {
            f(&progress);
        }
    }
}

impl std::fmt::Debug for ProgressHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ProgressHooks")
            .field("on_entry", &self.on_entry.is_some())
            .field("on_chunk", &self.on_chunk.is_some())
            .finish()
    }
}
