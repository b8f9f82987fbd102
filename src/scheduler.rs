use std::{
    backtrace::Backtrace,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;

use crate::error::{Result, SourceError};

/// Lets a running unit of work notice that nobody is waiting for it anymore.
pub struct Cancellation<'a> {
    is_closed: &'a dyn Fn() -> bool,
}

static NEVER_CLOSED: fn() -> bool = || false;

impl Cancellation<'static> {
    /// For work driven directly on the caller's thread, where nobody can go away.
    pub fn never() -> Self {
        Self {
            is_closed: &NEVER_CLOSED,
        }
    }
}

impl<'a> Cancellation<'a> {
    pub fn is_cancelled(&self) -> bool {
        (self.is_closed)()
    }

    /// Returns `Err(SourceError::Cancelled)` once the consumer went away.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        Ok(())
    }
}

/// Completion notification of a unit of work handed to a [`Scheduler`].
///
/// Dropping it before the unit starts means the unit never runs.
#[must_use = "dropping a task cancels it"]
pub struct Task<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> Future for Task<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| SourceError::WorkerLost))
    }
}

impl<R> Task<R> {
    /// Waits for the result from a thread that is not driving an async runtime.
    pub fn wait(self) -> Result<R> {
        self.rx.blocking_recv().map_err(|_| SourceError::WorkerLost)
    }
}

/// A pool of worker threads that runs blocking I/O and hashing off the caller's thread.
///
/// Clones share the same pool; every `Scheduler::new` builds an independent one.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<ThreadPool>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Scheduler({} threads)", self.pool.current_num_threads())
    }
}

impl Scheduler {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|id| format!("depot-worker-{id}"))
            .panic_handler(|info| {
                let msg = if let Some(s) = info.downcast_ref::<&str>() {
                    format!("Thread panic: {:?}", s)
                } else if let Some(s) = info.downcast_ref::<String>() {
                    format!("Thread panic: {:?}", s)
                } else {
                    "?".to_string()
                };

                error!("Task in worker pool panicked: {}", msg);
                eprintln!("Backtrace: {}", Backtrace::capture());
            })
            .build()
            .map_err(|e| SourceError::Io {
                path: "<worker pool>".to_string(),
                source: std::io::Error::other(e),
            })?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queues `task` on the pool. Side effects inside one task are ordered before
    /// its completion; there is no ordering between tasks.
    pub fn run<F, R>(&self, task: F) -> Task<R>
    where
        F: FnOnce(&Cancellation) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            if tx.is_closed() {
                trace!("Skipping task abandoned before it started");
                return;
            }

            let is_closed = || tx.is_closed();
            let result = task(&Cancellation {
                is_closed: &is_closed,
            });
            let _ = tx.send(result);
        });
        Task { rx }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Barrier,
        },
        time::{Duration, Instant},
    };

    use super::*;

    #[tokio::test]
    async fn task_result_is_delivered() -> Result<()> {
        let scheduler = Scheduler::new(2)?;
        let value = scheduler.run(|_| 40 + 2).await?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[tokio::test]
    async fn units_run_off_the_calling_thread() -> Result<()> {
        let scheduler = Scheduler::new(1)?;
        let caller = std::thread::current().id();
        let worker = scheduler.run(|_| std::thread::current().id()).await?;
        assert_ne!(caller, worker);
        Ok(())
    }

    #[test]
    fn dropped_task_never_starts() -> Result<()> {
        let scheduler = Scheduler::new(1)?;
        let ran = Arc::new(AtomicUsize::new(0));

        // Occupy the only worker so the next unit stays queued.
        let barrier = Arc::new(Barrier::new(2));
        let gate = barrier.clone();
        let blocker = scheduler.run(move |_| {
            gate.wait();
        });

        let counter = ran.clone();
        let queued = scheduler.run(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(queued);

        barrier.wait();
        blocker.wait()?;
        // A unit queued after the dropped one proves the queue drained.
        scheduler.run(|_| ()).wait()?;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn running_task_observes_cancellation() -> Result<()> {
        let scheduler = Scheduler::new(1)?;
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let task = scheduler.run(move |cancel| {
            let _ = started_tx.send(());
            let deadline = Instant::now() + Duration::from_secs(10);
            while !cancel.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            let _ = done_tx.send(cancel.check().is_err());
        });

        started_rx
            .recv()
            .map_err(|_| SourceError::WorkerLost)?;
        drop(task);

        let saw_cancel = done_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| SourceError::WorkerLost)?;
        assert!(saw_cancel);
        Ok(())
    }

    #[test]
    fn panicking_task_reports_worker_lost() -> Result<()> {
        let scheduler = Scheduler::new(1)?;
        let result = scheduler.run(|_| -> u8 { panic!("boom") }).wait();
        assert!(matches!(result, Err(SourceError::WorkerLost)));

        // The pool keeps working afterwards.
        assert_eq!(scheduler.run(|_| 7).wait()?, 7);
        Ok(())
    }
}
