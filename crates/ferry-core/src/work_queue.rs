//! Bounded per-connection work queue.
//!
//! Jobs are admitted in FIFO order and at most `limit` of them run at once.
//! Submitting never blocks; the caller gets a [`JobHandle`] that resolves
//! when the job finishes, is discarded, or panics.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::trace;

/// Default number of jobs allowed to run concurrently per connection.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Why a job did not produce a value.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// The job panicked.
    #[error("Job panicked")]
    Panicked,

    /// The job was cleared from the queue before it started.
    #[error("Job discarded before start")]
    Discarded,

    /// The queue was closed when the job was submitted.
    #[error("Work queue closed")]
    Closed,
}

/// Completion handle for a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: oneshot::Receiver<Result<T, JobError>>,
}

impl<T> Future for JobHandle<T> {
    type Output = Result<T, JobError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without a result: the job never ran.
            Poll::Ready(Err(_)) => Poll::Ready(Err(JobError::Discarded)),
            Poll::Pending => Poll::Pending,
        }
    }
}

type Job = BoxFuture<'static, ()>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    active: usize,
    closed: bool,
}

/// A FIFO work queue with a fixed concurrency limit.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    limit: usize,
}

impl WorkQueue {
    /// Create a queue running at most `limit` jobs at once.
    ///
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            limit: limit.max(1),
        })
    }

    /// Get the concurrency limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of jobs waiting to start.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of jobs currently running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// Submit a job.
    ///
    /// The job starts once fewer than `limit` jobs are running and every job
    /// submitted before it has started. Must be called from within a tokio
    /// runtime.
    pub fn submit<F, T>(self: &Arc<Self>, job: F) -> JobHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        {
            let mut state = self.state.lock();
            if state.closed {
                let _ = tx.send(Err(JobError::Closed));
                return JobHandle { rx };
            }

            let wrapped = async move {
                let result = AssertUnwindSafe(job)
                    .catch_unwind()
                    .await
                    .map_err(|_| JobError::Panicked);
                let _ = tx.send(result);
            };
            state.pending.push_back(wrapped.boxed());
        }

        self.pump();
        JobHandle { rx }
    }

    /// Discard every job that has not started yet.
    ///
    /// Running jobs are unaffected. Returns the number of discarded jobs.
    pub fn clear(&self) -> usize {
        let discarded: Vec<Job> = self.state.lock().pending.drain(..).collect();
        // Dropped outside the lock; each drop resolves a handle as Discarded.
        discarded.len()
    }

    /// Discard pending jobs and refuse new ones.
    pub fn close(&self) -> usize {
        let discarded: Vec<Job> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain(..).collect()
        };
        discarded.len()
    }

    /// Check if the queue refuses new jobs.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn pump(self: &Arc<Self>) {
        let mut state = self.state.lock();
        while state.active < self.limit {
            let Some(job) = state.pending.pop_front() else {
                break;
            };
            state.active += 1;
            trace!(active = state.active, pending = state.pending.len(), "Starting job");

            let queue = Arc::clone(self);
            tokio::spawn(async move {
                job.await;
                queue.complete();
            });
        }
    }

    fn complete(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.pump();
    }
}
