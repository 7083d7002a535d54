//! Generic bounded-concurrency driver for one-shot jobs.
//!
//! Used wherever a bag of independent jobs must run with a concurrency
//! cap: probing server capabilities, creating nested remote root folders
//! one level at a time, and in tests. The driver re-evaluates its queue
//! whenever a child finishes; jobs added through a [`CompositeHandle`]
//! while the driver runs are picked up at the next completion.

use std::collections::VecDeque;

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;

/// What to do when a child job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Abort all running children and finish with the first error.
    StopOnFirstError,
    /// Run every child; finish with the first error observed, if any.
    RunAllJobs,
}

type Job<E> = LocalBoxFuture<'static, Result<(), E>>;

/// Handle for adding jobs to a running [`CompositeExecutor`].
pub struct CompositeHandle<E> {
    tx: mpsc::UnboundedSender<Job<E>>,
}

impl<E> Clone for CompositeHandle<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> CompositeHandle<E> {
    /// Enqueue a job. Returns false if the executor already finished.
    pub fn add<F>(&self, job: F) -> bool
    where
        F: std::future::Future<Output = Result<(), E>> + 'static,
    {
        self.tx.send(job.boxed_local()).is_ok()
    }
}

/// Drives an arbitrary set of one-shot jobs with bounded concurrency.
pub struct CompositeExecutor<E> {
    max_jobs: usize,
    error_mode: ErrorMode,
    pending: VecDeque<Job<E>>,
    tx: mpsc::UnboundedSender<Job<E>>,
    rx: mpsc::UnboundedReceiver<Job<E>>,
}

impl<E> CompositeExecutor<E> {
    pub fn new(error_mode: ErrorMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            max_jobs: 12,
            error_mode,
            pending: VecDeque::new(),
            tx,
            rx,
        }
    }

    /// Cap on concurrently running jobs; values below 1 are clamped.
    pub fn set_max_jobs(&mut self, max_jobs: usize) {
        self.max_jobs = max_jobs.max(1);
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }

    /// Enqueue a job before the run starts.
    pub fn add<F>(&mut self, job: F)
    where
        F: std::future::Future<Output = Result<(), E>> + 'static,
    {
        self.pending.push_back(job.boxed_local());
    }

    /// A handle through which jobs can be added while the executor runs.
    pub fn handle(&self) -> CompositeHandle<E> {
        CompositeHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run all jobs to completion. Finishes once the queue (including
    /// handle additions observed so far) is drained and nothing is
    /// running.
    pub async fn run(mut self) -> Result<(), E> {
        // Our own sender must not keep the channel alive artificially.
        drop(self.tx);

        let mut running: FuturesUnordered<Job<E>> = FuturesUnordered::new();
        let mut first_error: Option<E> = None;

        loop {
            while let Ok(job) = self.rx.try_recv() {
                self.pending.push_back(job);
            }
            while running.len() < self.max_jobs {
                match self.pending.pop_front() {
                    Some(job) => running.push(job),
                    None => break,
                }
            }
            if running.is_empty() {
                if self.pending.is_empty() {
                    break;
                }
                continue;
            }

            match running.next().await {
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    if self.error_mode == ErrorMode::StopOnFirstError {
                        // Dropping the set aborts the remaining children.
                        drop(running);
                        self.pending.clear();
                        break;
                    }
                }
                None => break,
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
