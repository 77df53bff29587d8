//! Bounded worker pool
//!
//! One dispatcher task claims jobs and runs each in its own task. A semaphore
//! bounds how many jobs run at once, since every job holds database
//! connections while it persists. The pool is started once by the process
//! entry point; starting it again is an error, never a second dispatcher.

use crate::queue::pipeline::settle_panicked;
use crate::queue::{process_job, ClaimedJob};
use crate::IngestContext;
use futures::FutureExt;
use simak_common::config::IngestConfig;
use simak_common::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Jobs processed simultaneously
    pub concurrency: usize,
    /// Idle re-check interval; enqueues wake the dispatcher sooner
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for WorkerOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            concurrency: config.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

pub struct WorkerPool {
    ctx: IngestContext,
    options: WorkerOptions,
    started: AtomicBool,
}

impl WorkerPool {
    pub fn new(ctx: IngestContext, options: WorkerOptions) -> Self {
        Self {
            ctx,
            options,
            started: AtomicBool::new(false),
        }
    }

    /// Recover abandoned jobs and start dispatching
    ///
    /// Errors with `InvalidInput` if this pool was already started.
    pub async fn start(&self) -> Result<WorkerHandle> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidInput("worker pool already started".to_string()));
        }

        if let Err(e) = self.ctx.queue.recover_abandoned().await {
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            self.ctx.clone(),
            self.options,
            cancel.clone(),
        ));

        info!(
            concurrency = self.options.concurrency,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "Transcript worker pool started"
        );

        Ok(WorkerHandle { cancel, dispatcher })
    }
}

/// Running pool; dropping it does not stop the dispatcher, `shutdown` does
pub struct WorkerHandle {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop claiming new jobs and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "Worker dispatcher terminated abnormally");
        }
        info!("Transcript worker pool stopped");
    }
}

async fn dispatch_loop(ctx: IngestContext, options: WorkerOptions, cancel: CancellationToken) {
    let permits = Arc::new(Semaphore::new(options.concurrency));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        // Reap finished tasks without waiting
        while let Some(Some(joined)) = in_flight.join_next().now_or_never() {
            if let Err(e) = joined {
                error!(error = %e, "Job task terminated abnormally");
            }
        }

        match ctx.queue.claim_next().await {
            Ok(Some(job)) => {
                let ctx = ctx.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    run_isolated(ctx, job).await;
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ctx.queue.notified() => {}
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
            }
            Err(e) => {
                drop(permit);
                warn!(error = %e, "Failed to claim job, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(options.poll_interval) => {}
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(in_flight = in_flight.len(), "Waiting for in-flight jobs");
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Job task terminated abnormally");
        }
    }
    debug!("Dispatcher loop exited");
}

/// Run the job in its own task so a panic is settled as a retryable failure
/// instead of leaving the job ACTIVE
async fn run_isolated(ctx: IngestContext, job: ClaimedJob) {
    let fallback = job.clone();
    let task_ctx = ctx.clone();

    if let Err(e) = tokio::spawn(async move { process_job(&task_ctx, job).await }).await {
        error!(job_id = %fallback.id, error = %e, "Job task panicked");
        settle_panicked(&ctx, &fallback, e.to_string()).await;
    }
}
