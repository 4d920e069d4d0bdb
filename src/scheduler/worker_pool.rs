//! Worker pool for processing jobs from the dispatch queue.
//!
//! This module provides a pool of workers that pull jobs from the shared
//! dispatch channel. Each worker runs as an independent async task with its
//! own broker connection and executes at most one job at a time.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ChannelNames, OrchestratorConfig};
use crate::metrics::MetricsCollector;
use crate::store::{ArtifactStore, CancelMarkers};

use super::bus::{Delivery, MessageBus};
use super::job::TerminalStatus;
use super::queue::{QueueConnector, QueueError};
use super::trainer::Trainer;
use super::worker::Worker;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to connect to the task queue.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Broker channel names.
    pub channels: ChannelNames,
    /// Blocking-pop timeout on the dispatch channel.
    pub poll_interval: Duration,
    /// Units of work between cancellation checks.
    pub cancel_check_every: u32,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 2,
            channels: ChannelNames::default(),
            poll_interval: Duration::from_secs(1),
            cancel_check_every: 1,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Derives the pool settings from the orchestrator configuration.
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            num_workers: config.worker.num_workers,
            channels: config.channels.clone(),
            poll_interval: config.worker.poll_interval,
            cancel_check_every: config.worker.cancel_check_every,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Sets the channel names.
    pub fn with_channels(mut self, channels: ChannelNames) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the cancellation check cadence.
    pub fn with_cancel_check_every(mut self, every: u32) -> Self {
        self.cancel_check_every = every;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs completed successfully.
    pub jobs_completed: u64,
    /// Total number of jobs that failed.
    pub jobs_failed: u64,
    /// Total number of jobs stopped by cancellation.
    pub jobs_cancelled: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed + self.jobs_cancelled
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record(&self, status: TerminalStatus, duration: Duration) {
        let counter = match status {
            TerminalStatus::Completed => &self.jobs_completed,
            TerminalStatus::Failed => &self.jobs_failed,
            TerminalStatus::Cancelled => &self.jobs_cancelled,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let cancelled = self.jobs_cancelled.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed + cancelled;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_cancelled: cancelled,
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    connector: Arc<dyn QueueConnector>,
    trainer: Arc<dyn Trainer>,
    artifacts: ArtifactStore,
    cancellations: CancelMarkers,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
    metrics: MetricsCollector,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// No connection is opened until [`WorkerPool::start`]; each worker then
    /// connects its own broker handle through `connector`.
    pub fn new(
        config: WorkerPoolConfig,
        connector: Arc<dyn QueueConnector>,
        trainer: Arc<dyn Trainer>,
        artifacts: ArtifactStore,
        cancellations: CancelMarkers,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            connector,
            trainer,
            artifacts,
            cancellations,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
            metrics: MetricsCollector::new(),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running, or
    /// `PoolError::QueueConnection` if any worker cannot connect, in which
    /// case no worker is spawned.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        let mut buses = Vec::with_capacity(self.config.num_workers);
        for _ in 0..self.config.num_workers {
            buses.push(
                MessageBus::connect(self.connector.as_ref(), self.config.channels.clone()).await?,
            );
        }

        for (i, bus) in buses.into_iter().enumerate() {
            let worker = Worker::new(
                format!("worker-{}", i),
                bus,
                Arc::clone(&self.trainer),
                self.artifacts.clone(),
                self.cancellations.clone(),
            )
            .with_cancel_check_every(self.config.cancel_check_every);

            let pool_worker = PoolWorker {
                worker,
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                stats: Arc::clone(&self.stats),
                metrics: self.metrics.clone(),
            };

            let handle = tokio::spawn(async move {
                pool_worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish the job they are executing before stopping.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout. Workers still running at that point are
    /// aborted.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let mut handles: Vec<JoinHandle<()>> = self.worker_handles.drain(..).collect();
        let shutdown_future = async {
            for handle in handles.iter_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let outcome = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(0);

        match outcome {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                for handle in &handles {
                    handle.abort();
                }
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// Dispatch loop around one `Worker`.
struct PoolWorker {
    worker: Worker,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl PoolWorker {
    /// Polls for jobs and executes them until a shutdown signal is received.
    async fn run(mut self) {
        let worker_id = self.worker.id().to_string();
        info!(worker_id = %worker_id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %worker_id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.worker.bus().next_dispatch(self.poll_interval).await {
                Ok(Some(Delivery::Message(payload))) => {
                    if let Ok(depth) = self.worker.bus().pending_dispatch().await {
                        self.metrics
                            .update_queue_depth(&self.worker.bus().channels().dispatch, depth);
                    }

                    let started = Instant::now();
                    self.stats.increment_active();
                    self.metrics
                        .update_workers(self.stats.active_workers.load(Ordering::SeqCst) as usize);

                    let result = self.worker.execute(&payload).await;

                    self.stats.decrement_active();
                    self.metrics
                        .update_workers(self.stats.active_workers.load(Ordering::SeqCst) as usize);
                    self.stats.record(result.status, started.elapsed());
                }
                Ok(Some(Delivery::Undecodable { channel, error })) => {
                    warn!(
                        worker_id = %worker_id,
                        channel = %channel,
                        error = %error,
                        "Dropping undecodable work item"
                    );
                }
                Ok(None) => {
                    // The pop already waited poll_interval
                    debug!(worker_id = %worker_id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %worker_id, "Worker stopped");
    }
}
