//! The state synchronizer.
//!
//! A single `Saver` drains the init, progress and result channels and turns
//! each message into a store append. It is the only writer of job history,
//! so one saver per work directory keeps every log append-ordered.
//!
//! Messages are popped without acknowledgement. If the process dies between
//! a pop and the matching write, that one update is lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::metrics::{MetricsCollector, SaverOutcome};
use crate::store::JobStore;

use super::bus::{Delivery, MessageBus};
use super::job::JobState;
use super::messages::{InitMsg, ProgressMsg, QueueMessage, ResultMsg};
use super::queue::QueueError;

/// Counters for one saver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaverStats {
    pub persisted: u64,
    pub undecodable: u64,
    pub write_failures: u64,
    /// Persisted messages that broke the job state machine.
    pub out_of_order: u64,
}

/// Persists broker traffic into the job store.
pub struct Saver {
    bus: MessageBus,
    store: Arc<JobStore>,
    poll_timeout: Duration,
    stats: SaverStats,
    metrics: MetricsCollector,
}

impl Saver {
    pub fn new(bus: MessageBus, store: Arc<JobStore>, poll_timeout: Duration) -> Self {
        Self {
            bus,
            store,
            poll_timeout,
            stats: SaverStats::default(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn stats(&self) -> &SaverStats {
        &self.stats
    }

    /// Drains messages until `stop` fires, then drops the broker handle.
    ///
    /// The stop signal is observed between messages; a message already
    /// popped is always written first.
    pub async fn run(mut self, mut stop: broadcast::Receiver<()>) -> SaverStats {
        info!(
            timeout_ms = self.poll_timeout.as_millis() as u64,
            "Saver started"
        );

        loop {
            match stop.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!("Saver received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.poll_once().await {
                Ok(true) => tokio::task::yield_now().await,
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "Failed to pop from state channels");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_timeout) => {}
                        _ = stop.recv() => {
                            info!("Saver received shutdown signal");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            persisted = self.stats.persisted,
            undecodable = self.stats.undecodable,
            write_failures = self.stats.write_failures,
            out_of_order = self.stats.out_of_order,
            "Saver stopped"
        );
        self.stats
    }

    /// Waits for one message and handles it.
    ///
    /// Returns `Ok(false)` when the poll timed out with nothing to do.
    pub async fn poll_once(&mut self) -> Result<bool, QueueError> {
        let Some(delivery) = self.bus.next_message(self.poll_timeout).await? else {
            return Ok(false);
        };

        match delivery {
            Delivery::Message(message) => {
                let channel = message.channel();
                let outcome = match self.handle(&message).await {
                    Ok(in_order) => {
                        self.stats.persisted += 1;
                        if !in_order {
                            self.stats.out_of_order += 1;
                        }
                        SaverOutcome::Persisted
                    }
                    Err(e) => {
                        self.stats.write_failures += 1;
                        error!(
                            channel = %channel,
                            project_id = message.pid(),
                            job_id = message.jid(),
                            error = %e,
                            "Failed to persist message, dropping it"
                        );
                        SaverOutcome::WriteFailed
                    }
                };
                self.metrics.record_saver_message(channel.as_str(), outcome);
            }
            Delivery::Undecodable { channel, error } => {
                self.stats.undecodable += 1;
                warn!(channel = %channel, error = %error, "Dropping undecodable message");
                self.metrics
                    .record_saver_message(&channel, SaverOutcome::Undecodable);
            }
        }

        Ok(true)
    }

    /// Writes one decoded message into the store.
    ///
    /// Returns `Ok(false)` when the message was persisted but did not follow
    /// the job state machine (progress after a terminal result, a second
    /// terminal result, or progress going backwards).
    pub async fn handle(&self, message: &QueueMessage) -> Result<bool, StoreError> {
        match message {
            QueueMessage::Init(msg) => self.save_init(msg).await,
            QueueMessage::Progress(msg) => self.save_progress(msg).await,
            QueueMessage::Result(msg) => self.save_result(msg).await,
        }
    }

    async fn save_init(&self, msg: &InitMsg) -> Result<bool, StoreError> {
        let record = msg.clone().into_record();
        let created = self.store.append_init(&msg.pid, &record).await?;

        if created {
            debug!(project_id = %msg.pid, job_id = %msg.jid, "Saved init record");
            self.log_line(&msg.pid, &msg.jid, &format!("Job '{}' created", msg.name))
                .await;
        } else {
            warn!(project_id = %msg.pid, job_id = %msg.jid, "Duplicate init message ignored");
        }
        Ok(true)
    }

    async fn save_progress(&self, msg: &ProgressMsg) -> Result<bool, StoreError> {
        let current = self.store.current_state(&msg.pid, &msg.jid).await?;
        let mut in_order = current.can_transition_to(JobState::Running);
        if !in_order {
            warn!(
                project_id = %msg.pid,
                job_id = %msg.jid,
                state = %current,
                progress = msg.progress,
                "Progress received after terminal result"
            );
        }

        let previous = self
            .store
            .append_progress(&msg.pid, &msg.jid, &msg.to_entry())
            .await?;

        match previous {
            None => self.log_line(&msg.pid, &msg.jid, "Job started").await,
            Some(previous) if msg.progress < previous.progress => {
                in_order = false;
                warn!(
                    project_id = %msg.pid,
                    job_id = %msg.jid,
                    previous = previous.progress,
                    progress = msg.progress,
                    "Progress went backwards"
                );
            }
            Some(_) => {}
        }

        debug!(project_id = %msg.pid, job_id = %msg.jid, progress = msg.progress, "Saved progress");
        self.log_line(
            &msg.pid,
            &msg.jid,
            &format!("Progress {}% ({} ms elapsed)", msg.progress, msg.elapsed_ms),
        )
        .await;
        Ok(in_order)
    }

    async fn save_result(&self, msg: &ResultMsg) -> Result<bool, StoreError> {
        let current = self.store.current_state(&msg.pid, &msg.jid).await?;
        let in_order = current.can_transition_to(JobState::from(msg.status));

        let prior = self
            .store
            .append_result(&msg.pid, &msg.jid, &msg.to_entry())
            .await?;

        if !in_order {
            warn!(
                project_id = %msg.pid,
                job_id = %msg.jid,
                state = %current,
                status = %msg.status,
                prior_results = prior,
                "Duplicate terminal result"
            );
        }

        info!(project_id = %msg.pid, job_id = %msg.jid, status = %msg.status, "Saved result");
        let line = match &msg.error {
            Some(error) => format!("Job {}: {}", msg.status, error),
            None => format!("Job {}", msg.status),
        };
        self.log_line(&msg.pid, &msg.jid, &line).await;
        Ok(in_order)
    }

    /// The event log is best-effort; failures never drop the message.
    async fn log_line(&self, project_id: &str, job_id: &str, line: &str) {
        if let Err(e) = self.store.append_log(project_id, job_id, line).await {
            warn!(project_id, job_id, error = %e, "Failed to append to job log");
        }
    }
}
