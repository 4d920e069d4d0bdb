//! Typed messages exchanged over the broker.
//!
//! Every payload on the wire is JSON carrying at least `pid` and `jid`.
//! Payloads are decoded into a fixed record at the channel boundary and
//! never handled as untyped maps past that point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::{
    ArtifactRef, JobConfig, JobInitRecord, ProgressEntry, ResultEntry, TerminalStatus,
};

/// Errors raised while decoding a broker payload.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload is missing its pid/jid identity")]
    MissingIdentity,

    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),
}

/// The three logical state channels drained by the saver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Init,
    Progress,
    Result,
}

impl Channel {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Init => "init",
            Channel::Progress => "progress",
            Channel::Result => "result",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pushed once per job by the submission path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMsg {
    pub pid: String,
    pub jid: String,
    pub name: String,
    #[serde(default)]
    pub config: JobConfig,
    pub created_at: DateTime<Utc>,
}

impl InitMsg {
    pub fn from_record(record: &JobInitRecord) -> Self {
        Self {
            pid: record.project_id.clone(),
            jid: record.id.clone(),
            name: record.name.clone(),
            config: record.config.clone(),
            created_at: record.created_at,
        }
    }

    pub fn into_record(self) -> JobInitRecord {
        JobInitRecord {
            id: self.jid,
            project_id: self.pid,
            name: self.name,
            config: self.config,
            created_at: self.created_at,
        }
    }
}

/// Pushed by a worker after each unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMsg {
    pub pid: String,
    pub jid: String,
    pub progress: u8,
    pub elapsed_ms: u64,
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl ProgressMsg {
    pub fn new(pid: impl Into<String>, jid: impl Into<String>, progress: u8, elapsed_ms: u64) -> Self {
        Self {
            pid: pid.into(),
            jid: jid.into(),
            progress: progress.min(100),
            elapsed_ms,
            emitted_at: Utc::now(),
        }
    }

    pub fn to_entry(&self) -> ProgressEntry {
        ProgressEntry {
            progress: self.progress.min(100),
            elapsed_ms: self.elapsed_ms,
            timestamp: self.emitted_at,
        }
    }
}

/// Pushed by a worker once the job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMsg {
    pub pid: String,
    pub jid: String,
    pub status: TerminalStatus,
    #[serde(default)]
    pub artifact_refs: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub finished_at: DateTime<Utc>,
}

impl ResultMsg {
    fn new(pid: &str, jid: &str, status: TerminalStatus, worker_id: &str) -> Self {
        Self {
            pid: pid.to_string(),
            jid: jid.to_string(),
            status,
            artifact_refs: Vec::new(),
            error: None,
            progress: 0,
            elapsed_ms: 0,
            worker_id: Some(worker_id.to_string()),
            finished_at: Utc::now(),
        }
    }

    /// Creates a result for a job that ran to completion.
    pub fn completed(
        pid: &str,
        jid: &str,
        worker_id: &str,
        artifact_refs: Vec<ArtifactRef>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            artifact_refs,
            progress: 100,
            elapsed_ms,
            ..Self::new(pid, jid, TerminalStatus::Completed, worker_id)
        }
    }

    /// Creates a result for a job whose unit of work failed.
    pub fn failed(
        pid: &str,
        jid: &str,
        worker_id: &str,
        error: impl Into<String>,
        progress: u8,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            error: Some(error.into()),
            progress,
            elapsed_ms,
            ..Self::new(pid, jid, TerminalStatus::Failed, worker_id)
        }
    }

    /// Creates a result for a job that observed its cancellation marker.
    pub fn cancelled(pid: &str, jid: &str, worker_id: &str, progress: u8, elapsed_ms: u64) -> Self {
        Self {
            progress,
            elapsed_ms,
            ..Self::new(pid, jid, TerminalStatus::Cancelled, worker_id)
        }
    }

    pub fn to_entry(&self) -> ResultEntry {
        ResultEntry {
            status: self.status,
            timestamp: self.finished_at,
            artifact_refs: self.artifact_refs.clone(),
            error: self.error.clone(),
            elapsed_ms: self.elapsed_ms,
            worker_id: self.worker_id.clone(),
        }
    }
}

/// A decoded message from one of the three state channels.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMessage {
    Init(InitMsg),
    Progress(ProgressMsg),
    Result(ResultMsg),
}

impl QueueMessage {
    pub fn channel(&self) -> Channel {
        match self {
            QueueMessage::Init(_) => Channel::Init,
            QueueMessage::Progress(_) => Channel::Progress,
            QueueMessage::Result(_) => Channel::Result,
        }
    }

    pub fn pid(&self) -> &str {
        match self {
            QueueMessage::Init(m) => &m.pid,
            QueueMessage::Progress(m) => &m.pid,
            QueueMessage::Result(m) => &m.pid,
        }
    }

    pub fn jid(&self) -> &str {
        match self {
            QueueMessage::Init(m) => &m.jid,
            QueueMessage::Progress(m) => &m.jid,
            QueueMessage::Result(m) => &m.jid,
        }
    }

    /// Serializes the message body (the channel travels separately).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            QueueMessage::Init(m) => serde_json::to_string(m),
            QueueMessage::Progress(m) => serde_json::to_string(m),
            QueueMessage::Result(m) => serde_json::to_string(m),
        }
    }

    /// Decodes a payload according to the channel it arrived on.
    pub fn decode(channel: Channel, raw: &str) -> Result<Self, MessageError> {
        let message = match channel {
            Channel::Init => QueueMessage::Init(serde_json::from_str(raw)?),
            Channel::Progress => QueueMessage::Progress(serde_json::from_str(raw)?),
            Channel::Result => QueueMessage::Result(serde_json::from_str(raw)?),
        };

        if message.pid().trim().is_empty() || message.jid().trim().is_empty() {
            return Err(MessageError::MissingIdentity);
        }

        Ok(message)
    }
}

/// Work item delivered to exactly one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub pid: String,
    pub jid: String,
    #[serde(default)]
    pub config: JobConfig,
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,
}

impl DispatchPayload {
    pub fn new(pid: impl Into<String>, jid: impl Into<String>, config: JobConfig) -> Self {
        Self {
            pid: pid.into(),
            jid: jid.into(),
            config,
            enqueued_at: Utc::now(),
        }
    }
}
