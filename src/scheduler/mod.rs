//! Job orchestration: submission, execution and state persistence.
//!
//! This module provides the moving parts of the orchestrator:
//!
//! - **JobService**: submits, cancels and reads jobs
//! - **WorkerPool** / **Worker**: pull dispatched jobs and run them through a [`Trainer`]
//! - **Saver**: the single consumer that persists init, progress and result messages
//! - **MessageBus**: typed messages over a [`TaskQueue`] (Redis or in-memory)
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  JobService  │
//!                      │  (API/CLI)   │
//!                      └──┬────────┬──┘
//!              dispatch   │        │  init
//!                  ┌──────▼──┐  ┌──▼───────────────────┐
//!                  │ training│  │ init / state / result│
//!                  │  queue  │  │       channels       │
//!                  └────┬────┘  └──▲───────────────┬───┘
//!         ┌─────────────┼──────┐   │ progress,     │
//!         ▼             ▼      ▼   │ result        ▼
//!    ┌─────────┐   ┌─────────┐     │          ┌─────────┐      ┌──────────┐
//!    │ Worker 1│   │ Worker N│─────┘          │  Saver  │─────▶│ JobStore │
//!    └─────────┘   └─────────┘                └─────────┘      └──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trainforge::config::OrchestratorConfig;
//! use trainforge::scheduler::{JobService, MessageBus, RedisConnector, SubmitRequest};
//! use trainforge::store::{CancelMarkers, JobStore};
//! use std::sync::Arc;
//!
//! let config = OrchestratorConfig::from_env()?;
//! let connector = RedisConnector::new(&config.redis_url);
//! let bus = MessageBus::connect(&connector, config.channels.clone()).await?;
//!
//! let service = JobService::new(
//!     bus,
//!     Arc::new(JobStore::new(&config.workdir)),
//!     CancelMarkers::new(&config.workdir),
//! );
//! let job_id = service.submit(SubmitRequest::new("p1")).await?;
//! ```

pub mod bus;
pub mod job;
pub mod lifecycle;
pub mod messages;
pub mod queue;
pub mod saver;
pub mod trainer;
pub mod worker;
pub mod worker_pool;

pub use bus::{Delivery, MessageBus};
pub use job::{
    ArtifactRef, JobConfig, JobInitRecord, JobState, JobView, ProgressEntry, ResultEntry,
    SortOrder, SubmitRequest, TerminalStatus,
};
pub use lifecycle::JobService;
pub use messages::{
    Channel, DispatchPayload, InitMsg, MessageError, ProgressMsg, QueueMessage, ResultMsg,
};
pub use queue::{
    MemoryTaskQueue, QueueConnector, QueueError, RedisConnector, RedisTaskQueue, TaskQueue,
};
pub use saver::{Saver, SaverStats};
pub use trainer::{ArtifactOutput, SimulatedTrainer, Trainer, TrainingJob};
pub use worker::Worker;
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
