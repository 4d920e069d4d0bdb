//! Durable job state on the local filesystem.
//!
//! # Overview
//!
//! - **JobStore**: append-only init/progress/result logs, merged on read
//! - **ArtifactStore**: files produced by finished jobs, with checksums
//! - **CancelMarkers**: per-job cancellation flags
//!
//! Every write replaces its target atomically (temp file + rename), so
//! readers can run at any time alongside the saver.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trainforge::store::JobStore;
//!
//! let store = JobStore::new("./data");
//! store.append_init("p1", &record).await?;
//! let view = store.read_job("p1", &record.id).await?;
//! ```

pub mod artifacts;
pub mod cancel;
pub mod job_store;
pub mod json_log;
pub mod layout;

pub use artifacts::ArtifactStore;
pub use cancel::CancelMarkers;
pub use job_store::JobStore;
pub use layout::{validate_id, StoreLayout};
