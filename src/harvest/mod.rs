//! Ingestion orchestration
//!
//! - [`config`] - run tunables and backoff constants
//! - [`rate_limit`] - sliding-window limiter shared by all workers
//! - [`task`] - search tasks and the per-code / per-run state machines
//! - [`state`] - run counters exposed through snapshots
//! - [`progress`] - periodic `[PROGRESS]` log lines
//! - [`pipeline`] - the orchestrator itself

pub mod config;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod state;
pub mod task;

pub use config::{ConfigError, HarvestConfig};
pub use pipeline::{HarvestRequest, IngestionError, IngestionPipeline, RunReport};
pub use rate_limit::RateLimiter;
pub use state::IngestionState;
pub use task::{CodeStatus, RunStatus, SearchTask};
