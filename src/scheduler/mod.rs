//! Scheduling: admission queue, worker pool, and the validation pipeline.

pub mod pool;
pub mod queue;
pub mod worker;

pub use pool::{Scheduler, SchedulerConfig};
pub use queue::JobQueue;
pub use worker::{
    BudgetConfig, Recorder, SessionPipeline, ValidationPipeline, WorkerContext,
};
