// Scheduler loop: delay resolution and per-delivery evaluation

pub mod decision;
pub mod engine;

pub use decision::{decide, Decision, DEFAULT_THRESHOLD_MS, MAX_TTL_MS};
pub use engine::{Evaluation, SchedulerConfig, SchedulerService};
