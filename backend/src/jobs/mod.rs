// Background Jobs
//
// Scheduled work for the automation engine: cron-triggered rules and the
// missed task deadline sweep. Jobs run on tokio-cron-scheduler.

pub mod deadline_sweep;
pub mod scheduler;

pub use deadline_sweep::DeadlineSweepJob;
pub use scheduler::{JobError, JobResult, JobScheduler};
