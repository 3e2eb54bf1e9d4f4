//! Background office jobs: a bounded worker pool with retries and timeouts.

pub mod handler;
pub mod runner;

pub use handler::{JobHandler, LedgerJobHandler};
pub use runner::{JobProgress, JobRunner};
