pub mod allocations;
pub mod health;
pub mod imports;
pub mod jobs;
pub mod payments;
pub mod penalties;
pub mod periods;
pub mod plots;

pub use health::{health_check, metrics_endpoint, readiness_check};
