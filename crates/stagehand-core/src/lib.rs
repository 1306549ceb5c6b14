//! Coordination engine: workflow model, ticket service, executors, worker, and schedules.

pub mod error;
pub mod executor;
pub mod schedule;
pub mod state_policy;
pub mod ticket;
pub mod time_policy;
pub mod worker;
pub mod workflow;
