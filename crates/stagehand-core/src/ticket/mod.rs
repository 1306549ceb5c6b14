//! Ticket creation, lifecycle operations, and the read-only summary projection.

pub mod service;
pub mod summary;
