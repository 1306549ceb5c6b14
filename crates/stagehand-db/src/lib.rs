//! Postgres-backed storage for tickets, tasks, and their supporting tables.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
