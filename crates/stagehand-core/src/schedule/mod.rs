//! Recurring and one-shot ticket materialization from [`stagehand_db::models::TicketSchedule`].

pub mod service;
