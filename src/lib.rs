//! Calendar - event storage, notification scheduling and delivery
//!
//! Events are stored per owner with no overlapping intervals. A scheduler
//! publishes reminders for upcoming events onto a durable queue and purges
//! old events; a sender consumes the queue and writes each reminder out.

pub mod calendar;
pub mod config;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod sender;
pub mod storage;
pub mod utils;
