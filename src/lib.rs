//! Rent payment lifecycle and billing reconciliation engine.
//!
//! Creates rent obligations, drives them through the card/bank processor,
//! reconciles processor webhooks, bills autopay enrollments monthly and
//! handles manual and refund corrections.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
