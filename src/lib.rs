//! notifier: library crate for the server binary and integration tests.
//!
//! Re-exports modules needed by integration tests in `tests/`.

pub mod api;
pub mod app;
pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod realtime;
pub mod store;
