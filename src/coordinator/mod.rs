//! HTTP coordinator: admin API, webhook ingress, and job accounting
//!
//! - [`server`] - axum server shell, shared state, background tasks
//! - [`api`] - admin surface (start/inspect/cancel jobs, exclusion rules)
//! - [`webhook`] - fetcher postback ingress driving the crawl state machine
//! - [`progress`] - job lifecycle helpers and completion detection

pub mod api;
pub mod progress;
pub mod server;
pub mod webhook;

pub use server::{AppState, CoordinatorServer};
