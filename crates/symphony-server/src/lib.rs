//! # Symphony Server
//!
//! HTTP front end for the Symphony chat hub: the WebSocket endpoint, health
//! and statistics endpoints, configuration and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
