//! Axum HTTP server for on-demand resolution transcoding.
//!
//! This crate provides:
//! - `GET /{width}p/{filename}`: cached artifacts served statically, misses
//!   transcoded live while the cache artifact is written alongside
//! - Configuration loading and validation
//! - Graceful shutdown that kills and reaps in-flight encoders
//! - Prometheus metrics, request ids and request logging

pub mod body;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ConfigError, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use lifecycle::{shutdown_signal, DrainReport, Draining, Supervisor};
pub use routes::create_router;
pub use state::AppState;
