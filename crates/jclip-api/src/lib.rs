//! Axum HTTP API server for the clip transcoder.
//!
//! This crate provides:
//! - The job endpoints (`/generate`, `/status`, `/cancel`)
//! - History and media lookup endpoints
//! - Cookie sessions bound to the orchestrator's run epoch
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use session::{Session, SessionStore, SESSION_COOKIE};
pub use state::AppState;
