//! Picscribe Gateway HTTP API Server
//!
//! Provides the analysis endpoints, health and model reporting, and the
//! error-to-response mapping.

pub mod analyze_api;
pub mod attachments;
pub mod error;
pub mod health_api;
pub mod server;


pub use error::ApiError;
pub use server::{build_router, serve, shutdown_signal, start_server, GatewayState};
