//! HTTP transport: axum router and server.

mod routes;
mod server;

pub use routes::{ApiError, HealthCheckResponse, routes};
pub use server::{ServerConfig, serve, serve_on};
