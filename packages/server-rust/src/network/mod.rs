//! HTTP serving: configuration, middleware, probes and shutdown control.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use config::NetworkConfig;
pub use handlers::{AppState, UpstreamStatus};
pub use server::{drain, HttpServer, DRAIN_TIMEOUT};
pub use shutdown::{shutdown_signal, HealthState, InFlightGuard, ShutdownController};
