//! Probe handlers and the state they read.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};

/// Live instance counts per upstream service, reported by `/health`.
pub trait UpstreamStatus: Send + Sync {
    fn instance_counts(&self) -> BTreeMap<String, usize>;
}

/// Shared state passed to the probe handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start time, used for uptime calculation.
    pub start_time: Instant,
    /// Present on the gateway only.
    pub upstreams: Option<Arc<dyn UpstreamStatus>>,
}
