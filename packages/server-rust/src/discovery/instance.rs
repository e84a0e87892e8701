//! Observed instances and outbound registrations.

use std::fmt;
use std::time::Duration;

/// One registry entry for a service, immutable once observed.
///
/// Ordering is by address first so that instance sets sort the same way on
/// every gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Instance {
    /// Dialable `host:port`.
    pub address: String,
    /// Registry instance id.
    pub id: String,
    /// Whether every health check of the instance is passing.
    pub healthy: bool,
}

impl Instance {
    #[must_use]
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
            healthy: true,
        }
    }

    #[must_use]
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.id)
    }
}

/// HTTP health check attached to a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl HealthCheck {
    /// `GET http://<host>:<port>/health` every 10 s with a 3 s timeout.
    #[must_use]
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            url: format!("http://{host}:{port}/health"),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
        }
    }
}

/// What a node announces about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub service: String,
    pub host: String,
    pub port: u16,
    pub check: Option<HealthCheck>,
}

impl Registration {
    /// Registration with id `<service>-<host>:<port>` and no health check.
    #[must_use]
    pub fn new(service: &str, host: &str, port: u16) -> Self {
        Self {
            id: format!("{service}-{host}:{port}"),
            service: service.to_string(),
            host: host.to_string(),
            port,
            check: None,
        }
    }

    #[must_use]
    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.check = Some(check);
        self
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The instance a registry reports for this registration.
    #[must_use]
    pub fn instance(&self) -> Instance {
        Instance::new(self.id.clone(), self.address())
    }
}
