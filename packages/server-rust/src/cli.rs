//! Command line: `gateway`, `serve <service>` and `dev`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::discovery::{ConsulRegistry, DiscoveryConfig, MemoryRegistry, RegistryClient};
use crate::gateway::{self, GatewayConfig};
use crate::network::{shutdown_signal, NetworkConfig, ShutdownController};
use crate::node::{self, NodeConfig, ServiceKind};
use crate::resilience::{BreakerConfig, DispatchConfig, RetryConfig};
use crate::service::config::{ChainConfig, DomainConfig};
use crate::storage::{StorageBackend, StorageConfig};
use crate::telemetry::{self, LogFormat};
use crate::transport::rpc::RpcClientConfig;

#[derive(Debug, Parser)]
#[command(name = "storefront", version)]
#[command(about = "Storefront gateway and domain service nodes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log output style.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Serve Prometheus metrics on this address.
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Public HTTP gateway dispatching to registered service nodes
    Gateway(GatewayArgs),

    /// One domain service node
    Serve(ServeArgs),

    /// All three services and the gateway in one process, over an in-memory registry
    Dev(DevArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RegistryKind {
    Consul,
    Memory,
}

#[derive(Debug, Args)]
pub struct RegistryArgs {
    #[arg(long, value_enum, default_value_t = RegistryKind::Consul)]
    pub registry: RegistryKind,

    /// Consul agent HTTP address
    #[arg(long, default_value = "http://127.0.0.1:8500")]
    pub consul_addr: String,
}

impl RegistryArgs {
    /// # Errors
    ///
    /// Returns an error if the Consul client cannot be built.
    pub fn connect(&self) -> anyhow::Result<Arc<dyn RegistryClient>> {
        Ok(match self.registry {
            RegistryKind::Consul => Arc::new(ConsulRegistry::new(self.consul_addr.clone())?),
            RegistryKind::Memory => Arc::new(MemoryRegistry::new()),
        })
    }
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    /// Attempts per call, the first one included
    #[arg(long, default_value_t = 3)]
    pub retry_max: u32,

    /// Budget shared by all attempts of one call
    #[arg(long, default_value_t = 500)]
    pub retry_timeout_ms: u64,

    /// Consecutive failures that open an operation's breaker
    #[arg(long, default_value_t = 5)]
    pub breaker_threshold: u32,

    #[arg(long, default_value_t = 60_000)]
    pub breaker_cooldown_ms: u64,
}

impl DispatchArgs {
    #[must_use]
    pub fn config(&self) -> DispatchConfig {
        DispatchConfig {
            retry: RetryConfig {
                max_attempts: self.retry_max,
                total_timeout: Duration::from_millis(self.retry_timeout_ms),
            },
            breaker: self.breaker(),
        }
    }

    fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_threshold,
            cooldown: Duration::from_millis(self.breaker_cooldown_ms),
        }
    }
}

#[derive(Debug, Args)]
pub struct DomainArgs {
    /// HS256 secret for login tokens
    #[arg(long, env = "STOREFRONT_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

impl DomainArgs {
    #[must_use]
    pub fn config(&self) -> DomainConfig {
        let defaults = DomainConfig::default();
        DomainConfig {
            jwt_secret: self.jwt_secret.clone().unwrap_or(defaults.jwt_secret),
            max_upload_bytes: self.max_upload_bytes,
            ..defaults
        }
    }
}

#[derive(Debug, Args)]
pub struct GatewayArgs {
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub http_addr: SocketAddr,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[command(flatten)]
    pub dispatch: DispatchArgs,
}

impl GatewayArgs {
    #[must_use]
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            network: network_config(self.http_addr),
            discovery: DiscoveryConfig::default(),
            dispatch: self.dispatch.config(),
            rpc: RpcClientConfig::default(),
        }
    }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(value_enum)]
    pub service: ServiceKind,

    #[arg(long, default_value = "0.0.0.0:0")]
    pub http_addr: SocketAddr,

    #[arg(long, default_value = "0.0.0.0:0")]
    pub rpc_addr: SocketAddr,

    /// Host announced to the registry
    #[arg(long, default_value = "127.0.0.1")]
    pub advertise_host: String,

    #[arg(long, default_value = "memory")]
    pub storage: StorageBackend,

    #[command(flatten)]
    pub domain: DomainArgs,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Breaker threshold of each server-side operation chain
    #[arg(long, default_value_t = 5)]
    pub breaker_threshold: u32,

    #[arg(long, default_value_t = 60_000)]
    pub breaker_cooldown_ms: u64,
}

impl ServeArgs {
    #[must_use]
    pub fn config(&self) -> NodeConfig {
        NodeConfig {
            network: network_config(self.http_addr),
            rpc_addr: self.rpc_addr.to_string(),
            advertise_host: self.advertise_host.clone(),
            storage: StorageConfig {
                backend: self.storage,
            },
            domain: self.domain.config(),
            chain: ChainConfig {
                breaker: BreakerConfig {
                    failure_threshold: self.breaker_threshold,
                    cooldown: Duration::from_millis(self.breaker_cooldown_ms),
                },
                ..ChainConfig::default()
            },
            ..NodeConfig::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct DevArgs {
    /// Gateway address; the service nodes bind loopback ports
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub http_addr: SocketAddr,

    #[command(flatten)]
    pub dispatch: DispatchArgs,

    #[command(flatten)]
    pub domain: DomainArgs,
}

impl DevArgs {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            network: NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            rpc_addr: "127.0.0.1:0".to_string(),
            domain: self.domain.config(),
            ..NodeConfig::default()
        }
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            network: network_config(self.http_addr),
            dispatch: self.dispatch.config(),
            ..GatewayConfig::default()
        }
    }
}

fn network_config(addr: SocketAddr) -> NetworkConfig {
    NetworkConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ..NetworkConfig::default()
    }
}

/// Installs telemetry and signal handling, then runs the chosen command.
///
/// # Errors
///
/// Returns the first startup or serving error of the command.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    telemetry::init_logging(cli.log_format)?;
    if let Some(addr) = cli.metrics_addr {
        telemetry::install_metrics(addr)?;
    }

    let shutdown = Arc::new(ShutdownController::new());
    let on_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        on_signal.trigger_shutdown();
    });

    match cli.command {
        Command::Gateway(args) => {
            gateway::run(args.config(), args.registry.connect()?, shutdown).await
        }
        Command::Serve(args) => {
            node::run(args.service, args.config(), args.registry.connect()?, shutdown).await
        }
        Command::Dev(args) => run_dev(&args, shutdown).await,
    }
}

async fn run_dev(args: &DevArgs, shutdown: Arc<ShutdownController>) -> anyhow::Result<()> {
    let registry: Arc<dyn RegistryClient> = Arc::new(MemoryRegistry::new());

    let mut nodes = JoinSet::new();
    for service in ServiceKind::ALL {
        let (config, registry, shutdown) =
            (args.node_config(), Arc::clone(&registry), Arc::clone(&shutdown));
        nodes.spawn(async move {
            let result = node::run(service, config, registry, Arc::clone(&shutdown)).await;
            if let Err(e) = &result {
                error!(service = service.name(), error = %e, "node failed, stopping");
                shutdown.trigger_shutdown();
            }
            result
        });
    }

    let served = gateway::run(args.gateway_config(), registry, shutdown).await;
    while let Some(joined) = nodes.join_next().await {
        joined??;
    }
    served
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gateway_defaults() {
        let cli = Cli::try_parse_from(["storefront", "gateway"]).unwrap();
        let Command::Gateway(args) = cli.command else {
            panic!("expected gateway");
        };
        assert_eq!(args.registry.registry, RegistryKind::Consul);
        assert_eq!(args.registry.consul_addr, "http://127.0.0.1:8500");

        let config = args.config();
        assert_eq!(config.network.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.dispatch, DispatchConfig::default());
    }

    #[test]
    fn dispatch_flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "storefront",
            "gateway",
            "--registry",
            "memory",
            "--retry-max",
            "5",
            "--retry-timeout-ms",
            "250",
            "--breaker-threshold",
            "2",
            "--breaker-cooldown-ms",
            "1000",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let Command::Gateway(args) = cli.command else {
            panic!("expected gateway");
        };
        assert_eq!(args.registry.registry, RegistryKind::Memory);
        let dispatch = args.config().dispatch;
        assert_eq!(dispatch.retry.max_attempts, 5);
        assert_eq!(dispatch.retry.total_timeout, Duration::from_millis(250));
        assert_eq!(dispatch.breaker.failure_threshold, 2);
        assert_eq!(dispatch.breaker.cooldown, Duration::from_secs(1));
    }

    #[test]
    fn serve_builds_a_node_config() {
        let cli = Cli::try_parse_from([
            "storefront",
            "serve",
            "order",
            "--rpc-addr",
            "127.0.0.1:9100",
            "--advertise-host",
            "10.0.0.7",
            "--jwt-secret",
            "s3cret",
            "--max-upload-bytes",
            "1024",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.service, ServiceKind::Order);

        let config = args.config();
        assert_eq!(config.rpc_addr, "127.0.0.1:9100");
        assert_eq!(config.advertise_host, "10.0.0.7");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.domain.jwt_secret, "s3cret");
        assert_eq!(config.domain.max_upload_bytes, 1024);
        assert_eq!(config.chain.breaker, BreakerConfig::default());
    }

    #[test]
    fn unknown_services_and_backends_are_rejected() {
        assert!(Cli::try_parse_from(["storefront", "serve", "billing"]).is_err());
        assert!(
            Cli::try_parse_from(["storefront", "serve", "user", "--storage", "postgres"]).is_err()
        );
    }

    #[test]
    fn dev_nodes_bind_loopback() {
        let cli = Cli::try_parse_from(["storefront", "dev", "--http-addr", "127.0.0.1:0"]).unwrap();
        let Command::Dev(args) = cli.command else {
            panic!("expected dev");
        };
        let node = args.node_config();
        assert_eq!(node.network.host, "127.0.0.1");
        assert_eq!(node.rpc_addr, "127.0.0.1:0");
        assert_eq!(args.gateway_config().network.bind_addr(), "127.0.0.1:0");
    }
}
