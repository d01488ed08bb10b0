/// Portico - backend data plane for a caching proxy
///
/// Portico drives pipelined traffic from a proxy to individual cache nodes
/// and watches their liveness:
/// 1. Node connections: batched write/read cycles over one TCP connection,
///    decoding replies that arrive in arbitrary pieces
/// 2. Health checking: fixed-frame ping probes, threshold-based health state
///    and eviction of connections to nodes that went unhealthy
///
/// Redis (RESP) and the memcache binary protocol are supported.
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod proto;

pub use crate::config::Config;
pub use crate::core::{Backend, Closer};
pub use crate::error::{PorticoError, PorticoResult};
pub use crate::health::{HealthCheckManager, HealthStatus, PingHealthChecker};
pub use crate::proto::{Message, MsgBatch, MsgState, NodeConn, Pinger, Protocol, Request};

use tokio::net::TcpStream;

/// One configured backend cluster: its nodes, their connections and their
/// health
pub struct Portico {
    config: Config,
    manager: HealthCheckManager,
}

impl Portico {
    /// Create a new instance from a validated configuration
    pub fn new(config: Config) -> Self {
        let checker = Box::new(PingHealthChecker::from_config(&config));
        let manager = HealthCheckManager::from_config(checker, &config.health);
        Self { config, manager }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health(&self) -> &HealthCheckManager {
        &self.manager
    }

    /// Backends for every configured node, all starting healthy
    pub fn backends(&self) -> Vec<Backend> {
        self.config
            .backend
            .nodes
            .iter()
            .map(|addr| {
                Backend::new(
                    self.config.backend.cluster.as_str(),
                    addr.as_str(),
                    self.config.backend.protocol,
                )
            })
            .collect()
    }

    /// Dial a node connection and register it for eviction when the node
    /// goes unhealthy
    pub async fn connect(&self, addr: &str) -> PorticoResult<NodeConn<TcpStream>> {
        let timeouts = &self.config.timeouts;
        let conn = NodeConn::dial(
            &self.config.backend.cluster,
            addr,
            self.config.backend.protocol,
            timeouts.dial(),
            timeouts.read(),
            timeouts.write(),
        )
        .await?;
        self.manager.register(addr, conn.closer());
        Ok(conn)
    }

    /// Empty batch whose reply buffer uses the configured size
    pub fn new_batch(&self) -> MsgBatch {
        MsgBatch::with_buffer_size(self.config.buffer.read_buffer_size)
    }

    /// Probe every node once
    pub async fn check_once(&self, backends: &mut [Backend]) -> Vec<HealthStatus> {
        self.manager.check_all(backends).await
    }

    /// Probe every node on the configured interval, forever
    pub async fn run_health_checks(&self, backends: &mut [Backend]) {
        self.manager.run_health_checks(backends).await
    }
}
