/// Probe-based health checker
///
/// Keeps one dedicated pinger per backend address, dialed on first use. A
/// pinger that fails a probe is dropped and the next check dials a fresh one.

use super::{HealthChecker, HealthStatus};
use crate::config::Config;
use crate::core::Backend;
use crate::proto::Pinger;
use fnv::FnvHashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;

/// Health checker that runs the protocol's fixed ping exchange
pub struct PingHealthChecker {
    check_interval: Duration,
    check_timeout: Duration,
    dial_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    pingers: Mutex<FnvHashMap<String, Pinger<TcpStream>>>,
}

impl PingHealthChecker {
    pub fn new() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(3),
            dial_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
            pingers: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: config.health.interval(),
            check_timeout: config.health.timeout(),
            dial_timeout: config.timeouts.dial(),
            read_timeout: config.timeouts.read(),
            write_timeout: config.timeouts.write(),
            pingers: Mutex::new(FnvHashMap::default()),
        }
    }

    /// Number of probe connections currently kept open
    pub fn cached(&self) -> usize {
        self.pingers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take(&self, addr: &str) -> Option<Pinger<TcpStream>> {
        self.pingers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(addr)
    }

    fn put(&self, addr: &str, pinger: Pinger<TcpStream>) {
        self.pingers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr.to_string(), pinger);
    }

    async fn probe(&self, backend: &Backend) -> HealthStatus {
        let mut pinger = match self.take(&backend.addr) {
            Some(pinger) if !pinger.closed() => pinger,
            _ => match Pinger::dial(
                &backend.addr,
                backend.protocol,
                self.dial_timeout,
                self.read_timeout,
                self.write_timeout,
            )
            .await
            {
                Ok(pinger) => pinger,
                Err(e) => {
                    return HealthStatus::Unhealthy {
                        reason: format!("Connection failed: {}", e),
                    };
                }
            },
        };

        match pinger.ping().await {
            Ok(()) => {
                self.put(&backend.addr, pinger);
                HealthStatus::Healthy
            }
            Err(e) => {
                tracing::warn!("Ping to {} failed: {}", backend.addr, e);
                let _ = pinger.close();
                HealthStatus::Unhealthy {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl HealthChecker for PingHealthChecker {
    async fn check_health(&self, backend: &Backend) -> HealthStatus {
        tracing::debug!(
            "Checking {} health for backend: {} {}",
            backend.protocol,
            backend.cluster,
            backend.addr
        );
        self.probe(backend).await
    }

    fn check_interval(&self) -> Duration {
        self.check_interval
    }

    fn check_timeout(&self) -> Duration {
        self.check_timeout
    }
}

impl Default for PingHealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
