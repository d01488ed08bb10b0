/// Health checking for backend nodes
///
/// A checker probes one backend; the manager turns consecutive probe
/// outcomes into healthy/unhealthy transitions and evicts the connections
/// registered for a node when it goes unhealthy.
pub mod ping;

pub use ping::PingHealthChecker;

use crate::config::HealthConfig;
use crate::core::{Backend, Closer};
use async_trait::async_trait;
use fnv::FnvHashMap;
use futures::future::join_all;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::time::timeout;

/// Health status of a backend
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a healthy backend
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Perform health check on a backend
    async fn check_health(&self, backend: &Backend) -> HealthStatus;

    /// Get the check interval for this health checker
    fn check_interval(&self) -> Duration;

    /// Get the timeout for health checks
    fn check_timeout(&self) -> Duration;
}

/// Health state change produced by one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    BecameHealthy,
    /// The node went unhealthy and this many registered connections were closed
    BecameUnhealthy { evicted: usize },
}

/// Threshold-based health check manager
pub struct HealthCheckManager {
    checker: Box<dyn HealthChecker>,
    failure_threshold: u32,
    success_threshold: u32,
    // Connections to close when their node goes unhealthy, keyed by address.
    closers: Mutex<FnvHashMap<String, Vec<Closer>>>,
}

impl HealthCheckManager {
    /// Manager that flips state on the first opposite outcome
    pub fn new(checker: Box<dyn HealthChecker>) -> Self {
        Self::with_thresholds(checker, 1, 1)
    }

    pub fn with_thresholds(
        checker: Box<dyn HealthChecker>,
        failure_threshold: u32,
        success_threshold: u32,
    ) -> Self {
        Self {
            checker,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            closers: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn from_config(checker: Box<dyn HealthChecker>, config: &HealthConfig) -> Self {
        Self::with_thresholds(checker, config.failure_threshold, config.success_threshold)
    }

    /// Close `closer` when the node at `addr` becomes unhealthy
    pub fn register(&self, addr: &str, closer: Closer) {
        let mut closers = self.closers.lock().unwrap_or_else(|e| e.into_inner());
        let entry = closers.entry(addr.to_string()).or_default();
        // Forget connections that were already closed by their owners
        entry.retain(|c| !c.is_closed());
        entry.push(closer);
    }

    /// Number of live registered connections for `addr`
    pub fn registered(&self, addr: &str) -> usize {
        let closers = self.closers.lock().unwrap_or_else(|e| e.into_inner());
        closers
            .get(addr)
            .map(|v| v.iter().filter(|c| !c.is_closed()).count())
            .unwrap_or(0)
    }

    /// Close and forget every connection registered for `addr`
    pub fn evict(&self, addr: &str) -> usize {
        let evicted = {
            let mut closers = self.closers.lock().unwrap_or_else(|e| e.into_inner());
            closers.remove(addr).unwrap_or_default()
        };

        let mut count = 0;
        for closer in evicted {
            if closer.is_closed() {
                continue;
            }
            if let Err(e) = closer.close() {
                tracing::warn!("Error closing evicted connection to {}: {}", addr, e);
            }
            count += 1;
        }
        count
    }

    /// Perform health check with timeout
    pub async fn check_backend_health(&self, backend: &mut Backend) -> HealthStatus {
        let check_timeout = self.checker.check_timeout();

        let status = match timeout(check_timeout, self.checker.check_health(backend)).await {
            Ok(status) => status,
            Err(_) => HealthStatus::Timeout,
        };

        backend.last_health_check = Some(SystemTime::now());
        self.record(backend, &status);

        status
    }

    /// Apply one outcome to the backend's counters and health flag
    pub fn record(&self, backend: &mut Backend, status: &HealthStatus) -> Transition {
        if status.is_healthy() {
            backend.consecutive_failures = 0;
            backend.consecutive_successes = backend.consecutive_successes.saturating_add(1);
            if !backend.healthy && backend.consecutive_successes >= self.success_threshold {
                backend.healthy = true;
                tracing::info!("Backend {} {} is healthy again", backend.cluster, backend.addr);
                return Transition::BecameHealthy;
            }
        } else {
            backend.consecutive_successes = 0;
            backend.consecutive_failures = backend.consecutive_failures.saturating_add(1);
            if backend.healthy && backend.consecutive_failures >= self.failure_threshold {
                backend.healthy = false;
                let evicted = self.evict(&backend.addr);
                tracing::info!(
                    "Backend {} {} marked unhealthy after {} failures, closed {} connections",
                    backend.cluster,
                    backend.addr,
                    backend.consecutive_failures,
                    evicted
                );
                return Transition::BecameUnhealthy { evicted };
            }
        }
        Transition::None
    }

    /// Check every backend once, concurrently
    pub async fn check_all(&self, backends: &mut [Backend]) -> Vec<HealthStatus> {
        join_all(backends.iter_mut().map(|b| self.check_backend_health(b))).await
    }

    /// Run continuous health checking for a set of backends
    pub async fn run_health_checks(&self, backends: &mut [Backend]) {
        let mut interval = tokio::time::interval(self.checker.check_interval());

        loop {
            interval.tick().await;

            let statuses = self.check_all(backends).await;

            for (backend, status) in backends.iter().zip(statuses) {
                match status {
                    HealthStatus::Healthy => {
                        tracing::debug!("Backend {} is healthy", backend.addr);
                    }
                    HealthStatus::Unhealthy { reason } => {
                        tracing::warn!("Backend {} is unhealthy: {}", backend.addr, reason);
                    }
                    HealthStatus::Timeout => {
                        tracing::warn!("Health check timeout for backend {}", backend.addr);
                    }
                    HealthStatus::Unknown => {
                        tracing::warn!("Unknown health status for backend {}", backend.addr);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Lifecycle;
    use crate::proto::Protocol;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    // Mock health checker for testing
    struct MockHealthChecker {
        should_pass: Arc<AtomicBool>,
        delay: Duration,
    }

    impl MockHealthChecker {
        fn new(should_pass: bool) -> (Self, Arc<AtomicBool>) {
            let flag = Arc::new(AtomicBool::new(should_pass));
            let checker = Self {
                should_pass: Arc::clone(&flag),
                delay: Duration::ZERO,
            };
            (checker, flag)
        }
    }

    #[async_trait]
    impl HealthChecker for MockHealthChecker {
        async fn check_health(&self, _backend: &Backend) -> HealthStatus {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.should_pass.load(Ordering::SeqCst) {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy {
                    reason: "Mock failure".to_string(),
                }
            }
        }

        fn check_timeout(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn check_interval(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    fn create_test_backend(addr: &str) -> Backend {
        Backend::new("cache", addr, Protocol::MemcacheBinary)
    }

    fn counting_closer() -> (Closer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&count);
        let lifecycle = Lifecycle::new(Box::new(move || {
            hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        (Closer::new(Arc::new(lifecycle)), count)
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "Healthy");
        assert_eq!(
            HealthStatus::Unhealthy { reason: "test".to_string() }.to_string(),
            "Unhealthy: test"
        );
        assert_eq!(HealthStatus::Timeout.to_string(), "Timeout");
        assert_eq!(HealthStatus::Unknown.to_string(), "Unknown");
    }

    #[test]
    fn test_health_status_is_healthy() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Unhealthy { reason: "test".to_string() }.is_healthy());
        assert!(!HealthStatus::Timeout.is_healthy());
        assert!(!HealthStatus::Unknown.is_healthy());
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let (checker, _) = MockHealthChecker::new(true);
        let manager = HealthCheckManager::new(Box::new(checker));
        let mut backend = create_test_backend("127.0.0.1:11211");
        backend.healthy = false;

        let status = manager.check_backend_health(&mut backend).await;
        assert!(status.is_healthy());
        assert!(backend.healthy);
        assert!(backend.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_health_check_failure() {
        let (checker, _) = MockHealthChecker::new(false);
        let manager = HealthCheckManager::new(Box::new(checker));
        let mut backend = create_test_backend("127.0.0.1:11211");

        let status = manager.check_backend_health(&mut backend).await;
        assert!(!status.is_healthy());
        assert!(!backend.healthy);
    }

    #[tokio::test]
    async fn test_health_check_timeout() {
        let (mut checker, _) = MockHealthChecker::new(true);
        checker.delay = Duration::from_secs(1);
        let manager = HealthCheckManager::new(Box::new(checker));
        let mut backend = create_test_backend("127.0.0.1:11211");

        let status = manager.check_backend_health(&mut backend).await;
        assert_eq!(status, HealthStatus::Timeout);
        assert!(!backend.healthy);
    }

    #[tokio::test]
    async fn test_thresholds_and_eviction() {
        let (checker, pass) = MockHealthChecker::new(false);
        let manager = HealthCheckManager::with_thresholds(Box::new(checker), 3, 2);
        let mut backend = create_test_backend("10.0.0.1:11211");

        let (closer_a, closed_a) = counting_closer();
        let (closer_b, closed_b) = counting_closer();
        manager.register(&backend.addr, closer_a.clone());
        manager.register(&backend.addr, closer_b);
        assert_eq!(manager.registered(&backend.addr), 2);

        // Two failures stay under the threshold
        manager.check_backend_health(&mut backend).await;
        manager.check_backend_health(&mut backend).await;
        assert!(backend.healthy);
        assert_eq!(closed_a.load(Ordering::SeqCst), 0);

        manager.check_backend_health(&mut backend).await;
        assert!(!backend.healthy);
        assert!(closer_a.is_closed());
        assert_eq!(closed_a.load(Ordering::SeqCst), 1);
        assert_eq!(closed_b.load(Ordering::SeqCst), 1);
        assert_eq!(manager.registered(&backend.addr), 0);

        // Recovery needs two consecutive successes
        pass.store(true, Ordering::SeqCst);
        manager.check_backend_health(&mut backend).await;
        assert!(!backend.healthy);
        manager.check_backend_health(&mut backend).await;
        assert!(backend.healthy);
    }

    #[test]
    fn test_record_transitions() {
        let (checker, _) = MockHealthChecker::new(true);
        let manager = HealthCheckManager::with_thresholds(Box::new(checker), 2, 1);
        let mut backend = create_test_backend("10.0.0.2:6379");
        let (closer, _) = counting_closer();
        manager.register(&backend.addr, closer);

        let failed = HealthStatus::Unhealthy { reason: "x".to_string() };
        assert_eq!(manager.record(&mut backend, &failed), Transition::None);
        // A success in between resets the failure streak
        assert_eq!(manager.record(&mut backend, &HealthStatus::Healthy), Transition::None);
        assert_eq!(manager.record(&mut backend, &failed), Transition::None);
        assert_eq!(
            manager.record(&mut backend, &failed),
            Transition::BecameUnhealthy { evicted: 1 }
        );
        assert_eq!(
            manager.record(&mut backend, &HealthStatus::Healthy),
            Transition::BecameHealthy
        );
    }

    #[test]
    fn test_evict_skips_already_closed() {
        let (checker, _) = MockHealthChecker::new(true);
        let manager = HealthCheckManager::new(Box::new(checker));
        let (closer, count) = counting_closer();
        manager.register("10.0.0.3:11211", closer.clone());
        closer.close().unwrap();

        assert_eq!(manager.evict("10.0.0.3:11211"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(manager.evict("unknown:1"), 0);
    }

    #[tokio::test]
    async fn test_check_all() {
        let (checker, _) = MockHealthChecker::new(true);
        let manager = HealthCheckManager::new(Box::new(checker));
        let mut backends = vec![
            create_test_backend("10.0.0.1:11211"),
            create_test_backend("10.0.0.2:11211"),
        ];

        let statuses = manager.check_all(&mut backends).await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(HealthStatus::is_healthy));
        assert!(backends.iter().all(|b| b.last_health_check.is_some()));
    }
}
