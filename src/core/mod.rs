/// Core abstractions shared by node connections and pingers
pub mod bufio;
pub mod connection;
#[cfg(test)]
pub(crate) mod testing;

use crate::core::connection::ShutdownHandle;
use crate::proto::Protocol;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

const OPENED: u8 = 0;
const CLOSED: u8 = 1;

/// Open/closed state of one backend connection.
///
/// Closed is terminal. Only the caller that wins the transition runs the
/// transport shutdown; everyone else observes a successful no-op.
pub struct Lifecycle {
    state: AtomicU8,
    shutdown: ShutdownHandle,
}

impl Lifecycle {
    pub fn new(shutdown: ShutdownHandle) -> Self {
        Self {
            state: AtomicU8::new(OPENED),
            shutdown,
        }
    }

    /// Transition to closed, shutting the transport down exactly once.
    pub fn close(&self) -> io::Result<()> {
        if self
            .state
            .compare_exchange(OPENED, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return (self.shutdown)();
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == CLOSED
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable handle that closes a connection driven by another task
#[derive(Debug, Clone)]
pub struct Closer {
    lifecycle: Arc<Lifecycle>,
}

impl Closer {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    pub fn close(&self) -> io::Result<()> {
        self.lifecycle.close()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}

/// A backend node known to the health checker
#[derive(Debug, Clone)]
pub struct Backend {
    pub cluster: String,
    pub addr: String,
    pub protocol: Protocol,
    pub healthy: bool,
    pub last_health_check: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl Backend {
    /// New backends start healthy until probes say otherwise
    pub fn new<S: Into<String>>(cluster: S, addr: S, protocol: Protocol) -> Self {
        Self {
            cluster: cluster.into(),
            addr: addr.into(),
            protocol,
            healthy: true,
            last_health_check: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}
