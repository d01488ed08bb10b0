/// Fixed-frame liveness probe
///
/// A pinger owns its own connection and lifecycle, separate from any node
/// connection to the same address. Each probe writes one fixed request frame
/// and expects one fixed response frame back, byte for byte.
use crate::core::bufio::{Buffer, Reader, Writer};
use crate::core::connection::{Conn, Endpoint};
use crate::core::{Closer, Lifecycle};
use crate::error::{PorticoError, PorticoResult};
use crate::proto::Protocol;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Request bytes of a probe and the exact reply that means healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    request: &'static [u8],
    response: &'static [u8],
}

impl PingFrame {
    pub const fn new(request: &'static [u8], response: &'static [u8]) -> Self {
        Self { request, response }
    }

    pub fn request(&self) -> &'static [u8] {
        self.request
    }

    pub fn response(&self) -> &'static [u8] {
        self.response
    }
}

/// Health probe bound to one dedicated backend connection
#[derive(Debug)]
pub struct Pinger<S> {
    conn: Conn<S>,
    frame: PingFrame,
    reader: Reader,
    writer: Writer,
    lifecycle: Arc<Lifecycle>,
}

impl Pinger<TcpStream> {
    /// Dial a dedicated probe connection to `addr`
    pub async fn dial(
        addr: &str,
        protocol: Protocol,
        dial_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> PorticoResult<Self> {
        let conn = Conn::dial(addr, dial_timeout, read_timeout, write_timeout).await?;
        Pinger::for_protocol(conn, protocol)
    }
}

impl<S: Endpoint> Pinger<S> {
    pub fn new(conn: Conn<S>, frame: PingFrame) -> PorticoResult<Self> {
        let shutdown = conn.shutdown_handle()?;
        Ok(Self {
            conn,
            frame,
            reader: Reader::new(Buffer::new(frame.response.len())),
            writer: Writer::with_capacity(frame.request.len()),
            lifecycle: Arc::new(Lifecycle::new(shutdown)),
        })
    }

    pub fn for_protocol(conn: Conn<S>, protocol: Protocol) -> PorticoResult<Self> {
        Self::new(conn, protocol.ping_frame())
    }

    pub fn addr(&self) -> &str {
        self.conn.addr()
    }

    /// Run one probe round trip.
    ///
    /// I/O failures are returned as they are; a reply that ends early is
    /// `Truncated`. Only a complete reply that differs from the expected
    /// frame is `PingFailed`.
    pub async fn ping(&mut self) -> PorticoResult<()> {
        if self.closed() {
            return Err(PorticoError::pinger_closed(self.conn.addr()));
        }

        self.writer.write(self.frame.request);
        if let Err(e) = self.writer.flush(&mut self.conn).await {
            debug!("Ping flush to {} failed: {}", self.conn.addr(), e);
            return Err(self.closed_or(e));
        }

        let result = self.read_response().await;
        // Nothing from one probe may leak into the next
        self.reader.discard();
        result
    }

    async fn read_response(&mut self) -> PorticoResult<()> {
        let expected = self.frame.response.len();
        while self.reader.buffered() < expected {
            if let Err(e) = self.reader.fill(&mut self.conn).await {
                let actual = self.reader.buffered();
                if actual > 0 && !self.closed() {
                    debug!("Ping reply from {} cut short: {}", self.conn.addr(), e);
                    return Err(PorticoError::truncated("ping read", expected, actual));
                }
                return Err(self.closed_or(e));
            }
        }

        let got = self.reader.read_exact(expected)?;
        if got != self.frame.response {
            warn!(
                "Unexpected ping reply from {}: {:02x?}",
                self.conn.addr(),
                got
            );
            return Err(PorticoError::ping_failed(self.conn.addr()));
        }
        Ok(())
    }

    /// Close the probe connection. Only the first call shuts the socket down.
    pub fn close(&self) -> PorticoResult<()> {
        self.lifecycle.close().map_err(|e| {
            warn!("Error closing pinger {}: {}", self.conn.addr(), e);
            PorticoError::Network(e)
        })
    }

    pub fn closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn closer(&self) -> Closer {
        Closer::new(Arc::clone(&self.lifecycle))
    }

    fn closed_or(&self, err: PorticoError) -> PorticoError {
        if self.closed() {
            PorticoError::pinger_closed(self.conn.addr())
        } else {
            err
        }
    }
}
