/// Pipelined batch I/O against one backend node
///
/// A `NodeConn` writes every forwardable request of a batch in one flush, then
/// reads the replies back in batch order. Replies may arrive split across any
/// number of socket reads: when a decoder runs out of bytes the reader is
/// rewound to the start of the batch, topped up from the socket, moved back to
/// the last complete reply and the same message is decoded again.
use crate::core::bufio::{Buffer, Reader, Writer};
use crate::core::connection::{Conn, Endpoint};
use crate::core::{Closer, Lifecycle};
use crate::error::{CodecError, PorticoError, PorticoResult};
use crate::proto::{MsgBatch, Protocol};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Connection from the proxy to one backend node
#[derive(Debug)]
pub struct NodeConn<S> {
    cluster: String,
    addr: String,
    protocol: Protocol,
    conn: Conn<S>,
    reader: Reader,
    writer: Writer,
    lifecycle: Arc<Lifecycle>,
}

impl NodeConn<TcpStream> {
    /// Dial `addr` and wrap the stream in a node connection
    pub async fn dial(
        cluster: &str,
        addr: &str,
        protocol: Protocol,
        dial_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> PorticoResult<Self> {
        let conn = Conn::dial(addr, dial_timeout, read_timeout, write_timeout).await?;
        NodeConn::new(cluster, protocol, conn)
    }
}

impl<S: Endpoint> NodeConn<S> {
    pub fn new<C: Into<String>>(cluster: C, protocol: Protocol, conn: Conn<S>) -> PorticoResult<Self> {
        let shutdown = conn.shutdown_handle()?;
        Ok(Self {
            cluster: cluster.into(),
            addr: conn.addr().to_string(),
            protocol,
            conn,
            // Reads always run against a batch's own buffer
            reader: Reader::new(Buffer::default()),
            writer: Writer::new(),
            lifecycle: Arc::new(Lifecycle::new(shutdown)),
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Encode every forwardable message of the batch and flush once.
    ///
    /// Unsupported and control messages are skipped and stay `Unsent`. An
    /// encode failure or a request of the wrong protocol is attached to its
    /// message and aborts the call; nothing from the batch is sent then.
    pub async fn write_batch(&mut self, batch: &mut MsgBatch) -> PorticoResult<()> {
        if self.closed() {
            return Err(self.closed_error());
        }

        for m in batch.msgs_mut() {
            let req = m.request();
            if req.protocol() != self.protocol {
                let found = req.protocol();
                m.with_error(self.mismatch(found));
                self.writer.discard();
                return Err(self.mismatch(found));
            }
            if !req.is_supported() || req.is_control() {
                continue;
            }
            if let Err(e) = req.encode(&mut self.writer) {
                m.with_error(PorticoError::Codec(e.clone()));
                self.writer.discard();
                return Err(PorticoError::Codec(e));
            }
            m.mark_write();
        }

        if let Err(e) = self.writer.flush(&mut self.conn).await {
            return Err(self.closed_or(e));
        }
        Ok(())
    }

    /// Decode replies for the batch's forwarded messages, in batch order.
    ///
    /// The reader is bound to the batch's buffer for the duration of the
    /// call and the buffer is handed back on every exit path. The first
    /// decode or I/O error ends the call; messages already read stay read.
    pub async fn read_batch(&mut self, batch: &mut MsgBatch) -> PorticoResult<()> {
        if self.closed() {
            return Err(self.closed_error());
        }

        self.reader.reset_buffer(Some(batch.take_buffer()));
        let result = self.decode_batch(batch).await;
        if let Some(buf) = self.reader.reset_buffer(None) {
            batch.restore_buffer(buf);
        }
        result
    }

    async fn decode_batch(&mut self, batch: &mut MsgBatch) -> PorticoResult<()> {
        let begin = self.reader.mark();
        let mut now = self.reader.mark();
        let mut refills = 0usize;

        let mut i = 0;
        while i < batch.count() {
            let m = &mut batch.msgs_mut()[i];
            let req = m.request_mut();
            if req.protocol() != self.protocol {
                return Err(self.mismatch(req.protocol()));
            }
            if !req.is_supported() || req.is_control() {
                i += 1;
                continue;
            }

            match req.decode_reply(&mut self.reader) {
                Ok(()) => {
                    m.mark_read();
                    now = self.reader.mark();
                    i += 1;
                }
                Err(CodecError::Incomplete) => {
                    // Keep every byte since the batch start in the arena
                    // while refilling, then resume after the last full reply.
                    self.reader.advance_to(begin);
                    if let Err(e) = self.reader.fill(&mut self.conn).await {
                        return Err(self.closed_or(e));
                    }
                    self.reader.advance_to(now);
                    refills += 1;
                }
                Err(e) => {
                    debug!(
                        "Decode failed for message {} of {} from {}: {}",
                        i,
                        batch.count(),
                        self.addr,
                        e
                    );
                    return Err(PorticoError::Codec(e));
                }
            }
        }

        debug!(
            "Read batch of {} messages from {} ({} socket reads)",
            batch.count(),
            self.addr,
            refills
        );
        Ok(())
    }

    /// Close the connection. Only the first call shuts the socket down.
    pub fn close(&self) -> PorticoResult<()> {
        self.lifecycle.close().map_err(|e| {
            warn!("Error closing node connection {} {}: {}", self.cluster, self.addr, e);
            PorticoError::Network(e)
        })
    }

    pub fn closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    /// Handle for closing this connection from another task
    pub fn closer(&self) -> Closer {
        Closer::new(Arc::clone(&self.lifecycle))
    }

    fn closed_error(&self) -> PorticoError {
        PorticoError::connection_closed(self.cluster.as_str(), self.addr.as_str())
    }

    /// I/O that fails because the connection was closed underneath it
    /// reports the close rather than the transport symptom.
    fn closed_or(&self, err: PorticoError) -> PorticoError {
        if self.closed() {
            self.closed_error()
        } else {
            err
        }
    }

    fn mismatch(&self, found: Protocol) -> PorticoError {
        PorticoError::ProtocolMismatch {
            expected: self.protocol,
            found,
        }
    }
}
