/// Backend endpoint: a byte stream with dial, read and write timeouts
///
/// `Conn` owns the stream for one backend node. Read and write deadlines are
/// applied per operation and surface as ordinary `io::ErrorKind::TimedOut`
/// errors; the only other way to interrupt I/O is to shut the transport down
/// through the handle returned by [`Endpoint::shutdown_handle`].
use crate::error::{PorticoError, PorticoResult};
use std::future::Future;
use std::io;
use std::net::Shutdown;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Closure that tears a transport down in both directions.
pub type ShutdownHandle = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

/// A bidirectional byte stream usable as a backend endpoint
pub trait Endpoint: AsyncRead + AsyncWrite + Unpin + Send {
    /// Returns a handle that can shut the transport down from any thread,
    /// even while another task is blocked reading from it.
    fn shutdown_handle(&self) -> io::Result<ShutdownHandle>;
}

impl Endpoint for TcpStream {
    fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        // Shutdown acts on the socket, not the descriptor, so a duplicate is
        // enough to interrupt reads pending on the original.
        let socket = socket2::SockRef::from(self).try_clone()?;
        Ok(Box::new(move || match socket.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }))
    }
}

impl Endpoint for DuplexStream {
    fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(Box::new(|| Ok(())))
    }
}

/// A connected backend stream with per-operation deadlines
#[derive(Debug)]
pub struct Conn<S> {
    stream: S,
    addr: String,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl Conn<TcpStream> {
    /// Connect to `addr`, failing with a timeout error after `dial_timeout`.
    ///
    /// A zero read or write timeout disables that deadline.
    pub async fn dial(
        addr: &str,
        dial_timeout: Duration,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> PorticoResult<Self> {
        debug!("Dialing backend {}", addr);

        let stream = match timeout(dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("Network error connecting to backend {}: {}", addr, e);
                return Err(PorticoError::Network(e));
            }
            Err(_) => {
                debug!("Timeout connecting to backend {}", addr);
                return Err(PorticoError::timeout(format!("dial {}", addr)));
            }
        };

        // Pipelined small requests should not wait on Nagle
        stream.set_nodelay(true)?;

        debug!("Successfully connected to backend {}", addr);
        Ok(Conn::new(
            stream,
            addr,
            non_zero(read_timeout),
            non_zero(write_timeout),
        ))
    }
}

impl<S: Endpoint> Conn<S> {
    /// Wrap an already connected stream
    pub fn new<A: Into<String>>(
        stream: S,
        addr: A,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            addr: addr.into(),
            read_timeout,
            write_timeout,
        }
    }

    /// Backend address this stream is connected to
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        self.stream.shutdown_handle()
    }

    /// Read whatever the socket has into `buf`, honoring the read deadline.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_deadline(
            self.read_timeout,
            "read",
            &self.addr,
            self.stream.read(buf),
        )
        .await
    }

    /// Write all of `buf` and flush the stream, honoring the write deadline.
    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let stream = &mut self.stream;
        with_deadline(self.write_timeout, "write", &self.addr, async move {
            stream.write_all(buf).await?;
            stream.flush().await
        })
        .await
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

async fn with_deadline<F, T>(
    deadline: Option<Duration>,
    operation: &str,
    addr: &str,
    fut: F,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(d) => match timeout(d, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out after {:?} on {}", operation, d, addr),
            )),
        },
        None => fut.await,
    }
}
