/// Scripted endpoints for unit tests
use crate::core::connection::{Conn, Endpoint, ShutdownHandle};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_test::io::Mock;

impl Endpoint for Mock {
    fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(Box::new(|| Ok(())))
    }
}

pub(crate) fn mock_conn(mock: Mock) -> Conn<Mock> {
    Conn::new(mock, "127.0.0.1:0", None, None)
}

/// Wraps a stream and records socket I/O and shutdowns
pub(crate) struct Recording<S> {
    inner: S,
    pub(crate) io_calls: Arc<AtomicUsize>,
    pub(crate) shutdowns: Arc<AtomicUsize>,
}

impl<S> Recording<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            io_calls: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Recording<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Recording<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> Endpoint for Recording<S> {
    fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        let shutdowns = Arc::clone(&self.shutdowns);
        Ok(Box::new(move || {
            shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }
}
