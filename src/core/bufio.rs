/// Checkpointed buffered reader and buffered writer
///
/// The reader works over an index-based window `[r, w)` of a reusable arena.
/// Decoders consume bytes from the window and report
/// [`CodecError::Incomplete`] when a frame is not fully buffered yet; callers
/// checkpoint positions with [`Reader::mark`], refill from the socket and
/// reposition with [`Reader::advance_to`]. Marks are logical offsets and stay
/// valid when the arena compacts or grows underneath them, as long as the
/// marked bytes were not consumed before the refill.
use crate::core::connection::{Conn, Endpoint};
use crate::error::{CodecError, PorticoError, PorticoResult};
use bytes::{BufMut, BytesMut};
use std::io;

/// Smallest arena allocated when an empty buffer first needs room
pub const MIN_BUFFER_SIZE: usize = 512;

/// Default arena size for connection readers
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Growable byte arena with a readable window
#[derive(Debug, Default)]
pub struct Buffer {
    buf: BytesMut,
    r: usize,
    w: usize,
    // Logical offset of buf[0]; bumped every time consumed bytes are dropped.
    base: usize,
}

/// A logical position in a reader's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(usize);

impl Buffer {
    /// Allocate an arena of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(size),
            r: 0,
            w: 0,
            base: 0,
        }
    }

    /// Total arena size
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available for reading
    pub fn buffered(&self) -> usize {
        self.w - self.r
    }

    /// Drop all buffered bytes, keeping the allocation
    pub fn reset(&mut self) {
        self.r = 0;
        self.w = 0;
        self.base = 0;
    }

    fn readable(&self) -> &[u8] {
        &self.buf[self.r..self.w]
    }

    /// Ensure at least one byte of free space after `w`.
    ///
    /// Bytes before `r` are dropped first; the arena only grows when the
    /// unread window fills it entirely.
    fn make_room(&mut self) {
        if self.r == self.w {
            self.base += self.r;
            self.r = 0;
            self.w = 0;
        }
        if self.w < self.buf.len() {
            return;
        }
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.base += self.r;
            self.w -= self.r;
            self.r = 0;
        }
        if self.w == self.buf.len() {
            let size = (self.buf.len() * 2).max(MIN_BUFFER_SIZE);
            self.buf.resize(size, 0);
        }
    }
}

/// Buffered reader with mark/rewind checkpoints
#[derive(Debug)]
pub struct Reader {
    buf: Buffer,
    // The connection's own buffer while a borrowed one is bound.
    default: Option<Buffer>,
}

impl Reader {
    pub fn new(buf: Buffer) -> Self {
        Self { buf, default: None }
    }

    /// Read once from `conn` into the free space of the arena.
    ///
    /// A zero-length read means the peer closed the stream and is reported
    /// as `UnexpectedEof`.
    pub async fn fill<S: Endpoint>(&mut self, conn: &mut Conn<S>) -> PorticoResult<usize> {
        self.buf.make_room();
        let w = self.buf.w;
        let n = conn.read(&mut self.buf.buf[w..]).await?;
        if n == 0 {
            return Err(PorticoError::Network(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed by {}", conn.addr()),
            )));
        }
        self.buf.w += n;
        Ok(n)
    }

    /// Bytes available without touching the socket
    pub fn buffered(&self) -> usize {
        self.buf.buffered()
    }

    /// All buffered bytes, without consuming them
    pub fn peek(&self) -> &[u8] {
        self.buf.readable()
    }

    /// Checkpoint the current read position
    pub fn mark(&self) -> Mark {
        Mark(self.buf.base + self.buf.r)
    }

    /// Move the read position to a checkpoint taken on this buffer.
    pub fn advance_to(&mut self, mark: Mark) {
        debug_assert!(mark.0 >= self.buf.base, "mark points at discarded bytes");
        let pos = mark.0.saturating_sub(self.buf.base);
        debug_assert!(pos <= self.buf.w, "mark points past buffered bytes");
        self.buf.r = pos.min(self.buf.w);
    }

    /// Consume `n` buffered bytes
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.buf.buffered());
        self.buf.r = (self.buf.r + n).min(self.buf.w);
    }

    /// Consume exactly `n` bytes, or report `Incomplete` without consuming.
    pub fn read_exact(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.buf.buffered() < n {
            return Err(CodecError::Incomplete);
        }
        let start = self.buf.r;
        self.buf.r += n;
        Ok(&self.buf.buf[start..start + n])
    }

    /// Consume one CRLF-terminated line and return it without the terminator.
    pub fn read_line(&mut self) -> Result<&[u8], CodecError> {
        let window = self.buf.readable();
        let lf = match window.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => return Err(CodecError::Incomplete),
        };
        if lf == 0 || window[lf - 1] != b'\r' {
            return Err(CodecError::invalid("line not terminated by CRLF"));
        }
        let start = self.buf.r;
        self.buf.r += lf + 1;
        Ok(&self.buf.buf[start..start + lf - 1])
    }

    /// Drop buffered bytes. Marks taken earlier become invalid.
    pub fn discard(&mut self) {
        self.buf.reset();
    }

    /// Bind `buf` as the backing store, or restore the reader's own buffer
    /// when `None` is passed.
    ///
    /// Returns the borrowed buffer being displaced, if any, so the caller can
    /// hand it back to its owner.
    pub fn reset_buffer(&mut self, buf: Option<Buffer>) -> Option<Buffer> {
        match buf {
            Some(buf) => {
                let prev = std::mem::replace(&mut self.buf, buf);
                if self.default.is_none() {
                    self.default = Some(prev);
                    None
                } else {
                    Some(prev)
                }
            }
            None => self
                .default
                .take()
                .map(|own| std::mem::replace(&mut self.buf, own)),
        }
    }
}

/// Buffered writer flushed as one socket write
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_u8(&mut self, b: u8) {
        self.buf.put_u8(b);
    }

    pub fn write_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Direct access for codecs that encode with `BufMut`
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop buffered bytes without sending them
    pub fn discard(&mut self) {
        self.buf.clear();
    }

    /// Send everything buffered. The buffer is cleared even when the write
    /// fails; a failed flush leaves the connection unusable.
    pub async fn flush<S: Endpoint>(&mut self, conn: &mut Conn<S>) -> PorticoResult<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let result = conn.write_all(&self.buf).await;
        self.buf.clear();
        result.map_err(PorticoError::from)
    }
}
