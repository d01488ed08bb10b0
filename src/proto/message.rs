/// Messages and batches carried through one node connection cycle
use crate::core::bufio::{Buffer, DEFAULT_BUFFER_SIZE};
use crate::error::PorticoError;
use crate::proto::Request;
use std::time::{Duration, Instant};

/// Write/read progress of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgState {
    Unsent,
    Written,
    Read,
}

/// One unit of client work: a request, its reply slot and its progress
#[derive(Debug)]
pub struct Message {
    req: Request,
    state: MsgState,
    err: Option<PorticoError>,
    created_at: Instant,
}

impl Message {
    pub fn new<R: Into<Request>>(req: R) -> Self {
        Self {
            req: req.into(),
            state: MsgState::Unsent,
            err: None,
            created_at: Instant::now(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.req
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.req
    }

    pub fn into_request(self) -> Request {
        self.req
    }

    pub fn state(&self) -> MsgState {
        self.state
    }

    pub fn mark_write(&mut self) {
        self.state = MsgState::Written;
    }

    pub fn mark_read(&mut self) {
        self.state = MsgState::Read;
    }

    pub fn is_written(&self) -> bool {
        self.state != MsgState::Unsent
    }

    pub fn is_read(&self) -> bool {
        self.state == MsgState::Read
    }

    /// Attach an error the router should report for this message
    pub fn with_error(&mut self, err: PorticoError) {
        self.err = Some(err);
    }

    pub fn error(&self) -> Option<&PorticoError> {
        self.err.as_ref()
    }

    pub fn take_error(&mut self) -> Option<PorticoError> {
        self.err.take()
    }

    /// True when the pipeline never sends this message to the backend.
    ///
    /// Skipped messages keep their `Unsent` state; this is how they are told
    /// apart from messages a failed batch never reached.
    pub fn is_skipped(&self) -> bool {
        !self.req.is_supported() || self.req.is_control()
    }

    /// Time since the message was created
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Ordered messages assigned to one backend connection for one cycle, plus
/// the buffer replies are read into
#[derive(Debug)]
pub struct MsgBatch {
    msgs: Vec<Message>,
    buf: Option<Buffer>,
}

impl MsgBatch {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(size: usize) -> Self {
        Self {
            msgs: Vec::new(),
            buf: Some(Buffer::new(size)),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.msgs.push(msg);
    }

    /// Append a new message for `req`
    pub fn add_request<R: Into<Request>>(&mut self, req: R) {
        self.msgs.push(Message::new(req));
    }

    pub fn count(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn nth(&self, i: usize) -> Option<&Message> {
        self.msgs.get(i)
    }

    pub fn nth_mut(&mut self, i: usize) -> Option<&mut Message> {
        self.msgs.get_mut(i)
    }

    pub fn msgs(&self) -> &[Message] {
        &self.msgs
    }

    pub fn msgs_mut(&mut self) -> &mut [Message] {
        &mut self.msgs
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.msgs
    }

    /// Drop all messages and buffered reply bytes, keeping allocations
    pub fn reset(&mut self) {
        self.msgs.clear();
        if let Some(buf) = self.buf.as_mut() {
            buf.reset();
        }
    }

    /// Lend the backing buffer to a reader for the duration of a read
    pub(crate) fn take_buffer(&mut self) -> Buffer {
        self.buf.take().unwrap_or_default()
    }

    pub(crate) fn restore_buffer(&mut self, buf: Buffer) {
        self.buf = Some(buf);
    }

    pub fn buffer(&self) -> Option<&Buffer> {
        self.buf.as_ref()
    }
}

impl Default for MsgBatch {
    fn default() -> Self {
        Self::new()
    }
}
