/// Memcache binary protocol codec
///
/// Every packet starts with a fixed 24-byte header:
///
/// | offset | size | request         | response        |
/// |--------|------|-----------------|-----------------|
/// | 0      | 1    | magic `0x80`    | magic `0x81`    |
/// | 1      | 1    | opcode          | opcode          |
/// | 2      | 2    | key length      | key length      |
/// | 4      | 1    | extras length   | extras length   |
/// | 5      | 1    | data type       | data type       |
/// | 6      | 2    | vbucket id      | status          |
/// | 8      | 4    | total body len  | total body len  |
/// | 12     | 4    | opaque          | opaque          |
/// | 16     | 8    | cas             | cas             |
///
/// The body is `extras ++ key ++ value`. All integers are big-endian.
use crate::core::bufio::{Reader, Writer};
use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes};

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Header length shared by requests and responses
pub const HEADER_LEN: usize = 24;

/// Longest key memcached accepts
pub const MAX_KEY_LEN: usize = 250;

/// NOOP request used as the health probe
pub const PING: [u8; HEADER_LEN] = [
    0x80, // magic
    0x0a, // cmd: noop
    0x00, 0x00, // key len
    0x00, // extra len
    0x00, // data type
    0x00, 0x00, // vbucket
    0x00, 0x00, 0x00, 0x00, // body len
    0x00, 0x00, 0x00, 0x00, // opaque
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cas
];

/// Successful NOOP response
pub const PONG: [u8; HEADER_LEN] = [
    0x81, // magic
    0x0a, // cmd: noop
    0x00, 0x00, // key len
    0x00, // extra len
    0x00, // data type
    0x00, 0x00, // status
    0x00, 0x00, 0x00, 0x00, // body len
    0x00, 0x00, 0x00, 0x00, // opaque
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cas
];

/// Binary protocol opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    Noop = 0x0a,
    Version = 0x0b,
    GetK = 0x0c,
    GetKQ = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    IncrementQ = 0x15,
    DecrementQ = 0x16,
    QuitQ = 0x17,
    FlushQ = 0x18,
    AppendQ = 0x19,
    PrependQ = 0x1a,
    Verbosity = 0x1b,
    Touch = 0x1c,
    Gat = 0x1d,
    Gatq = 0x1e,
}

impl TryFrom<u8> for Opcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        let op = match value {
            0x00 => Get,
            0x01 => Set,
            0x02 => Add,
            0x03 => Replace,
            0x04 => Delete,
            0x05 => Increment,
            0x06 => Decrement,
            0x07 => Quit,
            0x08 => Flush,
            0x09 => GetQ,
            0x0a => Noop,
            0x0b => Version,
            0x0c => GetK,
            0x0d => GetKQ,
            0x0e => Append,
            0x0f => Prepend,
            0x10 => Stat,
            0x11 => SetQ,
            0x12 => AddQ,
            0x13 => ReplaceQ,
            0x14 => DeleteQ,
            0x15 => IncrementQ,
            0x16 => DecrementQ,
            0x17 => QuitQ,
            0x18 => FlushQ,
            0x19 => AppendQ,
            0x1a => PrependQ,
            0x1b => Verbosity,
            0x1c => Touch,
            0x1d => Gat,
            0x1e => Gatq,
            other => {
                return Err(CodecError::invalid(format!(
                    "unknown memcache opcode 0x{:02x}",
                    other
                )))
            }
        };
        Ok(op)
    }
}

impl Opcode {
    /// Quiet opcodes suppress some responses, which breaks FIFO reply
    /// matching on a pipelined connection.
    pub fn is_quiet(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            GetQ | GetKQ
                | SetQ
                | AddQ
                | ReplaceQ
                | DeleteQ
                | IncrementQ
                | DecrementQ
                | QuitQ
                | FlushQ
                | AppendQ
                | PrependQ
                | Gatq
        )
    }

    /// Commands the proxy answers locally
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Noop | Opcode::Version | Opcode::Quit)
    }

    /// Node-wide administrative commands
    pub fn is_admin(self) -> bool {
        matches!(self, Opcode::Flush | Opcode::Stat | Opcode::Verbosity)
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    /// vbucket id on requests, status on responses
    pub vbucket_or_status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    pub fn parse(mut raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::Incomplete);
        }
        Ok(Self {
            magic: raw.get_u8(),
            opcode: raw.get_u8(),
            key_len: raw.get_u16(),
            extras_len: raw.get_u8(),
            data_type: raw.get_u8(),
            vbucket_or_status: raw.get_u16(),
            body_len: raw.get_u32(),
            opaque: raw.get_u32(),
            cas: raw.get_u64(),
        })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key_len);
        buf.put_u8(self.extras_len);
        buf.put_u8(self.data_type);
        buf.put_u16(self.vbucket_or_status);
        buf.put_u32(self.body_len);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
    }

    /// Check that the length fields describe a well-formed body
    fn check_body(&self) -> Result<(), CodecError> {
        if self.extras_len as u32 + self.key_len as u32 > self.body_len {
            return Err(CodecError::invalid(format!(
                "extras ({}) and key ({}) exceed body length {}",
                self.extras_len, self.key_len, self.body_len
            )));
        }
        Ok(())
    }
}

/// Read a header and body, splitting the body into extras, key and value.
fn read_packet(
    reader: &mut Reader,
    magic: u8,
) -> Result<(Header, Bytes, Bytes, Bytes), CodecError> {
    let header = Header::parse(reader.read_exact(HEADER_LEN)?)?;
    if header.magic != magic {
        return Err(CodecError::invalid(format!(
            "bad magic 0x{:02x}, expected 0x{:02x}",
            header.magic, magic
        )));
    }
    header.check_body()?;

    let body = Bytes::copy_from_slice(reader.read_exact(header.body_len as usize)?);
    let extras_end = header.extras_len as usize;
    let key_end = extras_end + header.key_len as usize;
    Ok((
        header,
        body.slice(..extras_end),
        body.slice(extras_end..key_end),
        body.slice(key_end..),
    ))
}

/// A decoded response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: Header,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Response {
    pub fn decode(reader: &mut Reader) -> Result<Self, CodecError> {
        let (header, extras, key, value) = read_packet(reader, MAGIC_RESPONSE)?;
        Ok(Self {
            header,
            extras,
            key,
            value,
        })
    }

    pub fn status(&self) -> u16 {
        self.header.vbucket_or_status
    }

    pub fn is_success(&self) -> bool {
        self.status() == 0
    }
}

/// One memcache binary command and its reply slot
#[derive(Debug, Clone)]
pub struct Request {
    header: Header,
    opcode: Option<Opcode>,
    extras: Bytes,
    key: Bytes,
    value: Bytes,
    reply: Option<Response>,
}

impl Request {
    /// Build a request; lengths in the header are derived at encode time.
    pub fn new(opcode: Opcode, key: Bytes, extras: Bytes, value: Bytes) -> Self {
        Self {
            header: Header {
                magic: MAGIC_REQUEST,
                opcode: opcode as u8,
                key_len: 0,
                extras_len: 0,
                data_type: 0,
                vbucket_or_status: 0,
                body_len: 0,
                opaque: 0,
                cas: 0,
            },
            opcode: Some(opcode),
            extras,
            key,
            value,
            reply: None,
        }
    }

    /// GET for `key`
    pub fn get(key: &[u8]) -> Self {
        Self::new(
            Opcode::Get,
            Bytes::copy_from_slice(key),
            Bytes::new(),
            Bytes::new(),
        )
    }

    /// SET `key` to `value` with flags and expiry extras
    pub fn set(key: &[u8], value: &[u8], flags: u32, expiry: u32) -> Self {
        let mut extras = Vec::with_capacity(8);
        extras.put_u32(flags);
        extras.put_u32(expiry);
        Self::new(
            Opcode::Set,
            Bytes::copy_from_slice(key),
            Bytes::from(extras),
            Bytes::copy_from_slice(value),
        )
    }

    /// Decode a client request packet from the reader.
    ///
    /// Unknown opcodes are kept and reported as unsupported rather than
    /// rejected, so the router can answer them.
    pub fn decode(reader: &mut Reader) -> Result<Self, CodecError> {
        let (header, extras, key, value) = read_packet(reader, MAGIC_REQUEST)?;
        Ok(Self {
            opcode: Opcode::try_from(header.opcode).ok(),
            header,
            extras,
            key,
            value,
            reply: None,
        })
    }

    pub fn opcode(&self) -> Option<Opcode> {
        self.opcode
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Opaque value echoed back by the server
    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.header.opaque = opaque;
        self
    }

    pub fn is_supported(&self) -> bool {
        match self.opcode {
            Some(op) => !op.is_quiet() && !op.is_admin(),
            None => false,
        }
    }

    pub fn is_control(&self) -> bool {
        self.opcode.map(Opcode::is_control).unwrap_or(false)
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        if self.key.len() > MAX_KEY_LEN {
            return Err(CodecError::encode(format!(
                "key length {} exceeds {}",
                self.key.len(),
                MAX_KEY_LEN
            )));
        }
        let extras_len = u8::try_from(self.extras.len())
            .map_err(|_| CodecError::encode("extras longer than 255 bytes"))?;
        let body_len = u32::try_from(self.extras.len() + self.key.len() + self.value.len())
            .map_err(|_| CodecError::encode("body longer than u32::MAX bytes"))?;

        let header = Header {
            key_len: self.key.len() as u16,
            extras_len,
            body_len,
            ..self.header
        };
        let buf = w.buf_mut();
        header.write_to(buf);
        buf.extend_from_slice(&self.extras);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        Ok(())
    }

    /// Decode this command's response into the reply slot
    pub fn decode_reply(&mut self, reader: &mut Reader) -> Result<(), CodecError> {
        let response = Response::decode(reader)?;
        if response.header.opcode != self.header.opcode {
            return Err(CodecError::invalid(format!(
                "response opcode 0x{:02x} does not match request 0x{:02x}",
                response.header.opcode, self.header.opcode
            )));
        }
        self.reply = Some(response);
        Ok(())
    }

    pub fn reply(&self) -> Option<&Response> {
        self.reply.as_ref()
    }

    pub fn take_reply(&mut self) -> Option<Response> {
        self.reply.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bufio::Buffer;
    use crate::core::testing::mock_conn;
    use tokio_test::io::Builder;

    async fn reader_with(data: &[u8]) -> Reader {
        let mut conn = mock_conn(Builder::new().read(data).build());
        let mut reader = Reader::new(Buffer::new(128));
        reader.fill(&mut conn).await.unwrap();
        reader
    }

    fn get_response(value: &[u8], status: u16) -> Vec<u8> {
        let mut out = Vec::new();
        Header {
            magic: MAGIC_RESPONSE,
            opcode: Opcode::Get as u8,
            key_len: 0,
            extras_len: 4,
            data_type: 0,
            vbucket_or_status: status,
            body_len: 4 + value.len() as u32,
            opaque: 0,
            cas: 1,
        }
        .write_to(&mut out);
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_ping_frames() {
        assert_eq!(PING.len(), HEADER_LEN);
        assert_eq!(PONG.len(), HEADER_LEN);

        let ping = Header::parse(&PING).unwrap();
        assert_eq!(ping.magic, MAGIC_REQUEST);
        assert_eq!(Opcode::try_from(ping.opcode).unwrap(), Opcode::Noop);

        let pong = Header::parse(&PONG).unwrap();
        assert_eq!(pong.magic, MAGIC_RESPONSE);
        assert_eq!(pong.vbucket_or_status, 0);
    }

    #[test]
    fn test_encode_get() {
        let mut w = Writer::new();
        Request::get(b"foo").encode(&mut w).unwrap();
        let bytes = &w.buf_mut()[..];

        assert_eq!(bytes.len(), HEADER_LEN + 3);
        let header = Header::parse(bytes).unwrap();
        assert_eq!(header.magic, MAGIC_REQUEST);
        assert_eq!(header.opcode, Opcode::Get as u8);
        assert_eq!(header.key_len, 3);
        assert_eq!(header.body_len, 3);
        assert_eq!(&bytes[HEADER_LEN..], b"foo");
    }

    #[test]
    fn test_encode_set_extras() {
        let mut w = Writer::new();
        Request::set(b"k", b"val", 7, 60).encode(&mut w).unwrap();
        let bytes = &w.buf_mut()[..];

        let header = Header::parse(bytes).unwrap();
        assert_eq!(header.extras_len, 8);
        assert_eq!(header.body_len, 8 + 1 + 3);
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &7u32.to_be_bytes());
        assert_eq!(&bytes[HEADER_LEN + 8..], b"kval");
    }

    #[test]
    fn test_encode_rejects_long_key() {
        let key = vec![b'k'; MAX_KEY_LEN + 1];
        let mut w = Writer::new();
        let err = Request::get(&key).encode(&mut w).unwrap_err();
        assert!(matches!(err, CodecError::Encode(_)));
        assert_eq!(w.buffered(), 0);
    }

    #[test]
    fn test_classification() {
        assert!(Request::get(b"a").is_supported());
        assert!(!Request::get(b"a").is_control());

        let quiet = Request::new(Opcode::GetQ, Bytes::from("a"), Bytes::new(), Bytes::new());
        assert!(!quiet.is_supported());

        let noop = Request::new(Opcode::Noop, Bytes::new(), Bytes::new(), Bytes::new());
        assert!(noop.is_supported());
        assert!(noop.is_control());

        let stat = Request::new(Opcode::Stat, Bytes::new(), Bytes::new(), Bytes::new());
        assert!(!stat.is_supported());
    }

    #[tokio::test]
    async fn test_decode_reply() {
        let mut reader = reader_with(&get_response(b"bar", 0)).await;
        let mut req = Request::get(b"foo");
        req.decode_reply(&mut reader).unwrap();

        let reply = req.reply().unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.extras.len(), 4);
        assert_eq!(&reply.value[..], b"bar");
        assert_eq!(reply.header.cas, 1);
    }

    #[tokio::test]
    async fn test_decode_reply_not_found_status() {
        let mut reader = reader_with(&get_response(b"Not found", 0x0001)).await;
        let mut req = Request::get(b"foo");
        req.decode_reply(&mut reader).unwrap();
        assert_eq!(req.reply().unwrap().status(), 1);
        assert!(!req.reply().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_decode_reply_incomplete_body() {
        let full = get_response(b"bar", 0);
        let mut reader = reader_with(&full[..full.len() - 1]).await;
        let mut req = Request::get(b"foo");
        assert_eq!(req.decode_reply(&mut reader), Err(CodecError::Incomplete));
        assert!(req.reply().is_none());
    }

    #[tokio::test]
    async fn test_decode_reply_bad_magic() {
        let mut reader = reader_with(&PING).await;
        let mut req = Request::new(Opcode::Noop, Bytes::new(), Bytes::new(), Bytes::new());
        assert!(matches!(
            req.decode_reply(&mut reader),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_reply_opcode_mismatch() {
        let mut reader = reader_with(&PONG).await;
        let mut req = Request::get(b"foo");
        assert!(matches!(
            req.decode_reply(&mut reader),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_client_request() {
        let mut w = Writer::new();
        Request::set(b"key", b"v", 0, 0)
            .with_opaque(9)
            .encode(&mut w)
            .unwrap();
        let mut reader = reader_with(&w.buf_mut()[..]).await;

        let req = Request::decode(&mut reader).unwrap();
        assert_eq!(req.opcode(), Some(Opcode::Set));
        assert_eq!(req.key(), b"key");
        assert_eq!(req.header.opaque, 9);
    }
}
