/// Redis RESP (Redis Serialization Protocol) parsing and generation
///
/// Decoding works directly on the connection [`Reader`]. It is not atomic: on
/// [`CodecError::Incomplete`] some bytes of the partial value may already be
/// consumed, and the caller is expected to rewind to a mark taken before the
/// value started.
use crate::core::bufio::{Reader, Writer};
use crate::error::CodecError;
use bytes::Bytes;
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum Resp {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<Resp>>), // None represents NULL array
}

impl Resp {
    /// Decode one complete value from the reader
    pub fn decode(reader: &mut Reader) -> Result<Resp, CodecError> {
        let line = reader.read_line()?;
        let (&kind, body) = line
            .split_first()
            .ok_or_else(|| CodecError::invalid("empty RESP line"))?;

        match kind {
            b'+' => Ok(Resp::SimpleString(utf8(body)?)),
            b'-' => Ok(Resp::Error(utf8(body)?)),
            b':' => Ok(Resp::Integer(parse_int(body)?)),
            b'$' => {
                let size = parse_int(body)?;
                if size == -1 {
                    return Ok(Resp::BulkString(None));
                }
                if size < 0 {
                    return Err(CodecError::invalid("Invalid bulk string size"));
                }
                let size = size as usize;
                let data = reader.read_exact(size + 2)?;
                if &data[size..] != b"\r\n" {
                    return Err(CodecError::invalid("Missing \\r\\n after bulk string"));
                }
                Ok(Resp::BulkString(Some(Bytes::copy_from_slice(&data[..size]))))
            }
            b'*' => {
                let size = parse_int(body)?;
                if size == -1 {
                    return Ok(Resp::Array(None));
                }
                if size < 0 {
                    return Err(CodecError::invalid("Invalid array size"));
                }
                let size = size as usize;
                // Cap the preallocation; the count comes off the wire.
                let mut elements = Vec::with_capacity(size.min(64));
                for _ in 0..size {
                    elements.push(Resp::decode(reader)?);
                }
                Ok(Resp::Array(Some(elements)))
            }
            other => Err(CodecError::invalid(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    /// Encode the value onto the writer
    pub fn encode(&self, w: &mut Writer) {
        match self {
            Resp::SimpleString(s) => {
                w.write_u8(b'+');
                w.write_str(s);
                w.write(b"\r\n");
            }
            Resp::Error(s) => {
                w.write_u8(b'-');
                w.write_str(s);
                w.write(b"\r\n");
            }
            Resp::Integer(n) => {
                w.write_u8(b':');
                w.write_str(&n.to_string());
                w.write(b"\r\n");
            }
            Resp::BulkString(Some(data)) => {
                w.write_u8(b'$');
                w.write_str(&data.len().to_string());
                w.write(b"\r\n");
                w.write(data);
                w.write(b"\r\n");
            }
            Resp::BulkString(None) => w.write(b"$-1\r\n"),
            Resp::Array(Some(elements)) => {
                w.write_u8(b'*');
                w.write_str(&elements.len().to_string());
                w.write(b"\r\n");
                for element in elements {
                    element.encode(w);
                }
            }
            Resp::Array(None) => w.write(b"*-1\r\n"),
        }
    }

    /// Create a Redis command from command name and arguments
    pub fn command(command: &str, args: &[&str]) -> Resp {
        let mut elements = vec![Resp::BulkString(Some(Bytes::copy_from_slice(
            command.as_bytes(),
        )))];

        for arg in args {
            elements.push(Resp::BulkString(Some(Bytes::copy_from_slice(
                arg.as_bytes(),
            ))));
        }

        Resp::Array(Some(elements))
    }

    /// Payload of a non-null bulk string
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Resp::BulkString(Some(data)) => Some(data),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Resp::Error(_))
    }
}

fn utf8(body: &[u8]) -> Result<String, CodecError> {
    str::from_utf8(body)
        .map(str::to_string)
        .map_err(|e| CodecError::invalid(format!("Invalid UTF-8: {}", e)))
}

fn parse_int(body: &[u8]) -> Result<i64, CodecError> {
    btoi::btoi::<i64>(body).map_err(|_| {
        CodecError::invalid(format!(
            "Invalid integer: {}",
            String::from_utf8_lossy(body)
        ))
    })
}
