/// Backend wire protocols and the per-node pipeline built on them
///
/// The pipeline only relies on the capability set every [`Request`] exposes:
/// `is_supported`, `is_control`, `encode` and `decode_reply`.
pub mod memcache;
pub mod message;
pub mod node_conn;
pub mod pinger;
pub mod redis;

pub use message::{Message, MsgBatch, MsgState};
pub use node_conn::NodeConn;
pub use pinger::{PingFrame, Pinger};

use crate::core::bufio::{Reader, Writer};
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire protocol spoken by a backend node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Redis,
    MemcacheBinary,
}

impl Protocol {
    /// Fixed probe exchange for this protocol
    pub fn ping_frame(self) -> PingFrame {
        match self {
            Protocol::Redis => PingFrame::new(redis::PING, redis::PONG),
            Protocol::MemcacheBinary => {
                PingFrame::new(&memcache::binary::PING, &memcache::binary::PONG)
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Redis => write!(f, "redis"),
            Protocol::MemcacheBinary => write!(f, "memcache_binary"),
        }
    }
}

/// A client request for one of the supported protocols
#[derive(Debug, Clone)]
pub enum Request {
    Redis(redis::Request),
    MemcacheBinary(memcache::binary::Request),
}

impl Request {
    pub fn protocol(&self) -> Protocol {
        match self {
            Request::Redis(_) => Protocol::Redis,
            Request::MemcacheBinary(_) => Protocol::MemcacheBinary,
        }
    }

    /// False for commands that are filtered upstream and never sent
    pub fn is_supported(&self) -> bool {
        match self {
            Request::Redis(req) => req.is_supported(),
            Request::MemcacheBinary(req) => req.is_supported(),
        }
    }

    /// True for commands the proxy answers itself
    pub fn is_control(&self) -> bool {
        match self {
            Request::Redis(req) => req.is_control(),
            Request::MemcacheBinary(req) => req.is_control(),
        }
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        match self {
            Request::Redis(req) => req.encode(w),
            Request::MemcacheBinary(req) => req.encode(w),
        }
    }

    pub fn decode_reply(&mut self, reader: &mut Reader) -> Result<(), CodecError> {
        match self {
            Request::Redis(req) => req.decode_reply(reader),
            Request::MemcacheBinary(req) => req.decode_reply(reader),
        }
    }

    pub fn as_redis(&self) -> Option<&redis::Request> {
        match self {
            Request::Redis(req) => Some(req),
            _ => None,
        }
    }

    pub fn as_memcache(&self) -> Option<&memcache::binary::Request> {
        match self {
            Request::MemcacheBinary(req) => Some(req),
            _ => None,
        }
    }
}

impl From<redis::Request> for Request {
    fn from(req: redis::Request) -> Self {
        Request::Redis(req)
    }
}

impl From<memcache::binary::Request> for Request {
    fn from(req: memcache::binary::Request) -> Self {
        Request::MemcacheBinary(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_display_and_serde() {
        assert_eq!(Protocol::Redis.to_string(), "redis");

        #[derive(Deserialize)]
        struct Wrapper {
            protocol: Protocol,
        }
        let parsed: Wrapper = toml::from_str("protocol = \"memcache_binary\"").unwrap();
        assert_eq!(parsed.protocol, Protocol::MemcacheBinary);
    }

    #[test]
    fn test_ping_frames_per_protocol() {
        let mc = Protocol::MemcacheBinary.ping_frame();
        assert_eq!(mc.request().len(), 24);
        assert_eq!(mc.response()[0], 0x81);

        let redis = Protocol::Redis.ping_frame();
        assert_eq!(redis.response(), b"+PONG\r\n");
    }

    #[test]
    fn test_request_dispatch() {
        let req: Request = redis::Request::from_args("QUIT", &[]).unwrap().into();
        assert_eq!(req.protocol(), Protocol::Redis);
        assert!(req.is_control());
        assert!(req.as_redis().is_some());
        assert!(req.as_memcache().is_none());

        let req: Request = memcache::binary::Request::get(b"k").into();
        assert_eq!(req.protocol(), Protocol::MemcacheBinary);
        assert!(req.is_supported());
        assert!(!req.is_control());
    }
}
