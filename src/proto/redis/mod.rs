/// Redis protocol support for the node connection pipeline
///
/// A [`Request`] wraps one client command (a RESP array of bulk strings) and
/// the reply slot filled by the pipeline. Commands are classified once at
/// construction: multi-key, blocking, transactional and admin commands are
/// not forwarded to a single node, and a few connection-level commands are
/// answered by the proxy itself.
pub mod resp;

pub use resp::Resp;

use crate::core::bufio::{Reader, Writer};
use crate::error::CodecError;
use fnv::FnvHashSet;
use lazy_static::lazy_static;

/// Health probe sent to Redis nodes
pub const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";

/// The only acceptable answer to [`PING`]
pub const PONG: &[u8] = b"+PONG\r\n";

lazy_static! {
    static ref NOT_SUPPORTED: FnvHashSet<&'static str> = [
        "MSETNX", "BLPOP", "BRPOP", "BRPOPLPUSH", "KEYS", "MIGRATE", "MOVE", "OBJECT",
        "RANDOMKEY", "RENAME", "RENAMENX", "SCAN", "BITOP", "SDIFF", "SDIFFSTORE",
        "SINTER", "SINTERSTORE", "SMOVE", "SUNION", "SUNIONSTORE", "ZINTERSTORE",
        "ZUNIONSTORE", "PSUBSCRIBE", "PUBLISH", "PUNSUBSCRIBE", "SUBSCRIBE",
        "UNSUBSCRIBE", "DISCARD", "EXEC", "MULTI", "UNWATCH", "WATCH", "SCRIPT", "EVAL",
        "EVALSHA", "AUTH", "ECHO", "SELECT", "BGREWRITEAOF", "BGSAVE", "CLIENT", "CONFIG",
        "DBSIZE", "DEBUG", "FLUSHALL", "FLUSHDB", "INFO", "LASTSAVE", "MONITOR", "SAVE",
        "SHUTDOWN", "SLAVEOF", "REPLICAOF", "SLOWLOG", "SYNC", "TIME", "CLUSTER",
        "READONLY", "READWRITE",
    ]
    .into_iter()
    .collect();

    static ref CONTROL: FnvHashSet<&'static str> =
        ["PING", "QUIT", "COMMAND"].into_iter().collect();

    static ref READ_ONLY: FnvHashSet<&'static str> = [
        "GET", "MGET", "EXISTS", "STRLEN", "GETRANGE", "GETBIT", "BITCOUNT", "BITPOS",
        "TTL", "PTTL", "TYPE", "DUMP", "HGET", "HMGET", "HGETALL", "HEXISTS", "HLEN",
        "HKEYS", "HVALS", "HSTRLEN", "HSCAN", "LLEN", "LRANGE", "LINDEX", "SCARD",
        "SISMEMBER", "SMEMBERS", "SRANDMEMBER", "SSCAN", "ZCARD", "ZCOUNT", "ZLEXCOUNT",
        "ZRANGE", "ZRANGEBYLEX", "ZRANGEBYSCORE", "ZRANK", "ZREVRANGE", "ZREVRANGEBYLEX",
        "ZREVRANGEBYSCORE", "ZREVRANK", "ZSCORE", "ZSCAN", "PFCOUNT", "GEOHASH", "GEOPOS",
        "GEODIST", "GEORADIUS_RO", "GEORADIUSBYMEMBER_RO",
    ]
    .into_iter()
    .collect();
}

/// How the proxy treats a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    Read,
    Write,
    NotSupport,
    Ctl,
}

impl CmdType {
    fn classify(cmd: &str) -> Self {
        if CONTROL.contains(cmd) {
            CmdType::Ctl
        } else if NOT_SUPPORTED.contains(cmd) {
            CmdType::NotSupport
        } else if READ_ONLY.contains(cmd) {
            CmdType::Read
        } else {
            CmdType::Write
        }
    }
}

/// One Redis command and its reply slot
#[derive(Debug, Clone)]
pub struct Request {
    resp: Resp,
    cmd: String,
    cmd_type: CmdType,
    reply: Option<Resp>,
}

impl Request {
    /// Build a request from a decoded client command.
    ///
    /// The command must be a non-empty array of bulk strings.
    pub fn new(resp: Resp) -> Result<Self, CodecError> {
        let cmd = match &resp {
            Resp::Array(Some(args)) if !args.is_empty() => {
                if !args.iter().all(|a| a.as_bulk().is_some()) {
                    return Err(CodecError::invalid(
                        "command arguments must be bulk strings",
                    ));
                }
                let name = args[0].as_bulk().map(|b| &b[..]).unwrap_or_default();
                String::from_utf8_lossy(name).to_ascii_uppercase()
            }
            _ => return Err(CodecError::invalid("command must be a non-empty array")),
        };
        let cmd_type = CmdType::classify(&cmd);

        Ok(Self {
            resp,
            cmd,
            cmd_type,
            reply: None,
        })
    }

    /// Build a request from command name and arguments
    pub fn from_args(command: &str, args: &[&str]) -> Result<Self, CodecError> {
        Self::new(Resp::command(command, args))
    }

    /// Decode a client command from the reader
    pub fn decode(reader: &mut Reader) -> Result<Self, CodecError> {
        Self::new(Resp::decode(reader)?)
    }

    /// Upper-cased command name
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn cmd_type(&self) -> CmdType {
        self.cmd_type
    }

    /// First argument after the command name
    pub fn key(&self) -> Option<&[u8]> {
        match &self.resp {
            Resp::Array(Some(args)) => args.get(1).and_then(Resp::as_bulk).map(|b| &b[..]),
            _ => None,
        }
    }

    /// Number of elements in the command array, including the name
    pub fn arg_count(&self) -> usize {
        match &self.resp {
            Resp::Array(Some(args)) => args.len(),
            _ => 0,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.cmd_type != CmdType::NotSupport
    }

    pub fn is_control(&self) -> bool {
        self.cmd_type == CmdType::Ctl
    }

    pub fn is_read_only(&self) -> bool {
        self.cmd_type == CmdType::Read
    }

    pub fn encode(&self, w: &mut Writer) -> Result<(), CodecError> {
        self.resp.encode(w);
        Ok(())
    }

    /// Decode this command's reply into the reply slot
    pub fn decode_reply(&mut self, reader: &mut Reader) -> Result<(), CodecError> {
        self.reply = Some(Resp::decode(reader)?);
        Ok(())
    }

    pub fn reply(&self) -> Option<&Resp> {
        self.reply.as_ref()
    }

    pub fn take_reply(&mut self) -> Option<Resp> {
        self.reply.take()
    }
}
