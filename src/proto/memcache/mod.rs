/// Memcache protocol support
pub mod binary;
