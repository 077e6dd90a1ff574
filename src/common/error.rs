//! Error types for shardkv

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Topology Errors ===
    #[error("Node unreachable: {node}: {reason}")]
    UnreachableNode { node: String, reason: String },

    #[error("No master elected for group {group_id}")]
    NoMasterElected { group_id: u32 },

    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Router shut down")]
    Shutdown,

    // === Pool Errors ===
    #[error("Pool exhausted for {addr}: no connection available after {waited:?}")]
    PoolExhausted { addr: String, waited: Duration },

    #[error("Pool closed: {0}")]
    PoolClosed(String),

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Codec Errors ===
    #[error("Codec error: {0}")]
    Codec(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// `NoMasterElected` is retryable only at a higher level: a later
    /// refresh may elect a master, but the router never retries by itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::ConnectionFailed(_)
                | Error::PoolExhausted { .. }
                | Error::PoolClosed(_)
                | Error::UnreachableNode { .. }
                | Error::NoMasterElected { .. }
        )
    }

    /// Did this error leave the connection it happened on in an unknown state?
    ///
    /// A server error reply is a complete frame, so the connection stays usable.
    pub fn is_connection_fault(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Protocol(_)
        )
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Error::ConnectionFailed(e.to_string())
        } else if let Some(code) = e.code() {
            // Keep the reply text as the server sent it, e.g. "READONLY You can't write..."
            match e.detail() {
                Some(detail) => Error::Server(format!("{} {}", code, detail)),
                None => Error::Server(code.to_string()),
            }
        } else {
            Error::Protocol(e.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}
