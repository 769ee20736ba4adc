//! Core error types for h2mux

use mux_protocol::{ErrorCode, ProtocolError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a session implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Session is closed or closing
    #[error("Session closed")]
    Closed,

    /// Peer's concurrent stream limit reached
    #[error("Too many concurrent streams (limit {limit})")]
    TooManyStreams { limit: u32 },

    /// Transport-level fault
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol violation on the session
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Why a whole connection is going away
///
/// Broadcast to every exchange still in flight when the connection closes,
/// hence `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// Explicit local close
    #[error("connection closed")]
    Closed,

    /// Peer closed the connection
    #[error("connection closed by peer ({code}): {reason}")]
    Remote { code: ErrorCode, reason: String },

    /// Transport fault reported by the session
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Terminal failure of a single exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Connection-level abort
    #[error("Exchange aborted: {0}")]
    Aborted(ConnectionFailure),

    /// Cancelled by the exchange owner
    #[error("Exchange cancelled: {0}")]
    Cancelled(String),

    /// Stream reset by the peer
    #[error("Stream reset by peer: {0}")]
    Reset(ErrorCode),

    /// Response did not arrive in time
    #[error("Exchange timed out")]
    TimedOut,

    /// Stream-level session failure
    #[error("Stream failed: {0}")]
    Stream(SessionError),

    /// Resolution side vanished or the response was already taken
    #[error("Exchange dropped")]
    Dropped,
}

/// Why an exchange could not be dispatched at all
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Connection has begun closing
    #[error("Connection is closed")]
    Closed,

    /// Exchange is already bound to a live channel
    #[error("Exchange is already bound to a channel")]
    AlreadyBound,

    /// Exchange already completed or was aborted
    #[error("Exchange is already resolved")]
    AlreadyResolved,

    /// Request could not be normalized
    #[error("Request normalization failed: {0}")]
    Normalize(#[from] ProtocolError),

    /// Session refused the stream
    #[error("Session refused the stream: {0}")]
    Session(#[from] SessionError),
}

/// Failure result of `send`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} (retry: {retry})")]
pub struct SendFailure {
    /// What went wrong
    pub error: DispatchError,
    /// Whether another connection may take the same exchange
    pub retry: bool,
}

impl SendFailure {
    /// Create a send failure, deriving retryability from the error
    pub fn new(error: DispatchError) -> Self {
        let retry = matches!(
            error,
            DispatchError::Closed
                | DispatchError::Session(SessionError::Closed)
                | DispatchError::Session(SessionError::TooManyStreams { .. })
        );
        Self { error, retry }
    }
}

impl From<DispatchError> for SendFailure {
    fn from(error: DispatchError) -> Self {
        Self::new(error)
    }
}

/// Connection pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every connection is busy and no new one may be opened
    #[error("Connection pool exhausted (max {max} connections)")]
    Exhausted { max: usize },

    /// Opening a new connection failed
    #[error("Failed to open connection: {0}")]
    Open(SessionError),

    /// Dispatch failed on every attempted connection
    #[error("Failed to send exchange: {0}")]
    Send(#[from] SendFailure),

    /// Pool has been closed
    #[error("Connection pool closed")]
    Closed,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
