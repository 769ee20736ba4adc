//! Protocol error types

use thiserror::Error;

/// Errors that can occur while preparing protocol-level data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Request has neither a URI authority nor a host header
    #[error("Request is missing an authority")]
    MissingAuthority,

    /// Request URI could not be rebuilt
    #[error("Invalid request URI: {0}")]
    InvalidUri(String),

    /// Error code outside the known taxonomy
    #[error("Unknown error code: {0:#x}")]
    UnknownErrorCode(u32),
}
