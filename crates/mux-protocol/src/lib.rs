//! mux-protocol: Protocol vocabulary for h2mux stream multiplexing
//!
//! This crate defines the identifiers, error codes and request
//! normalization shared by the session, channel and multiplexer layers.
//! Framing, flow control and header compression live in the session
//! implementation and are not modelled here.

pub mod error;
pub mod error_code;
pub mod normalize;
pub mod stream;

pub use error::ProtocolError;
pub use error_code::ErrorCode;
pub use normalize::normalize_request;
pub use stream::StreamId;
