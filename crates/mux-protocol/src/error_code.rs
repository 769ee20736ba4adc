//! Error codes carried by stream resets and connection shutdown
//!
//! The values follow the HTTP/2 error-code registry. `NoError` is the
//! graceful code used when a connection is closed locally.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Error code for stream resets and session close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown, no error
    NoError = 0x0,
    /// Protocol violation detected
    ProtocolError = 0x1,
    /// Implementation fault
    InternalError = 0x2,
    /// Flow-control limits violated
    FlowControlError = 0x3,
    /// Settings not acknowledged in time
    SettingsTimeout = 0x4,
    /// Frame received for a half-closed stream
    StreamClosed = 0x5,
    /// Frame with invalid size
    FrameSizeError = 0x6,
    /// Stream refused before any processing
    RefusedStream = 0x7,
    /// Stream no longer needed
    Cancel = 0x8,
    /// Header compression state broken
    CompressionError = 0x9,
    /// Connection for a CONNECT request was reset
    ConnectError = 0xa,
    /// Peer is generating excessive load
    EnhanceYourCalm = 0xb,
    /// Transport security requirements not met
    InadequateSecurity = 0xc,
    /// HTTP/1.1 must be used instead
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// Convert from the wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0 => Some(Self::NoError),
            0x1 => Some(Self::ProtocolError),
            0x2 => Some(Self::InternalError),
            0x3 => Some(Self::FlowControlError),
            0x4 => Some(Self::SettingsTimeout),
            0x5 => Some(Self::StreamClosed),
            0x6 => Some(Self::FrameSizeError),
            0x7 => Some(Self::RefusedStream),
            0x8 => Some(Self::Cancel),
            0x9 => Some(Self::CompressionError),
            0xa => Some(Self::ConnectError),
            0xb => Some(Self::EnhanceYourCalm),
            0xc => Some(Self::InadequateSecurity),
            0xd => Some(Self::Http11Required),
            _ => None,
        }
    }

    /// Whether this code signals a graceful shutdown
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::NoError)
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or(ProtocolError::UnknownErrorCode(value))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoError => "no_error",
            Self::ProtocolError => "protocol_error",
            Self::InternalError => "internal_error",
            Self::FlowControlError => "flow_control_error",
            Self::SettingsTimeout => "settings_timeout",
            Self::StreamClosed => "stream_closed",
            Self::FrameSizeError => "frame_size_error",
            Self::RefusedStream => "refused_stream",
            Self::Cancel => "cancel",
            Self::CompressionError => "compression_error",
            Self::ConnectError => "connect_error",
            Self::EnhanceYourCalm => "enhance_your_calm",
            Self::InadequateSecurity => "inadequate_security",
            Self::Http11Required => "http_1_1_required",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        for code in [
            ErrorCode::NoError,
            ErrorCode::ProtocolError,
            ErrorCode::RefusedStream,
            ErrorCode::Cancel,
            ErrorCode::Http11Required,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
    }

    #[test]
    fn test_unknown_error_code() {
        assert_eq!(ErrorCode::from_u32(0xe), None);
        assert_eq!(
            ErrorCode::try_from(0xff),
            Err(ProtocolError::UnknownErrorCode(0xff))
        );
    }

    #[test]
    fn test_only_no_error_is_graceful() {
        assert!(ErrorCode::NoError.is_graceful());
        assert!(!ErrorCode::Cancel.is_graceful());
        assert_eq!(ErrorCode::Http11Required.to_string(), "http_1_1_required");
    }
}
