//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $counter:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Allocate the next process-unique ID
            pub fn next() -> Self {
                Self($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Get the raw ID value
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

counter_id!(
    /// Identifier of one physical connection (one multiplexer)
    ConnectionId,
    "conn",
    NEXT_CONNECTION_ID
);

counter_id!(
    /// Identifier of one channel, unique across all connections
    ChannelId,
    "channel",
    NEXT_CHANNEL_ID
);

counter_id!(
    /// Identifier of one request/response exchange
    ExchangeId,
    "exchange",
    NEXT_EXCHANGE_ID
);

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Accepting new exchanges
    Open,
    /// Close has begun; never reopens
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Open => write!(f, "open"),
            ConnectionStatus::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(format!("{}", ConnectionId(7)), "conn-7");
        assert_eq!(format!("{}", ChannelId(3)), "channel-3");
        assert_eq!(format!("{}", ExchangeId(11)), "exchange-11");
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(format!("{}", ConnectionStatus::Open), "open");
        assert_eq!(format!("{}", ConnectionStatus::Closed), "closed");
    }
}
