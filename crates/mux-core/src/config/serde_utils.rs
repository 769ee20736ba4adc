//! Serde helpers for configuration durations
//!
//! Timeouts read better in TOML as plain integers, so durations are stored
//! as whole seconds or milliseconds depending on their scale:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Limits {
//!     #[serde(with = "mux_core::config::serde_utils::duration_secs")]
//!     response_timeout: Duration,
//!     #[serde(with = "mux_core::config::serde_utils::duration_millis")]
//!     response_delay: Duration,
//! }
//! ```

/// Duration stored as whole seconds (u64)
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Duration stored as whole milliseconds (u64)
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
