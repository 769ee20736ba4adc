//! mux-client: Multiplexes concurrent exchanges over shared connections
//!
//! A `ConnectionMultiplexer` owns one protocol session and fans every
//! exchange submitted to it out onto its own `Channel`, one stream per
//! exchange. The `ConnectionPool` picks a multiplexer for each exchange
//! and takes connections out of rotation as soon as they start closing.

pub mod channel;
pub mod connection;
pub mod exchange;
pub mod session;

pub use channel::Channel;
pub use connection::{ConnectionMultiplexer, ConnectionPool};
pub use exchange::Exchange;
