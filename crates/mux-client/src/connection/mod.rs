//! Connection management

mod multiplexer;
mod pool;

pub use multiplexer::ConnectionMultiplexer;
pub use pool::ConnectionPool;
