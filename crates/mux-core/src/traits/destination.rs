//! Destination (connection pool) contract

use crate::types::ConnectionId;

/// Allocator that selects, reuses and retires physical connections
///
/// A multiplexer notifies its destination when one of its channels frees
/// up capacity and, at the very start of close, that the connection must
/// no longer be handed out.
pub trait Destination: Send + Sync {
    /// A channel finished and the connection may serve another exchange
    fn release(&self, connection: ConnectionId);

    /// The connection is closing and must not be reused
    fn remove(&self, connection: ConnectionId);
}
