//! Connection pool implementation

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use mux_core::config::PoolConfig;
use mux_core::traits::{Destination, SessionFactory};
use mux_core::{ConnectionId, PoolError};

use super::ConnectionMultiplexer;
use crate::exchange::Exchange;

/// Pool of multiplexed connections to one destination
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    /// Connections indexed by ID; only open connections stay listed
    connections: DashMap<ConnectionId, Arc<ConnectionMultiplexer>>,
    /// Serializes opening new connections against `max_connections`
    opening: Mutex<()>,
    releases: AtomicU64,
    closed: AtomicBool,
    this: Weak<ConnectionPool>,
}

impl ConnectionPool {
    /// Create a new empty connection pool
    pub fn new(config: PoolConfig, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            factory,
            connections: DashMap::new(),
            opening: Mutex::new(()),
            releases: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Send an exchange on a connection with spare capacity
    ///
    /// Retryable failures move on to another connection as long as the
    /// exchange is still unresolved. Returns the connection that accepted
    /// the exchange.
    pub fn send(&self, exchange: &Exchange) -> Result<Arc<ConnectionMultiplexer>, PoolError> {
        let attempts = self.config.max_connections + 1;
        let mut last_failure = None;

        for attempt in 1..=attempts {
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            let connection = self.acquire()?;
            match connection.send(exchange) {
                Ok(()) => return Ok(connection),
                Err(failure) if failure.retry && !exchange.is_resolved() => {
                    tracing::debug!(
                        "Attempt {} for {} on {} failed: {}",
                        attempt,
                        exchange.id(),
                        connection.id(),
                        failure
                    );
                    last_failure = Some(failure);
                }
                Err(failure) => return Err(PoolError::Send(failure)),
            }
        }

        Err(last_failure.map(PoolError::Send).unwrap_or(PoolError::Exhausted {
            max: self.config.max_connections,
        }))
    }

    /// Pick an open connection with capacity, opening one if allowed
    pub fn acquire(&self) -> Result<Arc<ConnectionMultiplexer>, PoolError> {
        if let Some(connection) = self.find_available() {
            return Ok(connection);
        }

        let _opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }
        if let Some(connection) = self.find_available() {
            return Ok(connection);
        }
        if self.connections.len() >= self.config.max_connections {
            return Err(PoolError::Exhausted {
                max: self.config.max_connections,
            });
        }
        self.open()
    }

    /// Get a connection by ID
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ConnectionMultiplexer>> {
        self.connections.get(id).map(|r| Arc::clone(&r))
    }

    /// List all connections
    pub fn list(&self) -> Vec<Arc<ConnectionMultiplexer>> {
        self.connections.iter().map(|r| Arc::clone(&r)).collect()
    }

    /// Number of pooled connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of channel releases accepted from pooled connections
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Close every pooled connection and refuse further exchanges
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wait out any open in progress so it cannot slip past the snapshot
        let connections = {
            let _opening = self.opening.lock().unwrap_or_else(|e| e.into_inner());
            self.list()
        };
        tracing::info!("Closing connection pool ({} connections)", connections.len());
        for connection in connections {
            connection.close();
        }
    }

    fn find_available(&self) -> Option<Arc<ConnectionMultiplexer>> {
        self.connections
            .iter()
            .find(|entry| entry.value().has_capacity())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn open(&self) -> Result<Arc<ConnectionMultiplexer>, PoolError> {
        let id = ConnectionId::next();
        let session = self.factory.open(id).map_err(PoolError::Open)?;
        let destination: Weak<dyn Destination> = self.this.clone();
        let connection = ConnectionMultiplexer::new(
            id,
            destination,
            session,
            self.config.max_concurrent_streams,
        );
        self.connections.insert(id, Arc::clone(&connection));
        tracing::info!(
            "Opened {} ({}/{} connections)",
            id,
            self.connections.len(),
            self.config.max_connections
        );
        Ok(connection)
    }
}

impl Destination for ConnectionPool {
    fn release(&self, connection: ConnectionId) {
        match self.connections.get(&connection) {
            Some(entry) if !entry.is_closed() => {
                self.releases.fetch_add(1, Ordering::Relaxed);
            }
            _ => tracing::trace!("Ignoring release of unpooled {}", connection),
        }
    }

    fn remove(&self, connection: ConnectionId) {
        if self.connections.remove(&connection).is_some() {
            tracing::debug!("Removed {} from pool", connection);
        }
    }
}
