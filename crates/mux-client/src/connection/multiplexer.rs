//! Multiplexing exchanges over one physical connection
//!
//! The multiplexer owns a session and the set of channels currently in
//! flight on it. `send` registers a fresh channel per exchange, `release`
//! hands capacity back to the destination, and `close_with` tears the
//! connection down.
//!
//! # Close ordering
//!
//! 1. The destination is told to remove the connection, so nothing can
//!    pick it for a new exchange while teardown is in progress.
//! 2. The session is closed with `NoError`, fire and forget.
//! 3. Every live channel's exchange is aborted with the failure and the
//!    live set is cleared.
//!
//! The `closed` flag is flipped under the write side of `gate`, and `send`
//! registers channels under its read side. A `send` racing a close is
//! therefore either registered before the flip, and aborted in step 3, or
//! rejected with a retryable `SendFailure`.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use mux_core::traits::{noop, Destination, Session, SessionListener};
use mux_core::{
    ChannelId, ConnectionFailure, ConnectionId, ConnectionStatus, DispatchError, ExchangeError,
    ExchangeId, SendFailure, SessionError,
};
use mux_protocol::ErrorCode;

use crate::channel::Channel;
use crate::exchange::Exchange;

/// Owns one session and the channels multiplexed over it
pub struct ConnectionMultiplexer {
    id: ConnectionId,
    destination: Weak<dyn Destination>,
    session: Arc<dyn Session>,
    /// Channels whose exchange is still in flight
    channels: DashMap<ChannelId, Arc<Channel>>,
    /// Orders channel registration against the closed flag
    gate: RwLock<()>,
    closed: AtomicBool,
    max_concurrent_streams: u32,
    this: Weak<ConnectionMultiplexer>,
}

impl ConnectionMultiplexer {
    /// Create a multiplexer over `session` and attach it as the session listener
    pub fn new(
        id: ConnectionId,
        destination: Weak<dyn Destination>,
        session: Arc<dyn Session>,
        max_concurrent_streams: u32,
    ) -> Arc<Self> {
        let multiplexer = Arc::new_cyclic(|this| Self {
            id,
            destination,
            session,
            channels: DashMap::new(),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            max_concurrent_streams,
            this: this.clone(),
        });

        let weak = Arc::downgrade(&multiplexer);
        let listener: Weak<dyn SessionListener> = weak;
        multiplexer.session.attach(listener);

        tracing::debug!("Opened {}", multiplexer);
        multiplexer
    }

    /// Connection identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The underlying session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Whether close has begun
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current lifecycle status
    pub fn status(&self) -> ConnectionStatus {
        if self.is_closed() {
            ConnectionStatus::Closed
        } else {
            ConnectionStatus::Open
        }
    }

    /// Number of channels in flight
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Whether the connection is open with room for another stream
    pub fn has_capacity(&self) -> bool {
        !self.is_closed() && self.channels.len() < self.max_concurrent_streams as usize
    }

    /// Exchanges currently in flight
    pub fn live_exchanges(&self) -> Vec<ExchangeId> {
        self.channels
            .iter()
            .filter_map(|entry| entry.value().exchange())
            .map(|exchange| exchange.id())
            .collect()
    }

    /// Dispatch `exchange` on a new channel
    ///
    /// Only local bookkeeping and stream submission happen here; the
    /// outcome is delivered through the exchange. On failure no channel is
    /// left registered and the exchange is left unresolved unless a
    /// concurrent close already aborted it.
    pub fn send(&self, exchange: &Exchange) -> Result<(), SendFailure> {
        if exchange.is_resolved() {
            return Err(SendFailure::new(DispatchError::AlreadyResolved));
        }
        exchange.normalize()?;

        let channel = self.new_channel();
        {
            let _gate = self.gate.read().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                tracing::debug!("Rejecting {} on closed {}", exchange.id(), self.id);
                return Err(SendFailure::new(DispatchError::Closed));
            }
            self.channels.insert(channel.id(), Arc::clone(&channel));
        }

        match channel.send(exchange) {
            Ok(stream) => {
                tracing::debug!("{} dispatched {} on {}", self.id, exchange.id(), stream);
                Ok(())
            }
            Err(error) => {
                self.channels.remove(&channel.id());
                tracing::debug!("{} failed to dispatch {}: {}", self.id, exchange.id(), error);
                Err(SendFailure::new(error))
            }
        }
    }

    /// Hand a finished channel back
    ///
    /// Removing a channel that is not registered is a no-op. The destination
    /// is only told about spare capacity while the connection is open; the
    /// read side of `gate` keeps a close from starting in between.
    pub fn release(&self, channel: &Channel) {
        if self.channels.remove(&channel.id()).is_none() {
            tracing::trace!("{} already removed from {}", channel.id(), self.id);
            return;
        }
        let _gate = self.gate.read().unwrap_or_else(|e| e.into_inner());
        if self.is_closed() {
            return;
        }
        tracing::trace!("{} released {}", self.id, channel.id());
        if let Some(destination) = self.destination.upgrade() {
            destination.release(self.id);
        }
    }

    /// Close with a generic closed-connection failure
    pub fn close(&self) -> bool {
        self.close_with(ConnectionFailure::Closed)
    }

    /// Tear the connection down, aborting every exchange still in flight
    ///
    /// Returns `true` for the call that performed the teardown; later calls
    /// do nothing.
    pub fn close_with(&self, failure: ConnectionFailure) -> bool {
        {
            let _gate = self.gate.write().unwrap_or_else(|e| e.into_inner());
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
        }

        match &failure {
            ConnectionFailure::Closed => tracing::info!("Closing {}", self),
            other => tracing::warn!("Closing {}: {}", self, other),
        }

        if let Some(destination) = self.destination.upgrade() {
            destination.remove(self.id);
        }

        let reason = failure.to_string();
        if !self.session.close(ErrorCode::NoError, &reason, noop()) {
            tracing::debug!("Session of {} was already closed", self.id);
        }

        self.abort(failure);
        true
    }

    fn abort(&self, failure: ConnectionFailure) {
        let channels: Vec<Arc<Channel>> = self
            .channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.channels.clear();

        let mut aborted = 0;
        for channel in channels {
            if let Some(exchange) = channel.exchange() {
                if exchange.abort(ExchangeError::Aborted(failure.clone())) {
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            tracing::info!("Aborted {} exchanges on {}", aborted, self.id);
        }
    }

    fn new_channel(&self) -> Arc<Channel> {
        Channel::new(self.id, self.this.clone(), Arc::clone(&self.session))
    }
}

impl SessionListener for ConnectionMultiplexer {
    fn on_close(&self, code: ErrorCode, reason: &str) {
        if code.is_graceful() {
            tracing::debug!("Peer is closing {}: {}", self.id, reason);
        } else {
            tracing::warn!("Peer is closing {} with {}: {}", self.id, code, reason);
        }
        self.close_with(ConnectionFailure::Remote {
            code,
            reason: reason.to_string(),
        });
    }

    fn on_failure(&self, error: SessionError) {
        let reason = match error {
            SessionError::Transport(reason) => reason,
            other => other.to_string(),
        };
        self.close_with(ConnectionFailure::Transport(reason));
    }
}

impl fmt::Display for ConnectionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionMultiplexer@{}[{:?}]", self.id, self.session)
    }
}

impl fmt::Debug for ConnectionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionMultiplexer")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("channels", &self.channels.len())
            .finish()
    }
}
