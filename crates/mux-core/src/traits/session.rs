//! Session traits

use bytes::Bytes;
use http::{response, Request};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::SessionError;
use crate::types::ConnectionId;
use mux_protocol::{ErrorCode, StreamId};

/// Completion callback for `Session::close`
pub type CloseCallback = Box<dyn FnOnce(Result<(), SessionError>) + Send>;

/// Completion callback that ignores the outcome
pub fn noop() -> CloseCallback {
    Box::new(|_| {})
}

/// Per-stream event sink driven by the session
pub trait StreamListener: Send + Sync {
    /// Response head arrived
    fn on_response(&self, head: response::Parts);

    /// Body bytes arrived; `end_stream` marks the last frame
    fn on_data(&self, data: Bytes, end_stream: bool);

    /// Peer reset the stream
    fn on_reset(&self, code: ErrorCode);

    /// Stream failed locally
    fn on_failure(&self, error: SessionError);
}

/// Connection-level event sink
pub trait SessionListener: Send + Sync {
    /// Peer closed the session (GOAWAY)
    fn on_close(&self, code: ErrorCode, reason: &str);

    /// Transport fault detected asynchronously
    fn on_failure(&self, error: SessionError);
}

/// Protocol session owning one physical connection
///
/// Implementations perform framing, flow control, header compression and
/// stream-id allocation. None of these methods may block on network I/O.
pub trait Session: Send + Sync + fmt::Debug {
    /// Open a stream carrying `request`, delivering events to `listener`
    fn new_stream(
        &self,
        request: &Request<Bytes>,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamId, SessionError>;

    /// Reset an open stream
    fn reset(&self, stream: StreamId, code: ErrorCode);

    /// Start closing the session
    ///
    /// Returns `false` if the session was already closed. Repeated closes
    /// must not surface an error. Once close has begun, `new_stream` must
    /// fail with `SessionError::Closed`.
    fn close(&self, code: ErrorCode, reason: &str, callback: CloseCallback) -> bool;

    /// Whether close has begun
    fn is_closed(&self) -> bool;

    /// Register the listener notified of connection-level events
    fn attach(&self, listener: Weak<dyn SessionListener>);
}

/// Opens new sessions for a connection pool
pub trait SessionFactory: Send + Sync {
    /// Open a session for the connection identified by `id`
    fn open(&self, id: ConnectionId) -> Result<Arc<dyn Session>, SessionError>;
}
