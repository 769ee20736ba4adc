//! Per-exchange channels
//!
//! One physical connection carries many concurrent streams, so the
//! multiplexer creates a fresh `Channel` for every exchange instead of
//! reusing one. A channel drives exactly one session stream, turns the
//! stream events back into an exchange outcome, and hands itself back to
//! its multiplexer exactly once when the exchange is over.

use bytes::{Bytes, BytesMut};
use http::{response, Response};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mux_core::traits::{Session, StreamListener};
use mux_core::{ChannelId, ConnectionId, DispatchError, ExchangeError, SessionError};
use mux_protocol::{ErrorCode, StreamId};

use crate::connection::ConnectionMultiplexer;
use crate::exchange::{Exchange, WeakExchange};

/// Binding of one exchange to one session stream
pub struct Channel {
    id: ChannelId,
    connection: ConnectionId,
    multiplexer: Weak<ConnectionMultiplexer>,
    session: Arc<dyn Session>,
    exchange: Mutex<Option<WeakExchange>>,
    stream: Mutex<Option<StreamId>>,
    response: Mutex<PendingResponse>,
    /// Owner cancelled the exchange
    cancelled: AtomicBool,
    /// Terminal; set by whichever path releases the channel first
    released: AtomicBool,
    this: Weak<Channel>,
}

/// Response parts gathered until the stream ends
#[derive(Default)]
struct PendingResponse {
    head: Option<response::Parts>,
    body: BytesMut,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Channel {
    /// Create a channel on `session`, owned by `multiplexer`
    pub fn new(
        connection: ConnectionId,
        multiplexer: Weak<ConnectionMultiplexer>,
        session: Arc<dyn Session>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ChannelId::next(),
            connection,
            multiplexer,
            session,
            exchange: Mutex::new(None),
            stream: Mutex::new(None),
            response: Mutex::new(PendingResponse::default()),
            cancelled: AtomicBool::new(false),
            released: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Channel identifier
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Connection this channel belongs to
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Stream opened for the exchange, once dispatched
    pub fn stream(&self) -> Option<StreamId> {
        *lock(&self.stream)
    }

    /// Currently bound exchange, or `None` once the channel is terminal
    pub fn exchange(&self) -> Option<Exchange> {
        if self.is_released() {
            return None;
        }
        lock(&self.exchange).as_ref().and_then(WeakExchange::upgrade)
    }

    /// Whether the channel has been handed back to its multiplexer
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Bind `exchange` and open its stream
    ///
    /// On failure the exchange is unbound again and the channel is left
    /// terminal without notifying the multiplexer; the caller removes it.
    pub fn send(&self, exchange: &Exchange) -> Result<StreamId, DispatchError> {
        let this = self.this.upgrade().ok_or(DispatchError::Closed)?;
        exchange.bind(&this)?;
        // Visible to a concurrent close before the stream exists
        *lock(&self.exchange) = Some(exchange.downgrade());
        // Registered before the close but bound after its abort pass
        if self.multiplexer.upgrade().is_some_and(|m| m.is_closed()) {
            self.abandon(exchange);
            return Err(DispatchError::Closed);
        }

        let listener: Arc<dyn StreamListener> = this;
        let opened = exchange.with_request(|request| self.session.new_stream(request, listener));

        match opened {
            Ok(stream) => {
                *lock(&self.stream) = Some(stream);
                if self.cancelled.load(Ordering::Acquire) {
                    self.session.reset(stream, ErrorCode::Cancel);
                }
                tracing::trace!("{} opened {} for {}", self.id, stream, exchange.id());
                Ok(stream)
            }
            Err(error) => {
                self.abandon(exchange);
                Err(DispatchError::Session(error))
            }
        }
    }

    fn abandon(&self, exchange: &Exchange) {
        self.released.store(true, Ordering::Release);
        lock(&self.exchange).take();
        exchange.unbind();
    }

    /// Abort driven by exchange cancellation
    pub(crate) fn abort(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.terminate(Some(ErrorCode::Cancel));
    }

    fn finish(&self, outcome: Result<Response<Bytes>, ExchangeError>) {
        if let Some(exchange) = self.exchange() {
            let resolved = match outcome {
                Ok(response) => exchange.complete(response),
                Err(error) => exchange.fail(error),
            };
            if !resolved {
                tracing::trace!("{} already resolved before {} finished", exchange.id(), self.id);
            }
        }
        self.terminate(None);
    }

    fn terminate(&self, reset: Option<ErrorCode>) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let (Some(code), Some(stream)) = (reset, self.stream()) {
            self.session.reset(stream, code);
        }
        lock(&self.exchange).take();
        if let Some(multiplexer) = self.multiplexer.upgrade() {
            multiplexer.release(self);
        }
    }
}

impl StreamListener for Channel {
    fn on_response(&self, head: response::Parts) {
        lock(&self.response).head = Some(head);
    }

    fn on_data(&self, data: Bytes, end_stream: bool) {
        let mut pending = lock(&self.response);
        pending.body.extend_from_slice(&data);
        if !end_stream {
            return;
        }
        let head = pending.head.take();
        let body = std::mem::take(&mut pending.body).freeze();
        drop(pending);

        match head {
            Some(head) => self.finish(Ok(Response::from_parts(head, body))),
            None => self.finish(Err(ExchangeError::Stream(SessionError::Protocol(
                "response body before response headers".to_string(),
            )))),
        }
    }

    fn on_reset(&self, code: ErrorCode) {
        tracing::debug!("{} reset by peer: {}", self.id, code);
        self.finish(Err(ExchangeError::Reset(code)));
    }

    fn on_failure(&self, error: SessionError) {
        tracing::debug!("{} stream failed: {}", self.id, error);
        self.finish(Err(ExchangeError::Stream(error)));
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("stream", &self.stream())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use mux_core::traits::{CloseCallback, SessionListener};

    /// Session that accepts one stream and records resets
    #[derive(Debug, Default)]
    struct OneShotSession {
        refuse: bool,
        resets: Mutex<Vec<(StreamId, ErrorCode)>>,
    }

    impl Session for OneShotSession {
        fn new_stream(
            &self,
            _request: &Request<Bytes>,
            _listener: Arc<dyn StreamListener>,
        ) -> Result<StreamId, SessionError> {
            if self.refuse {
                Err(SessionError::Closed)
            } else {
                Ok(StreamId::new(1))
            }
        }

        fn reset(&self, stream: StreamId, code: ErrorCode) {
            lock(&self.resets).push((stream, code));
        }

        fn close(&self, _code: ErrorCode, _reason: &str, callback: CloseCallback) -> bool {
            callback(Ok(()));
            true
        }

        fn is_closed(&self) -> bool {
            false
        }

        fn attach(&self, _listener: Weak<dyn SessionListener>) {}
    }

    fn detached(session: Arc<OneShotSession>) -> Arc<Channel> {
        Channel::new(ConnectionId::next(), Weak::new(), session)
    }

    fn exchange() -> Exchange {
        Exchange::new(
            Request::get("https://example.com/")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    fn ok_head() -> response::Parts {
        Response::builder().status(200).body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_send_binds_exchange() {
        let channel = detached(Arc::new(OneShotSession::default()));
        let exchange = exchange();
        assert!(channel.exchange().is_none());

        assert_eq!(channel.send(&exchange).unwrap(), StreamId::new(1));

        assert_eq!(channel.exchange(), Some(exchange));
        assert_eq!(channel.stream(), Some(StreamId::new(1)));
    }

    #[tokio::test]
    async fn test_body_chunks_are_joined() {
        let channel = detached(Arc::new(OneShotSession::default()));
        let exchange = exchange();
        channel.send(&exchange).unwrap();

        channel.on_response(ok_head());
        channel.on_data(Bytes::from_static(b"hello, "), false);
        channel.on_data(Bytes::from_static(b"world"), true);

        let response = exchange.response().await.unwrap();
        assert_eq!(response.body(), &Bytes::from_static(b"hello, world"));
        assert!(channel.is_released());
        assert!(channel.exchange().is_none());
    }

    #[tokio::test]
    async fn test_body_without_head_fails_exchange() {
        let channel = detached(Arc::new(OneShotSession::default()));
        let exchange = exchange();
        channel.send(&exchange).unwrap();

        channel.on_data(Bytes::from_static(b"orphan"), true);

        assert!(matches!(
            exchange.response().await.unwrap_err(),
            ExchangeError::Stream(SessionError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_stream_unbinds_exchange() {
        let channel = detached(Arc::new(OneShotSession {
            refuse: true,
            ..Default::default()
        }));
        let exchange = exchange();

        assert_eq!(
            channel.send(&exchange).unwrap_err(),
            DispatchError::Session(SessionError::Closed)
        );
        assert!(channel.is_released());
        assert!(!exchange.is_resolved());

        let retry = detached(Arc::new(OneShotSession::default()));
        assert!(retry.send(&exchange).is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_resets_stream_once() {
        let session = Arc::new(OneShotSession::default());
        let channel = detached(session.clone());
        let exchange = exchange();
        channel.send(&exchange).unwrap();

        assert!(exchange.abort(ExchangeError::Cancelled("no longer needed".to_string())));
        channel.abort();
        channel.on_reset(ErrorCode::Cancel);

        assert_eq!(
            *lock(&session.resets),
            vec![(StreamId::new(1), ErrorCode::Cancel)]
        );
        assert!(channel.is_released());
    }
}
