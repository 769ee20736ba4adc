//! In-process loopback session
//!
//! Answers every stream locally from a responder function after an
//! optional delay. Used by the `mux-stress` driver and by tests that need
//! a session with real asynchronous delivery but no network.

use bytes::Bytes;
use dashmap::DashMap;
use http::{Request, Response};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

use mux_core::traits::{CloseCallback, Session, SessionFactory, SessionListener, StreamListener};
use mux_core::{ConnectionId, SessionError};
use mux_protocol::{ErrorCode, StreamId};

/// Builds the response for a request
pub type Responder = Arc<dyn Fn(&Request<Bytes>) -> Response<Bytes> + Send + Sync>;

/// Responder that answers `200 OK` echoing the request body
pub fn echo_responder() -> Responder {
    Arc::new(|request: &Request<Bytes>| {
        let mut response = Response::new(request.body().clone());
        if let Some(path) = request.uri().path_and_query() {
            if let Ok(value) = path.as_str().parse() {
                response.headers_mut().insert("x-echo-path", value);
            }
        }
        response
    })
}

/// Session that answers streams in-process
pub struct LoopbackSession {
    connection: ConnectionId,
    max_concurrent_streams: u32,
    delay: Duration,
    responder: Responder,
    /// Client streams use odd ids
    next_stream: AtomicU32,
    streams: Arc<DashMap<StreamId, Arc<dyn StreamListener>>>,
    closed: AtomicBool,
    listener: Mutex<Option<Weak<dyn SessionListener>>>,
    runtime: Handle,
}

impl LoopbackSession {
    /// Create a loopback session; must be called within a tokio runtime
    pub fn new(
        connection: ConnectionId,
        max_concurrent_streams: u32,
        delay: Duration,
        responder: Responder,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(Self {
            connection,
            max_concurrent_streams,
            delay,
            responder,
            next_stream: AtomicU32::new(1),
            streams: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
            listener: Mutex::new(None),
            runtime,
        })
    }

    /// Number of streams awaiting their response
    pub fn open_streams(&self) -> usize {
        self.streams.len()
    }

    /// Simulate a transport fault
    pub fn fail(&self, reason: &str) {
        if let Some(listener) = self.session_listener() {
            listener.on_failure(SessionError::Transport(reason.to_string()));
        }
    }

    /// Simulate the peer closing the connection
    pub fn go_away(&self, code: ErrorCode, reason: &str) {
        if let Some(listener) = self.session_listener() {
            listener.on_close(code, reason);
        }
    }

    fn session_listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl Session for LoopbackSession {
    fn new_stream(
        &self,
        request: &Request<Bytes>,
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamId, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        if self.streams.len() >= self.max_concurrent_streams as usize {
            return Err(SessionError::TooManyStreams {
                limit: self.max_concurrent_streams,
            });
        }

        let stream = StreamId::new(self.next_stream.fetch_add(2, Ordering::Relaxed));
        let response = (self.responder)(request);
        self.streams.insert(stream, listener);

        let streams = Arc::clone(&self.streams);
        let delay = self.delay;
        self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            // Reset or close may have dropped the stream meanwhile
            if let Some((_, listener)) = streams.remove(&stream) {
                let (head, body) = response.into_parts();
                listener.on_response(head);
                listener.on_data(body, true);
            }
        });

        Ok(stream)
    }

    fn reset(&self, stream: StreamId, code: ErrorCode) {
        if !stream.is_client_initiated() {
            tracing::warn!("{} ignoring reset of {}", self.connection, stream);
            return;
        }
        if self.streams.remove(&stream).is_some() {
            tracing::trace!("{} reset {} ({})", self.connection, stream, code);
        }
    }

    fn close(&self, code: ErrorCode, reason: &str, callback: CloseCallback) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            callback(Ok(()));
            return false;
        }
        let dropped = self.streams.len();
        self.streams.clear();
        tracing::debug!(
            "{} session closed ({}): {}; dropped {} streams",
            self.connection,
            code,
            reason,
            dropped
        );
        callback(Ok(()));
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn attach(&self, listener: Weak<dyn SessionListener>) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }
}

impl fmt::Debug for LoopbackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackSession")
            .field("connection", &self.connection)
            .field("open_streams", &self.streams.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Opens loopback sessions for a connection pool
pub struct LoopbackFactory {
    max_concurrent_streams: u32,
    delay: Duration,
    responder: Responder,
    sessions: DashMap<ConnectionId, Arc<LoopbackSession>>,
}

impl LoopbackFactory {
    /// Create a factory whose sessions answer with `responder` after `delay`
    pub fn new(max_concurrent_streams: u32, delay: Duration, responder: Responder) -> Self {
        Self {
            max_concurrent_streams,
            delay,
            responder,
            sessions: DashMap::new(),
        }
    }

    /// Session opened for `connection`, if any
    pub fn session(&self, connection: &ConnectionId) -> Option<Arc<LoopbackSession>> {
        self.sessions.get(connection).map(|r| Arc::clone(&r))
    }
}

impl SessionFactory for LoopbackFactory {
    fn open(&self, id: ConnectionId) -> Result<Arc<dyn Session>, SessionError> {
        let session = Arc::new(LoopbackSession::new(
            id,
            self.max_concurrent_streams,
            self.delay,
            Arc::clone(&self.responder),
        )?);
        self.sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Collector {
        responses: AtomicUsize,
        ends: AtomicUsize,
    }

    impl StreamListener for Collector {
        fn on_response(&self, _head: http::response::Parts) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }

        fn on_data(&self, _data: Bytes, end_stream: bool) {
            if end_stream {
                self.ends.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_reset(&self, _code: ErrorCode) {}

        fn on_failure(&self, _error: SessionError) {}
    }

    fn request() -> Request<Bytes> {
        Request::get("https://loopback/").body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_streams_use_odd_ids() {
        let session =
            LoopbackSession::new(ConnectionId::next(), 10, Duration::ZERO, echo_responder())
                .unwrap();
        let collector = Arc::new(Collector::default());

        let first = session.new_stream(&request(), collector.clone()).unwrap();
        let second = session.new_stream(&request(), collector.clone()).unwrap();

        assert_eq!(first, StreamId::new(1));
        assert_eq!(second, StreamId::new(3));
    }

    #[tokio::test]
    async fn test_stream_limit() {
        let session = LoopbackSession::new(
            ConnectionId::next(),
            1,
            Duration::from_secs(60),
            echo_responder(),
        )
        .unwrap();
        let collector = Arc::new(Collector::default());

        session.new_stream(&request(), collector.clone()).unwrap();
        assert_eq!(
            session.new_stream(&request(), collector).unwrap_err(),
            SessionError::TooManyStreams { limit: 1 }
        );
    }

    #[tokio::test]
    async fn test_response_delivered() {
        let session =
            LoopbackSession::new(ConnectionId::next(), 10, Duration::ZERO, echo_responder())
                .unwrap();
        let collector = Arc::new(Collector::default());

        session.new_stream(&request(), collector.clone()).unwrap();
        for _ in 0..100 {
            if collector.ends.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(collector.responses.load(Ordering::SeqCst), 1);
        assert_eq!(collector.ends.load(Ordering::SeqCst), 1);
        assert_eq!(session.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let session =
            LoopbackSession::new(ConnectionId::next(), 10, Duration::ZERO, echo_responder())
                .unwrap();
        let completions = Arc::new(AtomicUsize::new(0));

        let counter = completions.clone();
        assert!(session.close(
            ErrorCode::NoError,
            "done",
            Box::new(move |result| {
                assert!(result.is_ok());
                counter.fetch_add(1, Ordering::SeqCst);
            })
        ));
        assert!(!session.close(ErrorCode::NoError, "again", mux_core::traits::noop()));

        assert!(session.is_closed());
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(
            session
                .new_stream(&request(), Arc::new(Collector::default()))
                .unwrap_err(),
            SessionError::Closed
        );
    }

    #[tokio::test]
    async fn test_reset_ignores_server_stream_ids() {
        let session = LoopbackSession::new(
            ConnectionId::next(),
            10,
            Duration::from_secs(60),
            echo_responder(),
        )
        .unwrap();
        let stream = session
            .new_stream(&request(), Arc::new(Collector::default()))
            .unwrap();

        session.reset(StreamId::new(stream.as_u32() + 1), ErrorCode::Cancel);
        assert_eq!(session.open_streams(), 1);

        session.reset(stream, ErrorCode::Cancel);
        assert_eq!(session.open_streams(), 0);
    }

    #[test]
    fn test_requires_runtime() {
        let result =
            LoopbackSession::new(ConnectionId::next(), 10, Duration::ZERO, echo_responder());
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }
}
