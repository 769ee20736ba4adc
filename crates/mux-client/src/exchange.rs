//! Request/response exchanges
//!
//! An `Exchange` is owned by the caller that issued it. Channels and the
//! multiplexer only ever hold a `WeakExchange`, so dropping every handle
//! simply discards whatever outcome was still pending.
//!
//! Resolution is single-shot: the first of completion or abort wins and
//! every later attempt is a no-op.

use bytes::Bytes;
use http::{Request, Response};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::oneshot;

use mux_core::{DispatchError, ExchangeError, ExchangeId};
use mux_protocol::normalize_request;

use crate::channel::Channel;

type Outcome = Result<Response<Bytes>, ExchangeError>;

/// Handle to one request/response cycle
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<ExchangeInner>,
}

/// Non-owning reference to an exchange
#[derive(Clone)]
pub struct WeakExchange {
    inner: Weak<ExchangeInner>,
}

struct ExchangeInner {
    id: ExchangeId,
    request: Mutex<Request<Bytes>>,
    /// Taken by whichever path resolves the exchange first
    resolver: Mutex<Option<oneshot::Sender<Outcome>>>,
    outcome: Mutex<Option<oneshot::Receiver<Outcome>>>,
    channel: Mutex<Option<Weak<Channel>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Exchange {
    /// Create an exchange for `request`
    pub fn new(request: Request<Bytes>) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            inner: Arc::new(ExchangeInner {
                id: ExchangeId::next(),
                request: Mutex::new(request),
                resolver: Mutex::new(Some(tx)),
                outcome: Mutex::new(Some(rx)),
                channel: Mutex::new(None),
            }),
        }
    }

    /// Exchange identifier
    pub fn id(&self) -> ExchangeId {
        self.inner.id
    }

    /// Run `f` against the current request
    pub fn with_request<R>(&self, f: impl FnOnce(&Request<Bytes>) -> R) -> R {
        f(&*lock(&self.inner.request))
    }

    /// Whether the exchange has completed or been aborted
    pub fn is_resolved(&self) -> bool {
        lock(&self.inner.resolver).is_none()
    }

    /// Wait for the outcome
    ///
    /// Only the first caller receives the outcome; later callers get
    /// `ExchangeError::Dropped`.
    pub async fn response(&self) -> Result<Response<Bytes>, ExchangeError> {
        let receiver = lock(&self.inner.outcome).take();
        match receiver {
            Some(rx) => rx.await.unwrap_or(Err(ExchangeError::Dropped)),
            None => Err(ExchangeError::Dropped),
        }
    }

    /// Abort the exchange with `error`
    ///
    /// Returns `true` if this call resolved the exchange. The bound channel,
    /// if any, resets its stream and releases itself.
    pub fn abort(&self, error: ExchangeError) -> bool {
        tracing::debug!("Aborting {}: {}", self.inner.id, error);
        if !self.resolve(Err(error)) {
            return false;
        }
        let channel = lock(&self.inner.channel).take().and_then(|c| c.upgrade());
        if let Some(channel) = channel {
            channel.abort();
        }
        true
    }

    /// Downgrade to a non-owning reference
    pub fn downgrade(&self) -> WeakExchange {
        WeakExchange {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn complete(&self, response: Response<Bytes>) -> bool {
        self.resolve(Ok(response))
    }

    pub(crate) fn fail(&self, error: ExchangeError) -> bool {
        self.resolve(Err(error))
    }

    pub(crate) fn normalize(&self) -> Result<(), DispatchError> {
        normalize_request(&mut *lock(&self.inner.request))?;
        Ok(())
    }

    /// Bind the exchange to `channel`
    pub(crate) fn bind(&self, channel: &Arc<Channel>) -> Result<(), DispatchError> {
        let mut bound = lock(&self.inner.channel);
        if self.is_resolved() {
            return Err(DispatchError::AlreadyResolved);
        }
        if bound
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|existing| !existing.is_released())
        {
            return Err(DispatchError::AlreadyBound);
        }
        *bound = Some(Arc::downgrade(channel));
        Ok(())
    }

    pub(crate) fn unbind(&self) {
        lock(&self.inner.channel).take();
    }

    fn resolve(&self, outcome: Outcome) -> bool {
        let resolver = lock(&self.inner.resolver).take();
        match resolver {
            Some(tx) => {
                // Receiver may be gone; the exchange still counts as resolved
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl WeakExchange {
    /// Upgrade to an owning handle if the exchange is still alive
    pub fn upgrade(&self) -> Option<Exchange> {
        self.inner.upgrade().map(|inner| Exchange { inner })
    }
}

impl PartialEq for Exchange {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Exchange {}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.inner.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
