use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::TimeoutError;

/// Lifecycle event emitted by an in-flight request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestEvent {
    /// A socket was assigned. `connecting` is `false` for sockets that are
    /// already connected, e.g. reused from a pool.
    Socket { connecting: bool },
    /// The assigned socket finished connecting.
    Connect,
    /// Response headers arrived.
    Response,
    /// The response body was fully received.
    End,
    /// The inactivity timeout armed through
    /// [`RequestHandle::arm_inactivity_timeout`] elapsed.
    Timeout,
    /// The request failed. Carries the timeout error when the failure was one.
    Error(Option<TimeoutError>),
}

/// Event fan-out owned by a request.
///
/// Request implementations embed one and call [`Lifecycle::emit`] as the
/// request progresses. Subscribers only see events emitted after they
/// subscribed; the event stream closes once the `Lifecycle` is dropped.
#[derive(Debug, Default)]
pub struct Lifecycle {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RequestEvent>>>,
    coordinated: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RequestEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber, dropping the ones that
    /// went away.
    pub fn emit(&self, event: RequestEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Sets the coordinator marker. Returns `false` if it was already set.
    pub fn mark_coordinated(&self) -> bool {
        !self.coordinated.swap(true, Ordering::AcqRel)
    }

    /// Whether a timeout coordinator is attached.
    pub fn is_coordinated(&self) -> bool {
        self.coordinated.load(Ordering::Acquire)
    }
}

/// Capabilities a coordinator needs from the request it supervises.
pub trait RequestHandle: Send + Sync + 'static {
    /// Event source for this request.
    fn lifecycle(&self) -> &Lifecycle;

    /// Aborts the request. Must be safe to call more than once.
    fn abort(&self);

    /// Surfaces `err` to whoever is awaiting the request.
    ///
    /// The default emits [`RequestEvent::Error`] through the lifecycle.
    fn emit_error(&self, err: TimeoutError) {
        self.lifecycle().emit(RequestEvent::Error(Some(err)));
    }

    /// Whether the underlying transport is still connecting.
    ///
    /// Must return `true` from creation until the socket has connected,
    /// including while no socket has been assigned yet, and `false` once it
    /// has connected. An expired request deadline is reported as
    /// `ETIMEDOUT` while this is `true` and as `ESOCKETTIMEDOUT` otherwise.
    fn is_connecting(&self) -> bool;

    /// Asks the transport to emit [`RequestEvent::Timeout`] once the socket
    /// has seen no traffic for `timeout`. Rearmed by every byte transferred.
    fn arm_inactivity_timeout(&self, timeout: Duration);

    /// Host used in error messages.
    fn host(&self) -> Option<String> {
        None
    }
}
