use std::future::pending;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep_until, Instant, Sleep};

use crate::{AttachError, Phase, RequestEvent, RequestHandle, TimeoutError, Timeouts};

/// Attaches a timeout coordinator to `request` and returns the same handle.
///
/// Call this before the request is dispatched: events emitted earlier are not
/// observed. Deadlines for the connect and request phases are measured from
/// this call. Attaching to a handle that already carries a coordinator is a
/// no-op.
///
/// Fails with [`AttachError::NoRuntime`] when called outside of a Tokio
/// runtime; the request is then left unmarked.
pub fn attach<H: RequestHandle>(
    request: Arc<H>,
    timeouts: &Timeouts,
) -> std::result::Result<Arc<H>, AttachError> {
    let runtime = Handle::try_current().map_err(|_| AttachError::NoRuntime)?;
    if !request.lifecycle().mark_coordinated() {
        return Ok(request);
    }

    let events = request.lifecycle().subscribe();
    let mut coordinator = TimeoutCoordinator::new(&request, timeouts.clone());
    coordinator.arm(Instant::now());

    #[cfg(feature = "tracing")]
    tracing::debug!(
        host = coordinator.host.as_deref().unwrap_or(""),
        connect_ms = ?timeouts.connect,
        request_ms = ?timeouts.request,
        socket_ms = ?timeouts.socket,
        "timeout coordinator attached"
    );

    runtime.spawn(coordinator.run(events));
    Ok(request)
}

/// Where a supervised request currently stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum State {
    Idle,
    WaitingForSocket,
    Connecting,
    Connected,
    AwaitingResponse,
    ReceivingBody,
    Completed,
    TimedOut { code: &'static str },
    /// The request failed for a reason other than one of our deadlines.
    Failed,
}

impl State {
    fn is_terminal(self) -> bool {
        matches!(
            self,
            State::Completed | State::TimedOut { .. } | State::Failed
        )
    }

    fn is_connected(self) -> bool {
        matches!(
            self,
            State::Connected | State::AwaitingResponse | State::ReceivingBody
        )
    }
}

/// A coordinator-owned deadline: the timer plus the deferred abort it
/// schedules when it fires.
#[derive(Debug, Default)]
struct Arm {
    timer: Option<Pin<Box<Sleep>>>,
    deferred: bool,
}

impl Arm {
    fn start(&mut self, start: Instant, deadline: Option<Duration>) {
        // Deadlines too far out to represent are treated as unlimited.
        self.timer = deadline
            .and_then(|deadline| start.checked_add(deadline))
            .map(|at| Box::pin(sleep_until(at)));
    }

    async fn expired(&mut self) {
        match self.timer.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => pending().await,
        }
    }

    fn fire(&mut self) {
        self.timer = None;
        self.deferred = true;
    }

    fn take_deferred(&mut self) -> bool {
        std::mem::take(&mut self.deferred)
    }

    /// Clears the timer and any deferred abort. Returns `true` if a deferred
    /// abort was still pending.
    fn disarm(&mut self) -> bool {
        self.timer = None;
        self.take_deferred()
    }
}

pub(crate) struct TimeoutCoordinator<H> {
    request: Weak<H>,
    timeouts: Timeouts,
    host: Option<String>,
    state: State,
    connect: Arm,
    request_deadline: Arm,
}

impl<H: RequestHandle> TimeoutCoordinator<H> {
    pub(crate) fn new(request: &Arc<H>, timeouts: Timeouts) -> Self {
        Self {
            request: Arc::downgrade(request),
            host: request.host(),
            timeouts,
            state: State::Idle,
            connect: Arm::default(),
            request_deadline: Arm::default(),
        }
    }

    pub(crate) fn arm(&mut self, start: Instant) {
        self.connect.start(start, self.timeouts.get(Phase::Connect));
        self.request_deadline
            .start(start, self.timeouts.get(Phase::Request));
        self.state = State::WaitingForSocket;
    }

    pub(crate) async fn run(mut self, mut events: UnboundedReceiver<RequestEvent>) {
        while !self.state.is_terminal() {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    // The request was dropped.
                    None => break,
                },
                // Queued events always win over a deferred abort.
                () = tokio::task::yield_now(), if self.has_deferred() => self.run_deferred(),
                () = self.connect.expired() => self.timer_fired(Phase::Connect),
                () = self.request_deadline.expired() => self.timer_fired(Phase::Request),
            }
        }

        self.connect.disarm();
        self.request_deadline.disarm();

        #[cfg(feature = "tracing")]
        tracing::trace!(state = ?self.state, "timeout coordinator finished");
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    fn has_deferred(&self) -> bool {
        self.connect.deferred || self.request_deadline.deferred
    }

    pub(crate) fn dispatch(&mut self, event: RequestEvent) {
        if self.state.is_terminal() {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(?event, state = ?self.state, "request lifecycle event");

        match event {
            RequestEvent::Socket { connecting: false } => self.on_connected(),
            RequestEvent::Socket { connecting: true } => {
                if self.state == State::WaitingForSocket {
                    self.state = State::Connecting;
                }
            }
            RequestEvent::Connect => self.on_connected(),
            // A response is only meaningful on a connected socket.
            RequestEvent::Response => {
                if self.state == State::AwaitingResponse {
                    self.state = State::ReceivingBody;
                }
            }
            RequestEvent::End => {
                self.connect.disarm();
                if self.request_deadline.disarm() {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("request deadline beaten by response end");
                }
                self.state = State::Completed;
            }
            RequestEvent::Timeout => {
                if self.timeouts.socket.is_some() && self.state.is_connected() {
                    self.raise(TimeoutError::Socket {
                        phase: Phase::Socket,
                        host: self.host.clone(),
                    });
                }
            }
            RequestEvent::Error(_) => {
                self.connect.disarm();
                self.request_deadline.disarm();
                self.state = State::Failed;
            }
        }
    }

    fn on_connected(&mut self) {
        if self.state.is_connected() {
            return;
        }
        self.state = State::Connected;

        if self.connect.disarm() {
            #[cfg(feature = "tracing")]
            tracing::debug!("connect deadline beaten by socket connect");
        }

        if let Some(inactivity) = self.timeouts.get(Phase::Socket) {
            if let Some(request) = self.request.upgrade() {
                request.arm_inactivity_timeout(inactivity);
            }
        }

        self.state = State::AwaitingResponse;
    }

    fn timer_fired(&mut self, phase: Phase) {
        #[cfg(feature = "tracing")]
        tracing::debug!(%phase, state = ?self.state, "deadline elapsed, deferring abort");

        match phase {
            Phase::Connect => self.connect.fire(),
            Phase::Request => self.request_deadline.fire(),
            Phase::Socket => {}
        }
    }

    fn run_deferred(&mut self) {
        if self.connect.take_deferred() {
            self.raise(TimeoutError::Connection {
                phase: Phase::Connect,
                host: self.host.clone(),
            });
            return;
        }

        if self.request_deadline.take_deferred() {
            self.connect.disarm();
            // Classified by where the transport is now, not when the timer fired.
            let connecting = self
                .request
                .upgrade()
                .is_some_and(|request| request.is_connecting());
            let host = self.host.clone();
            let err = if connecting {
                TimeoutError::Connection {
                    phase: Phase::Request,
                    host,
                }
            } else {
                TimeoutError::Socket {
                    phase: Phase::Request,
                    host,
                }
            };
            self.raise(err);
        }
    }

    fn raise(&mut self, err: TimeoutError) {
        self.connect.disarm();
        self.request_deadline.disarm();
        self.state = State::TimedOut { code: err.code() };

        #[cfg(feature = "tracing")]
        tracing::debug!(code = err.code(), cause = err.cause(), "aborting request: {err}");

        // Abort first so observers of the error see a dead request.
        if let Some(request) = self.request.upgrade() {
            request.abort();
            request.emit_error(err);
        }
    }
}
