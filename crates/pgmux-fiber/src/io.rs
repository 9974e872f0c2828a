//! Cancellable, deadline-bounded TCP connect.
//!
//! [`Io::connect`] races three triggers: the platform connect completion, the
//! deadline timer and cancellation of the calling fiber. Whichever is
//! dispatched first neutralizes the others before the fiber is woken:
//!
//! - the deadline marks the attempt timed out and closes the handle; the
//!   platform then delivers an aborted completion, which wakes the fiber;
//! - the completion stops the deadline timer (unless the deadline or a cancel
//!   already dealt with it), records the status and wakes the fiber;
//! - cancellation stops the timer and closes the handle, again leaving the
//!   wakeup to the forced completion.
//!
//! The fiber is therefore woken exactly once, by the completion callback.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{ConnectError, FiberError};
use crate::fiber::FiberId;
use crate::platform::{Status, Token};
use crate::scheduler::{Handle, TimerId};

/// Transient state of one connect attempt.
#[derive(Debug)]
struct Attempt {
    fiber: FiberId,
    timer: Option<TimerId>,
    status: Option<Status>,
}

#[derive(Debug)]
struct IoState {
    handle: Handle,
    token: Token,
    connected: bool,
    closed: bool,
    /// Set when the deadline of the last attempt fired.
    timed_out: bool,
    attempt: Option<Attempt>,
}

impl Drop for IoState {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handle.close(self.token);
        }
    }
}

/// A platform socket handle owned by fibers of one scheduler.
///
/// Clones share the same handle. The handle is closed when [`close`](Self::close)
/// is called, when a connect times out or is cancelled, or when the last clone
/// is dropped, and never more than once.
#[derive(Debug, Clone)]
pub struct Io {
    state: Rc<RefCell<IoState>>,
}

impl Io {
    /// Allocate a new, unconnected handle.
    #[must_use]
    pub fn new(handle: &Handle) -> Self {
        Self {
            state: Rc::new(RefCell::new(IoState {
                handle: handle.clone(),
                token: handle.token(),
                connected: false,
                closed: false,
                timed_out: false,
                attempt: None,
            })),
        }
    }

    /// Platform token of this handle.
    #[must_use]
    pub fn token(&self) -> Token {
        self.state.borrow().token
    }

    /// Whether the last connect succeeded and the handle is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Whether the last connect failed because its deadline elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.state.borrow().timed_out
    }

    /// Whether the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Connect to `addr` from the current fiber.
    ///
    /// A `deadline` of `None` or zero waits for the platform alone. On
    /// [`ConnectError::TimedOut`] and [`ConnectError::Cancelled`] the handle
    /// is closed. A success that lands after the fiber was cancelled is still
    /// reported as `Ok`; check [`Handle::is_cancelled`] when that matters.
    pub async fn connect(
        &self,
        addr: SocketAddr,
        deadline: Option<Duration>,
    ) -> Result<(), ConnectError> {
        let handle = self.handle();
        let fiber = handle.current().ok_or(FiberError::NotInFiber)?;
        if handle.is_cancelled(fiber) {
            return Err(ConnectError::Cancelled);
        }
        {
            let mut io = self.state.borrow_mut();
            if io.attempt.is_some() {
                return Err(ConnectError::AlreadyConnecting);
            }
            if io.closed {
                return Err(ConnectError::Closed);
            }
            if io.connected {
                return Err(ConnectError::AlreadyConnected);
            }
            io.timed_out = false;
            io.attempt = Some(Attempt {
                fiber,
                timer: None,
                status: None,
            });
        }

        // Registered up front; it can only run once the fiber is suspended.
        let this = self.clone();
        let guard = match handle.begin_op(fiber, move || this.on_cancel()) {
            Ok(guard) => guard,
            Err(e) => {
                self.state.borrow_mut().attempt = None;
                return Err(e.into());
            }
        };

        if let Some(after) = deadline.filter(|d| !d.is_zero()) {
            let this = self.clone();
            let timer = handle.start_timer(after, move || this.on_deadline());
            if let Some(attempt) = self.state.borrow_mut().attempt.as_mut() {
                attempt.timer = Some(timer);
            }
        }

        let this = self.clone();
        if let Err(e) = handle.connect(self.token(), addr, move |status| this.on_complete(status)) {
            let timer = self
                .state
                .borrow_mut()
                .attempt
                .take()
                .and_then(|a| a.timer);
            if let Some(timer) = timer {
                handle.stop_timer(timer);
            }
            drop(guard);
            tracing::debug!(%addr, error = %e, "connect could not be issued");
            return Err(ConnectError::Failed(e.kind()));
        }

        tracing::trace!(%addr, token = self.token().0, ?deadline, "connect issued");
        let woken = handle.suspend(fiber).await;
        drop(guard);

        let mut io = self.state.borrow_mut();
        let status = io
            .attempt
            .take()
            .and_then(|a| a.status)
            .unwrap_or(woken);
        let result = match status {
            _ if io.timed_out => Err(ConnectError::TimedOut),
            Ok(()) if !io.closed => {
                io.connected = true;
                Ok(())
            }
            _ if handle.is_cancelled(fiber) => Err(ConnectError::Cancelled),
            Ok(()) => Err(ConnectError::Failed(std::io::ErrorKind::ConnectionAborted)),
            Err(kind) => Err(ConnectError::Failed(kind)),
        };
        drop(io);

        match &result {
            Ok(()) => tracing::debug!(%addr, token = self.token().0, "connected"),
            Err(e) => tracing::debug!(%addr, error = %e, "connect failed"),
        }
        result
    }

    /// Close the handle. Idempotent.
    pub fn close(&self) {
        let (handle, token) = {
            let mut io = self.state.borrow_mut();
            if io.closed {
                return;
            }
            io.closed = true;
            io.connected = false;
            (io.handle.clone(), io.token)
        };
        handle.close(token);
    }

    fn handle(&self) -> Handle {
        self.state.borrow().handle.clone()
    }

    fn on_deadline(&self) {
        {
            let mut io = self.state.borrow_mut();
            let Some(attempt) = io.attempt.as_mut() else {
                return;
            };
            attempt.timer = None;
            io.timed_out = true;
        }
        tracing::trace!(token = self.token().0, "connect deadline reached");
        // The forced completion wakes the fiber.
        self.close();
    }

    fn on_complete(&self, status: Status) {
        let (fiber, timer) = {
            let mut guard = self.state.borrow_mut();
            let io = &mut *guard;
            let Some(attempt) = io.attempt.as_mut() else {
                return;
            };
            attempt.status = Some(status);
            let timer = if io.timed_out {
                None
            } else {
                attempt.timer.take()
            };
            (attempt.fiber, timer)
        };
        let handle = self.handle();
        if !handle.is_cancelled(fiber) {
            if let Some(timer) = timer {
                handle.stop_timer(timer);
            }
        }
        handle.wake(fiber, status);
    }

    fn on_cancel(&self) {
        let timer = self
            .state
            .borrow_mut()
            .attempt
            .as_mut()
            .and_then(|a| a.timer.take());
        if let Some(timer) = timer {
            self.handle().stop_timer(timer);
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::*;
    use crate::scheduler::Scheduler;
    use crate::sim::{Behavior, SimPlatform, SimProbe};

    fn backend() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 5432))
    }

    type Outcome = Rc<RefCell<Option<(Result<(), ConnectError>, Io)>>>;

    fn connect_once(behavior: Behavior, deadline: Option<Duration>) -> (Outcome, SimProbe) {
        let platform = SimPlatform::new().with_backend(backend(), behavior);
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        let out: Outcome = Rc::new(RefCell::new(None));
        let out2 = out.clone();
        sched.spawn(move |h| async move {
            let io = Io::new(&h);
            let result = io.connect(backend(), deadline).await;
            *out2.borrow_mut() = Some((result, io));
        });
        sched.run().unwrap();
        (out, probe)
    }

    #[test]
    fn test_accept_stops_deadline_timer() {
        let (out, probe) = connect_once(
            Behavior::Accept {
                after: Duration::from_millis(5),
            },
            Some(Duration::from_millis(100)),
        );
        let out = out.borrow();
        let (result, io) = out.as_ref().unwrap();
        assert!(result.is_ok());
        assert!(io.is_connected());
        assert!(!io.is_timeout());
        assert_eq!(probe.timers_started(), 1);
        assert_eq!(probe.timers_stopped(), 1);
        assert_eq!(probe.timers_fired(), 0);
        assert_eq!(probe.closes(io.token()), 0);
    }

    #[test]
    fn test_hanging_backend_times_out_and_closes_once() {
        let deadline = Duration::from_millis(250);
        let platform = SimPlatform::new().with_backend(backend(), Behavior::Hang);
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        let done = Rc::new(RefCell::new(None));
        let done2 = done.clone();
        sched.spawn(move |h| async move {
            let io = Io::new(&h);
            let err = io.connect(backend(), Some(deadline)).await.unwrap_err();
            *done2.borrow_mut() = Some((err.is_timeout(), io.is_timeout(), h.now(), io.token()));
            drop(io);
        });
        sched.run().unwrap();

        let (classified, flagged, at, token) = done.borrow_mut().take().unwrap();
        assert!(classified);
        assert!(flagged);
        assert!(at >= deadline);
        assert_eq!(probe.closes(token), 1);
        assert_eq!(probe.timers_fired(), 1);
    }

    #[test]
    fn test_hanging_backend_without_deadline_stalls() {
        let platform = SimPlatform::new().with_backend(backend(), Behavior::Hang);
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        sched.spawn(move |h| async move {
            let io = Io::new(&h);
            let _ = io.connect(backend(), None).await;
        });
        match sched.run() {
            Err(FiberError::Stalled { suspended }) => assert_eq!(suspended, 1),
            other => panic!("expected stall, got {other:?}"),
        }
        assert_eq!(probe.connects(), 1);
        assert_eq!(probe.timers_started(), 0);
    }

    #[test]
    fn test_refused_is_reported_verbatim() {
        let (out, probe) = connect_once(
            Behavior::Refuse {
                after: Duration::from_millis(1),
            },
            Some(Duration::from_secs(1)),
        );
        let out = out.borrow();
        let (result, io) = out.as_ref().unwrap();
        assert!(matches!(
            result,
            Err(ConnectError::Failed(io::ErrorKind::ConnectionRefused))
        ));
        assert!(!io.is_connected());
        assert!(!io.is_timeout());
        assert_eq!(probe.timers_stopped(), 1);
    }

    #[test]
    fn test_synchronous_failure_does_not_suspend() {
        let (out, probe) = connect_once(
            Behavior::FailImmediately(io::ErrorKind::OutOfMemory),
            Some(Duration::from_secs(1)),
        );
        let out = out.borrow();
        let (result, io) = out.as_ref().unwrap();
        assert!(matches!(
            result,
            Err(ConnectError::Failed(io::ErrorKind::OutOfMemory))
        ));
        assert!(!io.is_connected());
        assert_eq!(probe.timers_started(), 1);
        assert_eq!(probe.timers_stopped(), 1);
    }

    #[test]
    fn test_no_deadline_means_no_timer() {
        let (out, probe) = connect_once(
            Behavior::Accept {
                after: Duration::from_secs(30),
            },
            Some(Duration::ZERO),
        );
        assert!(out.borrow().as_ref().unwrap().0.is_ok());
        assert_eq!(probe.timers_started(), 0);
    }

    #[test]
    fn test_cancel_while_connecting() {
        let platform = SimPlatform::new().with_backend(backend(), Behavior::Hang);
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        let done = Rc::new(RefCell::new(None));
        let done2 = done.clone();
        let connector = sched.spawn(move |h| async move {
            let io = Io::new(&h);
            let result = io.connect(backend(), Some(Duration::from_secs(10))).await;
            *done2.borrow_mut() = Some((result, io));
        });
        sched.spawn(move |h| async move {
            h.sleep(Duration::from_millis(50)).await.unwrap();
            assert_eq!(h.state(connector), Some(crate::FiberState::Suspended));
            h.cancel(connector);
        });
        sched.run().unwrap();

        let done = done.borrow();
        let (result, io) = done.as_ref().unwrap();
        assert!(matches!(result, Err(ConnectError::Cancelled)));
        assert!(!io.is_timeout());
        assert!(io.is_closed());
        assert_eq!(probe.closes(io.token()), 1);
        // Deadline timer stopped by the cancellation, sleep timer fired.
        assert_eq!(probe.timers_stopped(), 1);
        assert_eq!(probe.timers_fired(), 1);
    }

    #[test]
    fn test_cancelled_fiber_fails_fast() {
        let platform = SimPlatform::new();
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        sched.spawn(|h| async move {
            let me = h.current().unwrap();
            h.cancel(me);
            let io = Io::new(&h);
            let err = io.connect(backend(), None).await.unwrap_err();
            assert!(err.is_cancelled());
        });
        sched.run().unwrap();
        assert_eq!(probe.connects(), 0);
    }

    #[test]
    fn test_second_connect_on_shared_handle_is_rejected() {
        let platform = SimPlatform::new().with_backend(
            backend(),
            Behavior::Accept {
                after: Duration::from_millis(10),
            },
        );
        let sched = Scheduler::new(platform);
        let shared = Rc::new(RefCell::new(None::<Io>));
        let rejected = Rc::new(RefCell::new(false));

        let slot = shared.clone();
        sched.spawn(move |h| async move {
            let io = Io::new(&h);
            *slot.borrow_mut() = Some(io.clone());
            io.connect(backend(), None).await.unwrap();
        });
        let slot = shared.clone();
        let flag = rejected.clone();
        sched.spawn(move |_| async move {
            let io = slot.borrow().clone().unwrap();
            let err = io.connect(backend(), None).await.unwrap_err();
            *flag.borrow_mut() = matches!(err, ConnectError::AlreadyConnecting);
        });
        sched.run().unwrap();
        assert!(*rejected.borrow());
    }

    #[test]
    fn test_completion_after_deadline_in_same_batch() {
        // Both due at 100ms; the timer was scheduled first, so it is dispatched
        // first and closes the already-connected socket.
        let (out, probe) = connect_once(
            Behavior::Accept {
                after: Duration::from_millis(100),
            },
            Some(Duration::from_millis(100)),
        );
        let out = out.borrow();
        let (result, io) = out.as_ref().unwrap();
        assert!(matches!(result, Err(ConnectError::TimedOut)));
        assert!(!io.is_connected());
        assert_eq!(probe.closes(io.token()), 1);
        assert_eq!(probe.timers_stopped(), 0);
    }

    #[test]
    fn test_closed_handle_cannot_reconnect() {
        let platform = SimPlatform::new().with_fallback(Behavior::Accept {
            after: Duration::from_millis(1),
        });
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        sched.spawn(|h| async move {
            let io = Io::new(&h);
            io.connect(backend(), None).await.unwrap();
            assert!(matches!(
                io.connect(backend(), None).await,
                Err(ConnectError::AlreadyConnected)
            ));
            io.close();
            io.close();
            assert!(matches!(
                io.connect(backend(), None).await,
                Err(ConnectError::Closed)
            ));
        });
        sched.run().unwrap();
        assert_eq!(probe.total_closes(), 1);
    }

    #[test]
    fn test_drop_closes_connected_handle() {
        let platform = SimPlatform::new().with_fallback(Behavior::Accept {
            after: Duration::ZERO,
        });
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        sched.spawn(|h| async move {
            let io = Io::new(&h);
            io.connect(backend(), None).await.unwrap();
        });
        sched.run().unwrap();
        assert_eq!(probe.total_closes(), 1);
    }
}
