//! Single-threaded cooperative scheduler.
//!
//! The scheduler owns every fiber, a FIFO ready queue and the [`Platform`].
//! [`Scheduler::run`] alternates between two phases: poll every ready fiber
//! once, then block in the platform and dispatch the events it returns. Fibers
//! and callbacks therefore never overlap, and no lock is needed anywhere.
//!
//! The shared state lives in an `Rc<RefCell<_>>`. A borrow is never held while
//! a fiber is polled or while a callback or cancellation operation runs, so
//! that code may freely call back into the [`Handle`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use hashbrown::HashMap;
use slotmap::SlotMap;

use crate::error::FiberError;
use crate::fiber::{Body, CancelGuard, Fiber, FiberId, FiberState, OpSlot};
use crate::platform::{Event, Platform, Status, Token};

type TimerCallback = Box<dyn FnOnce()>;
type ConnectCallback = Box<dyn FnOnce(Status)>;

/// Identifies a timer started with [`Handle::start_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Token);

struct Core {
    platform: Box<dyn Platform>,
    fibers: SlotMap<FiberId, Fiber>,
    ready: VecDeque<FiberId>,
    current: Option<FiberId>,
    running: bool,
    next_token: u64,
    next_op: u64,
    timers: HashMap<Token, TimerCallback>,
    connects: HashMap<Token, ConnectCallback>,
}

impl Core {
    fn token(&mut self) -> Token {
        self.next_token += 1;
        Token(self.next_token)
    }
}

/// Cheap, clonable access to a scheduler from inside its fibers.
#[derive(Clone)]
pub struct Handle {
    core: Rc<RefCell<Core>>,
}

/// Owner of the run loop.
///
/// Dropping the scheduler drops every unfinished fiber and pending callback.
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    /// Create a scheduler driving the given platform.
    pub fn new(platform: impl Platform + 'static) -> Self {
        let core = Core {
            platform: Box::new(platform),
            fibers: SlotMap::with_key(),
            ready: VecDeque::new(),
            current: None,
            running: false,
            next_token: 0,
            next_op: 0,
            timers: HashMap::new(),
            connects: HashMap::new(),
        };
        Self {
            handle: Handle {
                core: Rc::new(RefCell::new(core)),
            },
        }
    }

    /// Get a handle to this scheduler.
    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Spawn a fiber. See [`Handle::spawn`].
    pub fn spawn<F, Fut>(&self, body: F) -> FiberId
    where
        F: FnOnce(Handle) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        self.handle.spawn(body)
    }

    /// Run until every fiber has finished.
    ///
    /// Returns [`FiberError::Stalled`] when fibers are still suspended but the
    /// platform has nothing in flight that could ever wake them.
    pub fn run(&self) -> Result<(), FiberError> {
        {
            let mut core = self.handle.core.borrow_mut();
            if core.running {
                return Err(FiberError::AlreadyRunning);
            }
            core.running = true;
        }
        let result = self.run_loop();
        self.handle.core.borrow_mut().running = false;
        result
    }

    fn run_loop(&self) -> Result<(), FiberError> {
        let mut events = Vec::new();
        loop {
            loop {
                let next = self.handle.core.borrow_mut().ready.pop_front();
                let Some(id) = next else { break };
                self.handle.resume(id);
            }

            let (live, idle) = {
                let core = self.handle.core.borrow();
                (core.fibers.len(), core.platform.is_idle())
            };
            if live == 0 {
                tracing::trace!("all fibers finished");
                return Ok(());
            }
            if idle {
                tracing::warn!(suspended = live, "scheduler stalled");
                return Err(FiberError::Stalled { suspended: live });
            }

            self.handle.core.borrow_mut().platform.poll(&mut events)?;
            for event in events.drain(..) {
                self.handle.dispatch(event);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Fiber bodies and callbacks hold handles back into the core; release
        // them outside the borrow.
        let leftovers = {
            let mut core = self.handle.core.borrow_mut();
            core.ready.clear();
            (
                std::mem::take(&mut core.fibers),
                std::mem::take(&mut core.timers),
                std::mem::take(&mut core.connects),
            )
        };
        drop(leftovers);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.handle, f)
    }
}

impl Handle {
    /// Create a fiber running `body` and queue it.
    ///
    /// `body` receives a handle to this scheduler and returns the fiber's
    /// future. The fiber first runs on the next scheduler turn.
    pub fn spawn<F, Fut>(&self, body: F) -> FiberId
    where
        F: FnOnce(Handle) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let body: Body = Box::pin(body(self.clone()));
        let mut core = self.core.borrow_mut();
        let id = core.fibers.insert(Fiber::new(body));
        core.ready.push_back(id);
        tracing::trace!(fiber = ?id, "fiber spawned");
        id
    }

    /// The fiber currently being polled, if any.
    #[must_use]
    pub fn current(&self) -> Option<FiberId> {
        self.core.borrow().current
    }

    /// Scheduling state of a live fiber; `None` once it has finished.
    #[must_use]
    pub fn state(&self, fiber: FiberId) -> Option<FiberState> {
        self.core.borrow().fibers.get(fiber).map(|f| f.state)
    }

    /// Whether `fiber` has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self, fiber: FiberId) -> bool {
        self.core
            .borrow()
            .fibers
            .get(fiber)
            .is_some_and(|f| f.cancelled)
    }

    /// Number of live fibers.
    #[must_use]
    pub fn fiber_count(&self) -> usize {
        self.core.borrow().fibers.len()
    }

    /// Monotonic platform time.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.core.borrow().platform.now()
    }

    /// Suspend `fiber`, which must be the current fiber, until it is woken.
    ///
    /// Resolves to the status passed to [`wake`](Self::wake).
    pub fn suspend(&self, fiber: FiberId) -> Suspend {
        Suspend {
            handle: self.clone(),
            fiber,
        }
    }

    /// Move the current fiber to the back of the ready queue.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            handle: self.clone(),
            yielded: false,
        }
    }

    /// Wake a suspended fiber with `status`.
    ///
    /// Returns `false` and does nothing if the fiber is not suspended, so a
    /// fiber is woken at most once per suspension.
    pub fn wake(&self, fiber: FiberId, status: Status) -> bool {
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        let Some(f) = core.fibers.get_mut(fiber) else {
            return false;
        };
        if f.state != FiberState::Suspended {
            tracing::trace!(fiber = ?fiber, state = ?f.state, "ignoring wake of non-suspended fiber");
            return false;
        }
        f.wakeup = Some(status);
        f.state = FiberState::Ready;
        core.ready.push_back(fiber);
        true
    }

    /// Cancel `fiber`.
    ///
    /// Sets the cancelled flag. If the fiber is suspended with a registered
    /// cancellation operation, that operation runs now, before the fiber is
    /// resumed, and never runs again. Returns `false` for unknown fibers.
    pub fn cancel(&self, fiber: FiberId) -> bool {
        let action = {
            let mut core = self.core.borrow_mut();
            let Some(f) = core.fibers.get_mut(fiber) else {
                return false;
            };
            f.cancelled = true;
            if f.state == FiberState::Suspended {
                f.op.as_mut()
                    .filter(|op| op.is_live())
                    .and_then(|op| op.action.take())
            } else {
                None
            }
        };
        tracing::debug!(fiber = ?fiber, has_op = action.is_some(), "fiber cancelled");
        if let Some(action) = action {
            action();
        }
        true
    }

    /// Register the operation that tears down `fiber`'s in-flight wait if it
    /// is cancelled while suspended.
    ///
    /// The operation is deregistered when the returned guard drops.
    pub fn begin_op(
        &self,
        fiber: FiberId,
        op: impl FnOnce() + 'static,
    ) -> Result<CancelGuard, FiberError> {
        let live = Rc::new(Cell::new(true));
        let (seq, stale) = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            let Some(f) = core.fibers.get_mut(fiber) else {
                return Err(FiberError::NotInFiber);
            };
            if f.op.as_ref().is_some_and(OpSlot::is_live) {
                return Err(FiberError::OperationInProgress);
            }
            core.next_op += 1;
            let stale = f.op.replace(OpSlot {
                seq: core.next_op,
                live: live.clone(),
                action: Some(Box::new(op)),
            });
            (core.next_op, stale)
        };
        // A dead slot's action may own handles whose drop calls back in.
        drop(stale);
        Ok(CancelGuard::new(self.clone(), fiber, seq, live))
    }

    pub(crate) fn end_op(&self, fiber: FiberId, seq: u64) {
        let slot = {
            let Ok(mut core) = self.core.try_borrow_mut() else {
                tracing::warn!(fiber = ?fiber, "scheduler busy, cancellation operation released lazily");
                return;
            };
            match core.fibers.get_mut(fiber) {
                Some(f) if f.op.as_ref().is_some_and(|op| op.seq == seq) => f.op.take(),
                _ => None,
            }
        };
        drop(slot);
    }

    /// Start a one-shot timer running `callback` on the scheduler thread.
    pub fn start_timer(&self, after: Duration, callback: impl FnOnce() + 'static) -> TimerId {
        let mut core = self.core.borrow_mut();
        let token = core.token();
        core.timers.insert(token, Box::new(callback));
        core.platform.start_timer(token, after);
        TimerId(token)
    }

    /// Stop a timer. Its callback will not run.
    ///
    /// Returns `false` if the timer already fired or was stopped.
    pub fn stop_timer(&self, timer: TimerId) -> bool {
        let callback = {
            let mut core = self.core.borrow_mut();
            let callback = core.timers.remove(&timer.0);
            if callback.is_some() {
                core.platform.stop_timer(timer.0);
            }
            callback
        };
        callback.is_some()
    }

    /// Suspend the current fiber for `duration`.
    ///
    /// Returns [`FiberError::Cancelled`] if the fiber is cancelled before or
    /// while sleeping.
    pub async fn sleep(&self, duration: Duration) -> Result<(), FiberError> {
        let fiber = self.current().ok_or(FiberError::NotInFiber)?;
        if self.is_cancelled(fiber) {
            return Err(FiberError::Cancelled);
        }

        let waker = self.clone();
        let timer = self.start_timer(duration, move || {
            waker.wake(fiber, Ok(()));
        });
        let canceller = self.clone();
        let guard = match self.begin_op(fiber, move || {
            if canceller.stop_timer(timer) {
                canceller.wake(fiber, Err(io::ErrorKind::Interrupted));
            }
        }) {
            Ok(guard) => guard,
            Err(e) => {
                self.stop_timer(timer);
                return Err(e);
            }
        };

        let status = self.suspend(fiber).await;
        drop(guard);
        status.map_err(|_| FiberError::Cancelled)
    }

    pub(crate) fn token(&self) -> Token {
        self.core.borrow_mut().token()
    }

    /// Issue a platform connect whose completion runs `callback`.
    pub(crate) fn connect(
        &self,
        token: Token,
        addr: SocketAddr,
        callback: impl FnOnce(Status) + 'static,
    ) -> io::Result<()> {
        let mut core = self.core.borrow_mut();
        core.platform.connect(token, addr)?;
        core.connects.insert(token, Box::new(callback));
        Ok(())
    }

    /// Close a platform handle. Any in-flight connect still completes.
    pub(crate) fn close(&self, token: Token) {
        match self.core.try_borrow_mut() {
            Ok(mut core) => core.platform.close(token),
            Err(_) => tracing::warn!(token = token.0, "scheduler busy, handle not closed"),
        }
    }

    fn resume(&self, id: FiberId) {
        let body = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            let Some(f) = core.fibers.get_mut(id) else {
                return;
            };
            if f.state != FiberState::Ready {
                return;
            }
            let Some(body) = f.body.take() else {
                return;
            };
            f.state = FiberState::Running;
            core.current = Some(id);
            body
        };

        let mut body = body;
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let finished = body.as_mut().poll(&mut cx).is_ready();

        let dead = {
            let mut core = self.core.borrow_mut();
            core.current = None;
            if finished {
                tracing::trace!(fiber = ?id, "fiber finished");
                Some((body, core.fibers.remove(id)))
            } else {
                if let Some(f) = core.fibers.get_mut(id) {
                    if f.state == FiberState::Running {
                        tracing::warn!(fiber = ?id, "fiber parked outside a scheduler suspension point");
                        f.state = FiberState::Suspended;
                    }
                    f.body = Some(body);
                }
                None
            }
        };
        drop(dead);
    }

    fn dispatch(&self, event: Event) {
        match event {
            Event::Timer { token } => {
                let callback = self.core.borrow_mut().timers.remove(&token);
                match callback {
                    Some(callback) => callback(),
                    None => tracing::trace!(token = token.0, "stale timer event ignored"),
                }
            }
            Event::Connect { token, status } => {
                let callback = self.core.borrow_mut().connects.remove(&token);
                match callback {
                    Some(callback) => callback(status),
                    None => tracing::trace!(token = token.0, "unclaimed connect completion"),
                }
            }
        }
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => f
                .debug_struct("Scheduler")
                .field("fibers", &core.fibers.len())
                .field("ready", &core.ready.len())
                .field("current", &core.current)
                .field("timers", &core.timers.len())
                .field("connects", &core.connects.len())
                .finish(),
            Err(_) => f.write_str("Scheduler { <busy> }"),
        }
    }
}

/// Future returned by [`Handle::suspend`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend {
    handle: Handle,
    fiber: FiberId,
}

impl Future for Suspend {
    type Output = Status;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Status> {
        let mut guard = self.handle.core.borrow_mut();
        let core = &mut *guard;
        if core.current != Some(self.fiber) {
            return Poll::Ready(Err(io::ErrorKind::InvalidInput));
        }
        let Some(f) = core.fibers.get_mut(self.fiber) else {
            return Poll::Ready(Err(io::ErrorKind::NotFound));
        };
        match f.wakeup.take() {
            Some(status) => Poll::Ready(status),
            None => {
                f.state = FiberState::Suspended;
                Poll::Pending
            }
        }
    }
}

/// Future returned by [`Handle::yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    handle: Handle,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        {
            let mut guard = self.handle.core.borrow_mut();
            let core = &mut *guard;
            let Some(id) = core.current else {
                return Poll::Ready(());
            };
            if let Some(f) = core.fibers.get_mut(id) {
                f.state = FiberState::Ready;
            }
            core.ready.push_back(id);
        }
        self.yielded = true;
        Poll::Pending
    }
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

/// Fibers are only ever rescheduled through [`Handle::wake`], so the task
/// waker has nothing to do.
fn noop_waker() -> Waker {
    Waker::from(Arc::new(NoopWaker))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;
    use crate::sim::SimPlatform;

    fn scheduler() -> Scheduler {
        Scheduler::new(SimPlatform::new())
    }

    #[test]
    fn test_fibers_run_in_spawn_order() {
        let sched = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            sched.spawn(move |_| async move { log.borrow_mut().push(i) });
        }
        sched.run().unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(sched.handle().fiber_count(), 0);
    }

    #[test]
    fn test_wake_delivers_status_once() {
        let sched = scheduler();
        let got = Rc::new(Cell::new(None));
        let got2 = got.clone();
        let sleeper = sched.spawn(move |h| async move {
            let me = h.current().unwrap();
            got2.set(Some(h.suspend(me).await));
        });
        sched.spawn(move |h| async move {
            assert_eq!(h.state(sleeper), Some(FiberState::Suspended));
            assert!(h.wake(sleeper, Err(io::ErrorKind::TimedOut)));
            assert!(!h.wake(sleeper, Ok(())));
        });
        sched.run().unwrap();
        assert_eq!(got.get(), Some(Err(io::ErrorKind::TimedOut)));
    }

    #[test]
    fn test_cancel_runs_operation_once_before_resume() {
        let sched = scheduler();
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let sleeper = sched.spawn(move |h| async move {
            let me = h.current().unwrap();
            let waker = h.clone();
            let guard = h
                .begin_op(me, move || {
                    runs2.set(runs2.get() + 1);
                    waker.wake(me, Err(io::ErrorKind::Interrupted));
                })
                .unwrap();
            let status = h.suspend(me).await;
            drop(guard);
            assert_eq!(status, Err(io::ErrorKind::Interrupted));
            assert!(h.is_cancelled(me));
        });
        sched.spawn(move |h| async move {
            assert!(h.cancel(sleeper));
            assert!(h.cancel(sleeper));
        });
        sched.run().unwrap();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_cancel_of_running_fiber_only_sets_flag() {
        let sched = scheduler();
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        sched.spawn(move |h| async move {
            let me = h.current().unwrap();
            let _guard = h.begin_op(me, move || ran2.set(true)).unwrap();
            assert!(h.cancel(me));
            assert!(h.is_cancelled(me));
        });
        sched.run().unwrap();
        assert!(!ran.get());
    }

    #[test]
    fn test_second_operation_is_rejected() {
        let sched = scheduler();
        sched.spawn(|h| async move {
            let me = h.current().unwrap();
            let first = h.begin_op(me, || {}).unwrap();
            assert!(matches!(
                h.begin_op(me, || {}),
                Err(FiberError::OperationInProgress)
            ));
            drop(first);
            assert!(h.begin_op(me, || {}).is_ok());
        });
        sched.run().unwrap();
    }

    #[test]
    fn test_guard_dropped_while_core_busy_still_releases_operation() {
        let sched = scheduler();
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();
        let sleeper = sched.spawn(move |h| async move {
            let me = h.current().unwrap();
            let first = h.begin_op(me, move || ran2.set(true)).unwrap();
            let busy = h.core.borrow();
            drop(first);
            drop(busy);

            // The stale slot is replaced instead of rejected.
            let result = h.sleep(Duration::from_millis(50)).await;
            assert!(matches!(result, Err(FiberError::Cancelled)));
        });
        sched.spawn(move |h| async move {
            h.sleep(Duration::from_millis(5)).await.unwrap();
            assert!(h.cancel(sleeper));
        });
        sched.run().unwrap();
        assert!(!ran.get());
    }

    #[test]
    fn test_stall_is_reported() {
        let sched = scheduler();
        sched.spawn(|h| async move {
            let me = h.current().unwrap();
            let _ = h.suspend(me).await;
        });
        match sched.run() {
            Err(FiberError::Stalled { suspended }) => assert_eq!(suspended, 1),
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[test]
    fn test_yield_interleaves_fibers() {
        let sched = scheduler();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["a", "b"] {
            let log = log.clone();
            sched.spawn(move |h| async move {
                log.borrow_mut().push(format!("{name}1"));
                h.yield_now().await;
                log.borrow_mut().push(format!("{name}2"));
            });
        }
        sched.run().unwrap();
        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_sleep_advances_virtual_clock() {
        let sched = scheduler();
        sched.spawn(|h| async move {
            h.sleep(Duration::from_millis(250)).await.unwrap();
            assert_eq!(h.now(), Duration::from_millis(250));
        });
        sched.run().unwrap();
    }

    #[test]
    fn test_cancelled_sleep_returns_early() {
        let platform = SimPlatform::new();
        let probe = platform.probe();
        let sched = Scheduler::new(platform);
        let result = Rc::new(RefCell::new(None));
        let result2 = result.clone();
        let sleeper = sched.spawn(move |h| async move {
            *result2.borrow_mut() = Some(h.sleep(Duration::from_secs(60)).await);
        });
        sched.spawn(move |h| async move {
            h.sleep(Duration::from_millis(10)).await.unwrap();
            h.cancel(sleeper);
        });
        sched.run().unwrap();
        assert!(matches!(
            result.borrow().as_ref(),
            Some(Err(FiberError::Cancelled))
        ));
        assert_eq!(probe.timers_stopped(), 1);
        assert_eq!(probe.timers_fired(), 1);
    }

    #[test]
    fn test_stopped_timer_callback_never_runs() {
        let sched = scheduler();
        let fired = Rc::new(Cell::new(0));
        let fired2 = fired.clone();
        sched.spawn(move |h| async move {
            let f = fired2.clone();
            let timer = h.start_timer(Duration::from_millis(5), move || f.set(f.get() + 1));
            assert!(h.stop_timer(timer));
            assert!(!h.stop_timer(timer));
            h.sleep(Duration::from_millis(10)).await.unwrap();
        });
        sched.run().unwrap();
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_run_is_not_reentrant() {
        let sched = Rc::new(scheduler());
        let inner = sched.clone();
        let saw = Rc::new(Cell::new(false));
        let saw2 = saw.clone();
        sched.spawn(move |_| async move {
            saw2.set(matches!(inner.run(), Err(FiberError::AlreadyRunning)));
        });
        sched.run().unwrap();
        assert!(saw.get());
    }

    #[test]
    fn test_suspend_outside_fiber_resolves_immediately() {
        let sched = scheduler();
        let h = sched.handle();
        let other = sched.spawn(|_| async {});
        let mut fut = Box::pin(h.suspend(other));
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(
            fut.as_mut().poll(&mut cx),
            Poll::Ready(Err(io::ErrorKind::InvalidInput))
        );
    }

    proptest! {
        #[test]
        fn prop_sleepers_wake_in_deadline_order(delays in proptest::collection::vec(0u64..50, 1..12)) {
            let sched = scheduler();
            let woke = Rc::new(RefCell::new(Vec::new()));
            for (i, delay) in delays.iter().copied().enumerate() {
                let woke = woke.clone();
                sched.spawn(move |h| async move {
                    let after = Duration::from_millis(delay);
                    h.sleep(after).await.unwrap();
                    assert_eq!(h.now(), after);
                    woke.borrow_mut().push((delay, i));
                });
            }
            sched.run().unwrap();

            let mut expected: Vec<_> = delays.iter().copied().zip(0usize..).collect();
            expected.sort();
            prop_assert_eq!(&*woke.borrow(), &expected);
        }
    }
}
