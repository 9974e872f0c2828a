//! Per-route checkout front end.
//!
//! A [`Route`] owns the [`ServerPool`] of one (database, user) pair and turns
//! its non-blocking answers into fiber-level behavior: connecting new servers,
//! parking checkouts while the pool is full and waking them on checkin.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;

use pgmux_fiber::{ConnectError, FiberError, FiberId, Handle, Io};

use crate::config::RouteConfig;
use crate::error::PoolError;
use crate::pool::{Acquire, PoolStatus, ServerPool};
use crate::server::{Server, ServerKey, ServerState};

/// Cumulative counters for a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Backend connections established.
    pub connections_created: u64,
    /// Backend connections closed by sweeps.
    pub connections_closed: u64,
    /// Backend connects that failed.
    pub connect_failures: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, cancellation, connect errors).
    pub checkouts_failed: u64,
    /// Checkouts that had to wait for a server.
    pub waits: u64,
    /// Waits that ran out of time.
    pub wait_timeouts: u64,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

type Waiters = Rc<RefCell<VecDeque<FiberId>>>;

/// Pool and waiter queue for one route.
pub struct Route {
    config: RouteConfig,
    addr: SocketAddr,
    handle: Handle,
    pool: RefCell<ServerPool<Io>>,
    waiters: Waiters,
    metrics: Cell<PoolMetrics>,
}

impl Route {
    /// Create a route after validating `config` and resolving its backend.
    pub fn new(handle: &Handle, config: RouteConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let addr = config.backend_addr()?;
        let pool = ServerPool::new(config.route_id(), config.capacity());

        tracing::info!(
            route = %pool.route(),
            backend = %addr,
            pool_size = config.pool_size,
            "route created"
        );

        Ok(Self {
            config,
            addr,
            handle: handle.clone(),
            pool: RefCell::new(pool),
            waiters: Rc::new(RefCell::new(VecDeque::new())),
            metrics: Cell::new(PoolMetrics::default()),
        })
    }

    /// The route configuration.
    #[must_use]
    pub fn config(&self) -> &RouteConfig {
        &self.config
    }

    /// Resolved backend address.
    #[must_use]
    pub fn backend(&self) -> SocketAddr {
        self.addr
    }

    /// Check out a server from the current fiber.
    ///
    /// Reuses an idle server, connects a new one while there is capacity, and
    /// otherwise waits for a checkin up to `pool_timeout`.
    pub async fn checkout(&self) -> Result<ServerKey, PoolError> {
        let result = self.checkout_inner(true).await;
        self.record_checkout(&result);
        result
    }

    /// Check out a server without waiting.
    ///
    /// Returns [`PoolError::PoolFull`] instead of waiting. May still suspend
    /// while a new server connects.
    pub async fn try_checkout(&self) -> Result<ServerKey, PoolError> {
        let result = self.checkout_inner(false).await;
        self.record_checkout(&result);
        result
    }

    /// Return a checked-out server.
    ///
    /// With `expire` the server is closed at once; otherwise it becomes idle.
    /// Either way the oldest waiting checkout is woken.
    pub fn checkin(&self, key: ServerKey, expire: bool) -> Result<(), PoolError> {
        let now = self.handle.now();
        let closed = {
            let mut pool = self.pool.borrow_mut();
            pool.release(key, expire, now)?;
            pool.sweep()
        };
        self.record(|m| m.connections_closed += closed as u64);
        self.notify_one();
        Ok(())
    }

    /// Close servers idle for at least `pool_ttl`. Returns how many closed.
    pub fn reap_idle(&self) -> usize {
        let Some(ttl) = self.config.idle_ttl() else {
            return 0;
        };
        let now = self.handle.now();
        let closed = {
            let mut pool = self.pool.borrow_mut();
            pool.reap_idle(now, ttl);
            pool.sweep()
        };
        if closed > 0 {
            self.record(|m| m.connections_closed += closed as u64);
            for _ in 0..closed {
                self.notify_one();
            }
        }
        closed
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until the current
    /// fiber is cancelled.
    pub async fn reap_every(&self, interval: Duration) -> Result<(), PoolError> {
        loop {
            match self.handle.sleep(interval).await {
                Ok(()) => {
                    self.reap_idle();
                }
                Err(FiberError::Cancelled) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Mark every checked-out server to be closed on checkin instead of
    /// reused. Returns how many were marked.
    pub fn retire_active(&self) -> usize {
        let now = self.handle.now();
        let mut pool = self.pool.borrow_mut();
        let mut keys = Vec::new();
        pool.for_each(ServerState::Active, |key, _| {
            keys.push(key);
            ControlFlow::Continue(())
        });
        let retired = keys
            .into_iter()
            .filter(|key| pool.retire(*key, now).is_ok())
            .count();
        tracing::info!(route = %pool.route(), retired, "active servers retired");
        retired
    }

    /// Inspect a server.
    pub fn with_server<R>(&self, key: ServerKey, f: impl FnOnce(&Server<Io>) -> R) -> Option<R> {
        self.pool.borrow().server(key).map(f)
    }

    /// Snapshot of the pool counts.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.borrow().status()
    }

    /// Cumulative counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.metrics.get()
    }

    /// Number of checkouts currently waiting.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }

    async fn checkout_inner(&self, wait: bool) -> Result<ServerKey, PoolError> {
        let fiber = self.handle.current().ok_or(FiberError::NotInFiber)?;
        let deadline = self
            .config
            .wait_timeout()
            .map(|timeout| self.handle.now() + timeout);
        // Set once a checkin woke this fiber; a wakeup left unused is passed on.
        let mut notified = false;

        loop {
            if self.handle.is_cancelled(fiber) {
                return Err(self.give_up(notified, PoolError::Cancelled));
            }
            let now = self.handle.now();
            let answer = self.pool.borrow_mut().acquire(now);
            match answer {
                Acquire::Server(key) => return Ok(key),
                Acquire::NeedsConnect => return self.connect_new().await,
                Acquire::Full if !wait => return Err(PoolError::PoolFull),
                Acquire::Full => {
                    let remaining = match deadline {
                        Some(deadline) if deadline <= now => {
                            self.record(|m| m.wait_timeouts += 1);
                            return Err(self.give_up(notified, PoolError::Timeout));
                        }
                        Some(deadline) => Some(deadline - now),
                        None => None,
                    };
                    if !notified {
                        self.record(|m| m.waits += 1);
                    }
                    // A waiter that lost the server to a newcomer keeps its place.
                    self.wait(fiber, remaining, notified).await?;
                    notified = true;
                }
            }
        }
    }

    /// Pass an unused checkin wakeup on to the next waiter before failing.
    fn give_up(&self, notified: bool, error: PoolError) -> PoolError {
        if notified {
            self.notify_one();
        }
        error
    }

    async fn connect_new(&self) -> Result<ServerKey, PoolError> {
        let io = Io::new(&self.handle);
        match io.connect(self.addr, self.config.connect_deadline()).await {
            Ok(()) => {
                let now = self.handle.now();
                let key = self.pool.borrow_mut().admit(io, now)?;
                self.record(|m| m.connections_created += 1);
                tracing::debug!(backend = %self.addr, "new server connected");
                Ok(key)
            }
            Err(e) => {
                self.pool.borrow_mut().abandon();
                drop(io);
                self.record(|m| m.connect_failures += 1);
                tracing::warn!(backend = %self.addr, error = %e, "backend connect failed");
                self.notify_one();
                match e {
                    ConnectError::Cancelled => Err(PoolError::Cancelled),
                    e => Err(e.into()),
                }
            }
        }
    }

    async fn wait(
        &self,
        fiber: FiberId,
        timeout: Option<Duration>,
        front: bool,
    ) -> Result<(), PoolError> {
        {
            let mut waiters = self.waiters.borrow_mut();
            if front {
                waiters.push_front(fiber);
            } else {
                waiters.push_back(fiber);
            }
        }

        let timer = timeout.map(|after| {
            let waiters = self.waiters.clone();
            let handle = self.handle.clone();
            self.handle.start_timer(after, move || {
                remove_waiter(&waiters, fiber);
                handle.wake(fiber, Err(io::ErrorKind::TimedOut));
            })
        });

        let waiters = self.waiters.clone();
        let handle = self.handle.clone();
        let guard = match self.handle.begin_op(fiber, move || {
            remove_waiter(&waiters, fiber);
            if let Some(timer) = timer {
                handle.stop_timer(timer);
            }
            handle.wake(fiber, Err(io::ErrorKind::Interrupted));
        }) {
            Ok(guard) => guard,
            Err(e) => {
                remove_waiter(&self.waiters, fiber);
                if let Some(timer) = timer {
                    self.handle.stop_timer(timer);
                }
                return Err(e.into());
            }
        };

        tracing::trace!(fiber = ?fiber, ?timeout, "waiting for a server");
        let status = self.handle.suspend(fiber).await;
        drop(guard);

        match status {
            Ok(()) => {
                if let Some(timer) = timer {
                    self.handle.stop_timer(timer);
                }
                Ok(())
            }
            Err(io::ErrorKind::TimedOut) => {
                self.record(|m| m.wait_timeouts += 1);
                Err(PoolError::Timeout)
            }
            Err(_) => Err(PoolError::Cancelled),
        }
    }

    fn notify_one(&self) {
        loop {
            let next = self.waiters.borrow_mut().pop_front();
            let Some(fiber) = next else {
                return;
            };
            if self.handle.wake(fiber, Ok(())) {
                return;
            }
        }
    }

    fn record_checkout(&self, result: &Result<ServerKey, PoolError>) {
        match result {
            Ok(_) => self.record(|m| m.checkouts_successful += 1),
            Err(e) => {
                self.record(|m| m.checkouts_failed += 1);
                tracing::debug!(route = %self.config.route_id(), error = %e, "checkout failed");
            }
        }
    }

    fn record(&self, update: impl FnOnce(&mut PoolMetrics)) {
        let mut metrics = self.metrics.get();
        update(&mut metrics);
        self.metrics.set(metrics);
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("backend", &self.addr)
            .field("pool", &self.pool)
            .field("waiting", &self.waiters.borrow().len())
            .finish()
    }
}

fn remove_waiter(waiters: &RefCell<VecDeque<FiberId>>, fiber: FiberId) {
    waiters.borrow_mut().retain(|w| *w != fiber);
}
