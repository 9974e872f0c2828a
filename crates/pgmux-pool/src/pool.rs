//! Server pool bookkeeping.
//!
//! A [`ServerPool`] stores its servers in a slot map and keeps one ordered key
//! list per [`ServerState`]. Every operation moves a key between lists and
//! updates the server's state in the same call, so a server is always in
//! exactly one list and the list lengths are the state counts.
//!
//! Legal transitions:
//!
//! ```text
//!   (new) --admit--> active --release--> idle --acquire/take_idle--> active
//!                       \
//!                        --release(expire)--> expire --sweep--> (closed)
//! ```

use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;

use slotmap::SlotMap;

use crate::error::PoolError;
use crate::server::{Connection, RouteId, Server, ServerKey, ServerState};

/// Answer of [`ServerPool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// An idle server was handed out and is now active.
    Server(ServerKey),
    /// No idle server, but capacity was reserved: connect a new server and
    /// [`admit`](ServerPool::admit) it, or [`abandon`](ServerPool::abandon)
    /// the reservation.
    NeedsConnect,
    /// No idle server and no capacity left.
    Full,
}

/// Registry of the backend servers of one route.
pub struct ServerPool<C: Connection> {
    route: Rc<RouteId>,
    max: usize,
    servers: SlotMap<ServerKey, Server<C>>,
    active: Vec<ServerKey>,
    idle: Vec<ServerKey>,
    expire: Vec<ServerKey>,
    /// Capacity promised by `NeedsConnect` answers not yet admitted.
    pending: usize,
    next_id: u64,
}

impl<C: Connection> ServerPool<C> {
    /// Create an empty pool holding at most `max` servers.
    pub fn new(route: RouteId, max: usize) -> Self {
        Self {
            route: Rc::new(route),
            max,
            servers: SlotMap::with_key(),
            active: Vec::new(),
            idle: Vec::new(),
            expire: Vec::new(),
            pending: 0,
            next_id: 1,
        }
    }

    /// Route this pool serves.
    #[must_use]
    pub fn route(&self) -> &RouteId {
        &self.route
    }

    /// Configured maximum number of servers.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of servers in `state`.
    #[must_use]
    pub fn count(&self, state: ServerState) -> usize {
        self.list(state).len()
    }

    /// Number of live servers over all states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether the pool holds no server.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Outstanding `NeedsConnect` reservations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Look up a server.
    #[must_use]
    pub fn server(&self, key: ServerKey) -> Option<&Server<C>> {
        self.servers.get(key)
    }

    /// Hand out a server.
    ///
    /// Reuses the most recently idled server first. Otherwise answers
    /// [`Acquire::NeedsConnect`] while `servers + pending < max`; servers on
    /// the expire list count until they are swept.
    pub fn acquire(&mut self, now: Duration) -> Acquire {
        while let Some(key) = self.idle.pop() {
            let Some(server) = self.servers.get_mut(key) else {
                continue;
            };
            server.state = ServerState::Active;
            server.last_used = now;
            server.use_count += 1;
            let id = server.id;
            self.active.push(key);
            tracing::trace!(route = %self.route, server = id, "reusing idle server");
            return Acquire::Server(key);
        }

        if self.servers.len() + self.pending < self.max {
            self.pending += 1;
            tracing::trace!(route = %self.route, pending = self.pending, "reserving capacity for new server");
            Acquire::NeedsConnect
        } else {
            Acquire::Full
        }
    }

    /// Register a newly connected server as active.
    ///
    /// Consumes a reservation made by [`acquire`](Self::acquire). Without one,
    /// the server is only accepted if the pool has room; otherwise `conn` is
    /// closed and [`PoolError::PoolFull`] returned.
    pub fn admit(&mut self, conn: C, now: Duration) -> Result<ServerKey, PoolError> {
        if self.pending > 0 {
            self.pending -= 1;
        } else if self.servers.len() >= self.max {
            let mut conn = conn;
            conn.close();
            return Err(PoolError::PoolFull);
        }

        let id = self.next_id;
        self.next_id += 1;
        let key = self.servers.insert(Server {
            id,
            conn,
            state: ServerState::Active,
            created_at: now,
            last_used: now,
            route: self.route.clone(),
            use_count: 1,
            retired: false,
        });
        self.active.push(key);
        tracing::debug!(route = %self.route, server = id, active = self.active.len(), "server admitted");
        Ok(key)
    }

    /// Give back a reservation after a failed connect.
    pub fn abandon(&mut self) {
        self.pending = self.pending.saturating_sub(1);
    }

    /// Return an active server, to idle or, with `expire`, to the expire list.
    ///
    /// Retired servers always go to the expire list.
    pub fn release(&mut self, key: ServerKey, expire: bool, now: Duration) -> Result<(), PoolError> {
        let server = self
            .servers
            .get_mut(key)
            .ok_or(PoolError::UnknownServer(key))?;
        if server.state != ServerState::Active {
            return Err(PoolError::NotActive(key));
        }
        let to = if expire || server.retired {
            ServerState::Expire
        } else {
            ServerState::Idle
        };
        server.state = to;
        server.last_used = now;
        let id = server.id;

        self.move_key(key, ServerState::Active, to);
        tracing::trace!(route = %self.route, server = id, to = %to, "server released");
        Ok(())
    }

    /// Hand out one specific idle server.
    pub fn take_idle(&mut self, key: ServerKey, now: Duration) -> Result<(), PoolError> {
        let server = self
            .servers
            .get_mut(key)
            .ok_or(PoolError::UnknownServer(key))?;
        if server.state != ServerState::Idle {
            return Err(PoolError::NotIdle(key));
        }
        server.state = ServerState::Active;
        server.last_used = now;
        self.move_key(key, ServerState::Idle, ServerState::Active);
        Ok(())
    }

    /// Move every server idle for at least `ttl` to the expire list.
    ///
    /// A zero `ttl` disables expiry. Returns the number of servers expired;
    /// call [`sweep`](Self::sweep) to close them.
    pub fn reap_idle(&mut self, now: Duration, ttl: Duration) -> usize {
        if ttl.is_zero() {
            return 0;
        }
        let aged: Vec<ServerKey> = self
            .idle
            .iter()
            .copied()
            .filter(|key| {
                self.servers
                    .get(*key)
                    .is_some_and(|s| s.idle_for(now) >= ttl)
            })
            .collect();

        let mut expired = 0;
        for key in aged {
            let Some(last_used) = self.servers.get(key).map(|s| s.last_used) else {
                continue;
            };
            if self.take_idle(key, now).is_ok() && self.release(key, true, last_used).is_ok() {
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::debug!(route = %self.route, expired, "idle servers past ttl");
        }
        expired
    }

    /// Mark a server to be closed instead of reused.
    ///
    /// An idle server is expired at once; an active one on its next release.
    pub fn retire(&mut self, key: ServerKey, now: Duration) -> Result<(), PoolError> {
        let server = self
            .servers
            .get_mut(key)
            .ok_or(PoolError::UnknownServer(key))?;
        server.retired = true;
        if server.state == ServerState::Idle {
            self.take_idle(key, now)?;
            self.release(key, true, now)?;
        }
        Ok(())
    }

    /// Close and remove every server on the expire list.
    pub fn sweep(&mut self) -> usize {
        let expired = std::mem::take(&mut self.expire);
        for key in &expired {
            if let Some(mut server) = self.servers.remove(*key) {
                server.conn.close();
                tracing::debug!(route = %self.route, server = server.id, "server closed");
            }
        }
        expired.len()
    }

    /// Visit the servers in `state`, in list order.
    ///
    /// Stops when `visitor` breaks and returns the key it broke on.
    pub fn for_each<F>(&self, state: ServerState, mut visitor: F) -> Option<ServerKey>
    where
        F: FnMut(ServerKey, &Server<C>) -> ControlFlow<()>,
    {
        for &key in self.list(state) {
            if let Some(server) = self.servers.get(key) {
                if visitor(key, server).is_break() {
                    return Some(key);
                }
            }
        }
        None
    }

    /// Snapshot of the pool counts.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            active: self.active.len(),
            idle: self.idle.len(),
            expiring: self.expire.len(),
            pending: self.pending,
            max: self.max,
        }
    }

    fn list(&self, state: ServerState) -> &Vec<ServerKey> {
        match state {
            ServerState::Active => &self.active,
            ServerState::Idle => &self.idle,
            ServerState::Expire => &self.expire,
        }
    }

    fn list_mut(&mut self, state: ServerState) -> &mut Vec<ServerKey> {
        match state {
            ServerState::Active => &mut self.active,
            ServerState::Idle => &mut self.idle,
            ServerState::Expire => &mut self.expire,
        }
    }

    fn move_key(&mut self, key: ServerKey, from: ServerState, to: ServerState) {
        let list = self.list_mut(from);
        if let Some(pos) = list.iter().position(|k| *k == key) {
            // Preserve order: idle reuse is LIFO.
            list.remove(pos);
        }
        self.list_mut(to).push(key);
    }
}

impl<C: Connection> Drop for ServerPool<C> {
    fn drop(&mut self) {
        for (_, server) in self.servers.iter_mut() {
            server.conn.close();
        }
        if !self.servers.is_empty() {
            tracing::debug!(route = %self.route, servers = self.servers.len(), "pool dropped, servers closed");
        }
    }
}

impl<C: Connection> std::fmt::Debug for ServerPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerPool")
            .field("route", &self.route)
            .field("active", &self.active.len())
            .field("idle", &self.idle.len())
            .field("expire", &self.expire.len())
            .field("pending", &self.pending)
            .field("max", &self.max)
            .finish()
    }
}

/// Status information about a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Servers checked out.
    pub active: usize,
    /// Servers available for reuse.
    pub idle: usize,
    /// Servers waiting to be swept.
    pub expiring: usize,
    /// Connects in progress.
    pub pending: usize,
    /// Maximum allowed servers.
    pub max: usize,
}

impl PoolStatus {
    /// Live servers over all states.
    #[must_use]
    pub fn total(&self) -> usize {
        self.active + self.idle + self.expiring
    }

    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.active as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total() + self.pending >= self.max
    }
}
