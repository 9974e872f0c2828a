//! Pooled backend servers.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use pgmux_fiber::Io;

slotmap::new_key_type! {
    /// Stable handle to a server inside a [`ServerPool`](crate::ServerPool).
    pub struct ServerKey;
}

/// Membership list a server currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    /// Checked out by a client session.
    Active,
    /// Connected and available for reuse.
    Idle,
    /// Waiting to be closed by a sweep.
    Expire,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Expire => write!(f, "expire"),
        }
    }
}

/// The (database, user) pairing a pool serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteId {
    /// Database name.
    pub database: String,
    /// User name.
    pub user: String,
}

impl RouteId {
    /// Create a route identity.
    pub fn new(database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
        }
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.user)
    }
}

/// A physical backend connection the pool can close.
pub trait Connection {
    /// Close the connection. Called once, when the server is swept or the
    /// pool is dropped.
    fn close(&mut self);
}

impl Connection for Io {
    fn close(&mut self) {
        Io::close(self);
    }
}

/// One backend connection plus its pooling metadata.
#[derive(Debug)]
pub struct Server<C> {
    pub(crate) id: u64,
    pub(crate) conn: C,
    pub(crate) state: ServerState,
    pub(crate) created_at: Duration,
    pub(crate) last_used: Duration,
    pub(crate) route: Rc<RouteId>,
    pub(crate) use_count: u64,
    pub(crate) retired: bool,
}

impl<C> Server<C> {
    /// Pool-unique id, for logs.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The backend connection.
    #[must_use]
    pub fn conn(&self) -> &C {
        &self.conn
    }

    /// Current membership list.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// When the server was admitted, in scheduler time.
    #[must_use]
    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    /// Last checkout or checkin, in scheduler time.
    #[must_use]
    pub fn last_used(&self) -> Duration {
        self.last_used
    }

    /// How long the server has been unused at `now`.
    #[must_use]
    pub fn idle_for(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_used)
    }

    /// Owning route.
    #[must_use]
    pub fn route(&self) -> &RouteId {
        &self.route
    }

    /// Number of times the server was handed out.
    #[must_use]
    pub fn use_count(&self) -> u64 {
        self.use_count
    }

    /// Whether the server will be expired on its next release.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_id_display() {
        assert_eq!(RouteId::new("sales", "app").to_string(), "sales.app");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServerState::Active.to_string(), "active");
        assert_eq!(ServerState::Idle.to_string(), "idle");
        assert_eq!(ServerState::Expire.to_string(), "expire");
    }
}
