//! Event-loop primitives the scheduler is written against.
//!
//! A [`Platform`] provides a non-blocking connect that reports completion as
//! an [`Event`], one-shot timers, a handle-close primitive and a blocking poll.
//! The scheduler owns the platform and is the only caller of these methods,
//! always from its own thread.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Outcome of a platform operation, as delivered to a woken fiber.
///
/// `Ok(())` is success; otherwise the error kind reported by the platform.
pub type Status = Result<(), io::ErrorKind>;

/// Identifies a socket handle or a timer towards the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

/// A completion delivered by [`Platform::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A connect issued with [`Platform::connect`] finished.
    Connect {
        /// The handle the connect was issued on.
        token: Token,
        /// Connect outcome.
        status: Status,
    },
    /// A timer started with [`Platform::start_timer`] expired.
    Timer {
        /// The timer token.
        token: Token,
    },
}

/// Event-loop primitives consumed by the scheduler.
///
/// Contract:
///
/// - Once `connect` returns `Ok`, exactly one [`Event::Connect`] is delivered
///   for that token, even if the handle is closed before the connect finishes
///   (the status is then an error such as `ConnectionAborted`).
/// - `close` is idempotent and releases whatever the token holds.
/// - `stop_timer` on an expired or unknown timer is a no-op. A timer event that
///   was already queued may still be delivered; the scheduler ignores it.
pub trait Platform {
    /// Monotonic time since the platform was created.
    fn now(&self) -> Duration;

    /// Issue a non-blocking connect on `token`.
    ///
    /// An error means the connect could not even be started.
    fn connect(&mut self, token: Token, addr: SocketAddr) -> io::Result<()>;

    /// Close the handle identified by `token`.
    fn close(&mut self, token: Token);

    /// Start a one-shot timer.
    fn start_timer(&mut self, token: Token, after: Duration);

    /// Stop a timer.
    fn stop_timer(&mut self, token: Token);

    /// Block until at least one event is ready and append ready events.
    fn poll(&mut self, events: &mut Vec<Event>) -> io::Result<()>;

    /// Whether nothing is in flight: no pending connect and no armed timer.
    fn is_idle(&self) -> bool;
}
