//! Deterministic virtual-time platform.
//!
//! [`SimPlatform`] never touches the network. Connects to each address follow a
//! scripted [`Behavior`], time only advances when [`Platform::poll`] jumps to
//! the next scheduled event, and a shared [`SimProbe`] records every close and
//! timer operation so tests can assert "closed exactly once" or "timer stopped".

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use hashbrown::HashMap;

use crate::platform::{Event, Platform, Status, Token};

/// How a simulated backend answers a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Accept the connection after the given delay.
    Accept {
        /// Delay before the completion is delivered.
        after: Duration,
    },
    /// Refuse the connection after the given delay.
    Refuse {
        /// Delay before the completion is delivered.
        after: Duration,
    },
    /// Never answer; only a close ends the attempt.
    Hang,
    /// Fail synchronously when the connect is issued.
    FailImmediately(io::ErrorKind),
}

#[derive(Debug, Default)]
struct Counters {
    connects: u32,
    closes: HashMap<Token, u32>,
    timers_started: u32,
    timers_stopped: u32,
    timers_fired: u32,
}

/// Read-only view of what a [`SimPlatform`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    counters: Rc<RefCell<Counters>>,
}

impl SimProbe {
    /// Number of connects issued.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.counters.borrow().connects
    }

    /// Number of times `token` was closed.
    #[must_use]
    pub fn closes(&self, token: Token) -> u32 {
        self.counters.borrow().closes.get(&token).copied().unwrap_or(0)
    }

    /// Number of close calls over all handles.
    #[must_use]
    pub fn total_closes(&self) -> u32 {
        self.counters.borrow().closes.values().sum()
    }

    /// Number of timers started.
    #[must_use]
    pub fn timers_started(&self) -> u32 {
        self.counters.borrow().timers_started
    }

    /// Number of armed timers that were stopped before expiring.
    #[must_use]
    pub fn timers_stopped(&self) -> u32 {
        self.counters.borrow().timers_stopped
    }

    /// Number of timers that expired.
    #[must_use]
    pub fn timers_fired(&self) -> u32 {
        self.counters.borrow().timers_fired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Socket {
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
enum Scheduled {
    Connect { token: Token, status: Status },
    Timer { token: Token },
}

type Slot = (Duration, u64);

/// Platform with a virtual clock and scripted backends.
///
/// Events due at the same instant are delivered in one batch, in the order they
/// were scheduled.
#[derive(Debug)]
pub struct SimPlatform {
    now: Duration,
    seq: u64,
    queue: BTreeMap<Slot, Scheduled>,
    behaviors: HashMap<SocketAddr, Behavior>,
    fallback: Behavior,
    sockets: HashMap<Token, Socket>,
    pending_connects: HashMap<Token, Slot>,
    timers: HashMap<Token, Slot>,
    probe: SimProbe,
}

impl SimPlatform {
    /// Create a platform where every address refuses immediately.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            seq: 0,
            queue: BTreeMap::new(),
            behaviors: HashMap::new(),
            fallback: Behavior::Refuse {
                after: Duration::ZERO,
            },
            sockets: HashMap::new(),
            pending_connects: HashMap::new(),
            timers: HashMap::new(),
            probe: SimProbe::default(),
        }
    }

    /// Script the backend at `addr`.
    #[must_use]
    pub fn with_backend(mut self, addr: SocketAddr, behavior: Behavior) -> Self {
        self.behaviors.insert(addr, behavior);
        self
    }

    /// Behavior for addresses without a script.
    #[must_use]
    pub fn with_fallback(mut self, behavior: Behavior) -> Self {
        self.fallback = behavior;
        self
    }

    /// Shared counters for assertions.
    #[must_use]
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn schedule(&mut self, after: Duration, what: Scheduled) -> Slot {
        self.seq += 1;
        let slot = (self.now + after, self.seq);
        self.queue.insert(slot, what);
        slot
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn now(&self) -> Duration {
        self.now
    }

    fn connect(&mut self, token: Token, addr: SocketAddr) -> io::Result<()> {
        self.probe.counters.borrow_mut().connects += 1;
        let behavior = self.behaviors.get(&addr).copied().unwrap_or(self.fallback);
        let status = match behavior {
            Behavior::FailImmediately(kind) => return Err(kind.into()),
            Behavior::Hang => None,
            Behavior::Accept { after } => Some((after, Ok(()))),
            Behavior::Refuse { after } => Some((after, Err(io::ErrorKind::ConnectionRefused))),
        };
        self.sockets.insert(token, Socket::Connecting);
        if let Some((after, status)) = status {
            let slot = self.schedule(after, Scheduled::Connect { token, status });
            self.pending_connects.insert(token, slot);
        }
        Ok(())
    }

    fn close(&mut self, token: Token) {
        *self
            .probe
            .counters
            .borrow_mut()
            .closes
            .entry(token)
            .or_insert(0) += 1;

        if self.sockets.remove(&token) == Some(Socket::Connecting) {
            if let Some(slot) = self.pending_connects.remove(&token) {
                self.queue.remove(&slot);
            }
            let status = Err(io::ErrorKind::ConnectionAborted);
            self.schedule(Duration::ZERO, Scheduled::Connect { token, status });
        }
    }

    fn start_timer(&mut self, token: Token, after: Duration) {
        self.probe.counters.borrow_mut().timers_started += 1;
        let slot = self.schedule(after, Scheduled::Timer { token });
        self.timers.insert(token, slot);
    }

    fn stop_timer(&mut self, token: Token) {
        if let Some(slot) = self.timers.remove(&token) {
            self.queue.remove(&slot);
            self.probe.counters.borrow_mut().timers_stopped += 1;
        }
    }

    fn poll(&mut self, events: &mut Vec<Event>) -> io::Result<()> {
        let Some((&(at, _), _)) = self.queue.first_key_value() else {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "simulation has no scheduled events",
            ));
        };
        self.now = self.now.max(at);

        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 != at {
                break;
            }
            match entry.remove() {
                Scheduled::Connect { token, status } => {
                    self.pending_connects.remove(&token);
                    if status.is_ok() {
                        self.sockets.insert(token, Socket::Connected);
                    } else {
                        self.sockets.remove(&token);
                    }
                    events.push(Event::Connect { token, status });
                }
                Scheduled::Timer { token } => {
                    self.timers.remove(&token);
                    self.probe.counters.borrow_mut().timers_fired += 1;
                    events.push(Event::Timer { token });
                }
            }
        }
        Ok(())
    }

    /// A hanging connect with nothing scheduled never completes on its own;
    /// only a close from a fiber could schedule its completion.
    fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_events_delivered_in_time_order() {
        let mut sim = SimPlatform::new().with_backend(
            addr(1),
            Behavior::Accept {
                after: Duration::from_millis(20),
            },
        );
        sim.start_timer(Token(1), Duration::from_millis(50));
        sim.connect(Token(2), addr(1)).unwrap();

        let mut events = Vec::new();
        sim.poll(&mut events).unwrap();
        assert_eq!(
            events,
            vec![Event::Connect {
                token: Token(2),
                status: Ok(())
            }]
        );
        assert_eq!(sim.now(), Duration::from_millis(20));

        events.clear();
        sim.poll(&mut events).unwrap();
        assert_eq!(events, vec![Event::Timer { token: Token(1) }]);
        assert_eq!(sim.now(), Duration::from_millis(50));
        assert!(sim.is_idle());
    }

    #[test]
    fn test_close_forces_aborted_completion() {
        let mut sim = SimPlatform::new().with_backend(addr(1), Behavior::Hang);
        sim.connect(Token(7), addr(1)).unwrap();
        assert!(sim.is_idle());

        sim.close(Token(7));
        assert!(!sim.is_idle());
        sim.close(Token(7));

        let mut events = Vec::new();
        sim.poll(&mut events).unwrap();
        assert_eq!(
            events,
            vec![Event::Connect {
                token: Token(7),
                status: Err(io::ErrorKind::ConnectionAborted)
            }]
        );
        assert_eq!(sim.probe().closes(Token(7)), 2);
        assert!(sim.is_idle());
    }

    #[test]
    fn test_stopped_timer_never_fires() {
        let mut sim = SimPlatform::new();
        let probe = sim.probe();
        sim.start_timer(Token(1), Duration::from_millis(10));
        sim.stop_timer(Token(1));
        sim.stop_timer(Token(1));

        assert!(sim.is_idle());
        assert_eq!(probe.timers_started(), 1);
        assert_eq!(probe.timers_stopped(), 1);

        let mut events = Vec::new();
        assert!(sim.poll(&mut events).is_err());
        assert_eq!(probe.timers_fired(), 0);
    }

    #[test]
    fn test_immediate_failure() {
        let mut sim = SimPlatform::new()
            .with_backend(addr(1), Behavior::FailImmediately(io::ErrorKind::OutOfMemory));
        let err = sim.connect(Token(1), addr(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::OutOfMemory);
        assert!(sim.is_idle());
    }
}
