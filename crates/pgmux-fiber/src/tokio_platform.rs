//! Platform backed by a tokio current-thread runtime.
//!
//! Connects and timers run as tokio tasks; their completions are funnelled
//! through an unbounded channel and only turned into [`Event`]s inside
//! [`Platform::poll`], on the scheduler thread. Completions that arrive for a
//! handle or timer the scheduler already gave up on are discarded here, which
//! is what keeps "exactly one completion per connect" true when a close races
//! a finishing connect.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tokio::net::{TcpSocket, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::platform::{Event, Platform, Token};

enum Completion {
    Connect {
        token: Token,
        result: io::Result<TcpStream>,
    },
    Timer {
        token: Token,
    },
}

enum Socket {
    Connecting(JoinHandle<()>),
    Connected(TcpStream),
}

/// [`Platform`] performing real TCP connects on a private tokio runtime.
pub struct TokioPlatform {
    tx: UnboundedSender<Completion>,
    rx: UnboundedReceiver<Completion>,
    sockets: HashMap<Token, Socket>,
    timers: HashMap<Token, JoinHandle<()>>,
    /// Connects closed while in flight; their aborted completion is pending.
    aborted: Vec<Token>,
    started: Instant,
    // Declared last so sockets and tasks are released before the runtime.
    runtime: Runtime,
}

impl TokioPlatform {
    /// Create the platform and its current-thread runtime.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            tx,
            rx,
            sockets: HashMap::new(),
            timers: HashMap::new(),
            aborted: Vec::new(),
            started: Instant::now(),
            runtime,
        })
    }

    /// Local and peer address of a connected handle.
    #[must_use]
    pub fn addresses(&self, token: Token) -> Option<(SocketAddr, SocketAddr)> {
        match self.sockets.get(&token)? {
            Socket::Connected(stream) => Some((stream.local_addr().ok()?, stream.peer_addr().ok()?)),
            Socket::Connecting(_) => None,
        }
    }

    fn accept(&mut self, completion: Completion, events: &mut Vec<Event>) {
        match completion {
            Completion::Timer { token } => {
                if self.timers.remove(&token).is_some() {
                    events.push(Event::Timer { token });
                }
            }
            Completion::Connect { token, result } => {
                let connecting = matches!(self.sockets.get(&token), Some(Socket::Connecting(_)));
                if !connecting {
                    tracing::trace!(token = token.0, "discarding completion for closed handle");
                    return;
                }
                let status = match result {
                    Ok(stream) => {
                        self.sockets.insert(token, Socket::Connected(stream));
                        Ok(())
                    }
                    Err(e) => {
                        self.sockets.remove(&token);
                        Err(e.kind())
                    }
                };
                events.push(Event::Connect { token, status });
            }
        }
    }

    fn has_in_flight(&self) -> bool {
        !self.timers.is_empty()
            || self
                .sockets
                .values()
                .any(|s| matches!(s, Socket::Connecting(_)))
    }
}

impl Platform for TokioPlatform {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn connect(&mut self, token: Token, addr: SocketAddr) -> io::Result<()> {
        let _enter = self.runtime.enter();
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        let tx = self.tx.clone();
        let task = self.runtime.spawn(async move {
            let result = socket.connect(addr).await;
            let _ = tx.send(Completion::Connect { token, result });
        });
        self.sockets.insert(token, Socket::Connecting(task));
        Ok(())
    }

    fn close(&mut self, token: Token) {
        let _enter = self.runtime.enter();
        match self.sockets.remove(&token) {
            Some(Socket::Connecting(task)) => {
                task.abort();
                self.aborted.push(token);
            }
            Some(Socket::Connected(stream)) => drop(stream),
            None => {}
        }
    }

    fn start_timer(&mut self, token: Token, after: Duration) {
        let tx = self.tx.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Completion::Timer { token });
        });
        self.timers.insert(token, task);
    }

    fn stop_timer(&mut self, token: Token) {
        if let Some(task) = self.timers.remove(&token) {
            task.abort();
        }
    }

    fn poll(&mut self, events: &mut Vec<Event>) -> io::Result<()> {
        let before = events.len();
        events.extend(self.aborted.drain(..).map(|token| Event::Connect {
            token,
            status: Err(io::ErrorKind::ConnectionAborted),
        }));

        while events.len() == before {
            if !self.has_in_flight() {
                return Ok(());
            }
            let completion = self
                .runtime
                .block_on(self.rx.recv())
                .ok_or_else(|| io::Error::other("platform event channel closed"))?;
            self.accept(completion, events);
        }

        while let Ok(completion) = self.rx.try_recv() {
            self.accept(completion, events);
        }
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.aborted.is_empty() && !self.has_in_flight()
    }
}

impl std::fmt::Debug for TokioPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioPlatform")
            .field("sockets", &self.sockets.len())
            .field("timers", &self.timers.len())
            .field("aborted", &self.aborted.len())
            .finish()
    }
}
