//! # pgmux-fiber
//!
//! Cooperative concurrency engine for the pgmux connection pooler.
//!
//! Fibers are futures driven by a single-threaded [`Scheduler`]. A fiber runs
//! uninterrupted until it reaches an explicit suspension point, and every
//! platform callback (connect completion, timer expiry) is dispatched on the
//! scheduler thread between fiber turns. Races such as "deadline fires" versus
//! "connect completes" are therefore settled by ordinary sequential code.
//!
//! ## Features
//!
//! - Explicit `suspend` / `wake` / `cancel` with exactly-once wakeup
//! - Scoped cancellation operations via [`CancelGuard`]
//! - One-shot timers whose callbacks never run once stopped
//! - Deadline-bounded, cancellable TCP connect via [`Io::connect`]
//! - Pluggable [`Platform`]: [`TokioPlatform`] for real sockets,
//!   [`SimPlatform`] for deterministic virtual-time tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use pgmux_fiber::{Io, Scheduler, TokioPlatform};
//!
//! let scheduler = Scheduler::new(TokioPlatform::new()?);
//! scheduler.spawn(|handle| async move {
//!     let io = Io::new(&handle);
//!     match io.connect(addr, Some(Duration::from_secs(3))).await {
//!         Ok(()) => tracing::info!("connected"),
//!         Err(e) if e.is_timeout() => tracing::warn!("backend too slow"),
//!         Err(e) => tracing::warn!(error = %e, "connect failed"),
//!     }
//! });
//! scheduler.run()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod fiber;
pub mod io;
pub mod platform;
pub mod scheduler;
pub mod sim;
pub mod tokio_platform;

pub use error::{ConnectError, FiberError};
pub use fiber::{CancelGuard, FiberId, FiberState};
pub use io::Io;
pub use platform::{Event, Platform, Status, Token};
pub use scheduler::{Handle, Scheduler, Suspend, TimerId, YieldNow};
pub use sim::{Behavior, SimPlatform, SimProbe};
pub use tokio_platform::TokioPlatform;
