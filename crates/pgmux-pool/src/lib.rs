//! # pgmux-pool
//!
//! Backend server pooling for the pgmux connection pooler.
//!
//! Each (database, user) route owns a [`ServerPool`] whose servers sit in
//! exactly one of three ordered lists: active (checked out), idle (ready for
//! reuse) and expire (waiting to be closed). The pool itself never blocks;
//! [`Route`] layers fiber-aware checkout on top, connecting new servers on
//! demand and parking checkouts while the pool is full.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use std::time::Duration;
//! use pgmux_fiber::{Scheduler, TokioPlatform};
//! use pgmux_pool::{Route, RouteConfig};
//!
//! let scheduler = Scheduler::new(TokioPlatform::new()?);
//! let config = RouteConfig::new("sales", "app")
//!     .host("10.0.0.5")
//!     .pool_size(8)
//!     .pool_timeout(Duration::from_secs(1));
//! let route = Rc::new(Route::new(&scheduler.handle(), config)?);
//!
//! scheduler.spawn(move |_| async move {
//!     let key = route.checkout().await?;
//!     // ... relay traffic ...
//!     route.checkin(key, false)?;
//!     Ok::<_, pgmux_pool::PoolError>(())
//! });
//! scheduler.run()?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;
pub mod route;
pub mod server;

pub use config::{RouteConfig, TlsConfig, TlsMode};
pub use error::PoolError;
pub use pool::{Acquire, PoolStatus, ServerPool};
pub use route::{PoolMetrics, Route};
pub use server::{Connection, RouteId, Server, ServerKey, ServerState};
