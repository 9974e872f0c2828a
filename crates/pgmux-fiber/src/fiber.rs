//! Fiber records and scoped cancellation operations.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::platform::Status;
use crate::scheduler::Handle;

slotmap::new_key_type! {
    /// Identifies a fiber owned by a [`Scheduler`](crate::Scheduler).
    pub struct FiberId;
}

/// Scheduling state of a live fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Queued to run.
    Ready,
    /// Currently being polled.
    Running,
    /// Parked at a suspension point until woken.
    Suspended,
}

pub(crate) type Body = Pin<Box<dyn Future<Output = ()>>>;

pub(crate) type CancelOp = Box<dyn FnOnce()>;

/// A registered cancellation operation.
///
/// `action` is taken when the operation runs; the slot itself stays until the
/// owning [`CancelGuard`] is dropped so that no second operation can be
/// registered in between. `live` is cleared by the guard even when the slot
/// cannot be removed at that moment; a dead slot is never run and may be
/// replaced.
pub(crate) struct OpSlot {
    pub(crate) seq: u64,
    pub(crate) live: Rc<Cell<bool>>,
    pub(crate) action: Option<CancelOp>,
}

impl OpSlot {
    pub(crate) fn is_live(&self) -> bool {
        self.live.get()
    }
}

pub(crate) struct Fiber {
    /// Taken out while the fiber is being polled.
    pub(crate) body: Option<Body>,
    pub(crate) state: FiberState,
    pub(crate) cancelled: bool,
    pub(crate) wakeup: Option<Status>,
    pub(crate) op: Option<OpSlot>,
}

impl Fiber {
    pub(crate) fn new(body: Body) -> Self {
        Self {
            body: Some(body),
            state: FiberState::Ready,
            cancelled: false,
            wakeup: None,
            op: None,
        }
    }
}

/// Deregisters a cancellation operation when dropped.
///
/// Returned by [`Handle::begin_op`]. Keep it alive across the suspension it
/// protects and drop it right after resuming.
#[must_use = "dropping the guard deregisters the cancellation operation"]
pub struct CancelGuard {
    handle: Handle,
    fiber: FiberId,
    seq: u64,
    live: Rc<Cell<bool>>,
}

impl CancelGuard {
    pub(crate) fn new(handle: Handle, fiber: FiberId, seq: u64, live: Rc<Cell<bool>>) -> Self {
        Self {
            handle,
            fiber,
            seq,
            live,
        }
    }

    /// The fiber this operation is registered on.
    #[must_use]
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.live.set(false);
        self.handle.end_op(self.fiber, self.seq);
    }
}

impl std::fmt::Debug for CancelGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelGuard")
            .field("fiber", &self.fiber)
            .field("seq", &self.seq)
            .finish()
    }
}
