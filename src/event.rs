//! Event-loop contract consumed by the transport.
//!
//! The transport never blocks and never schedules anything itself; it relies
//! on an external single-threaded loop to call back into it at two trigger
//! points: readability of its socket, and idle opportunities. Any loop that
//! honors the [`EventLoop`] contract can drive it; [`poll::PollLoop`] is the
//! bundled reference implementation.

pub mod poll;

use std::fmt;
use std::os::fd::BorrowedFd;
use std::rc::Weak;

/// Callbacks a registered object receives from the loop.
///
/// Implementors are registered as `Weak` references; the loop upgrades
/// before each call and holds the temporary strong reference for the
/// duration of the callback, so an implementor may drop its last externally
/// held strong reference from inside either method.
pub trait Watcher {
    /// The watched socket has data pending.
    fn on_readable(&self);

    /// The loop has no readiness work; one idle tick is granted.
    fn on_idle(&self);
}

/// Opaque token identifying one registration with the loop.
///
/// Minted by the loop; the registrant only stores and returns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    /// Creates a token from a loop-assigned value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cooperative, single-threaded readiness loop.
///
/// Guarantees required from implementations:
/// - `on_readable` is called whenever the registered descriptor has pending
///   data and the registration is still active.
/// - `on_idle` is called repeatedly while an idle registration is active and
///   the loop has no readiness work to dispatch first.
/// - Registration methods may be called from inside either callback.
pub trait EventLoop {
    /// Starts watching `fd` for readability. The token identifies this watch
    /// until [`EventLoop::unregister_readable`] is called with it.
    fn register_readable(&self, fd: BorrowedFd<'_>, watcher: Weak<dyn Watcher>) -> WatchId;

    /// Stops a readability watch. `fd` must be the descriptor the watch was
    /// registered with (kernel-level deregistration needs it).
    fn unregister_readable(&self, id: WatchId, fd: BorrowedFd<'_>);

    /// Arms idle callbacks for `watcher`. They keep firing until cancelled.
    fn register_idle(&self, watcher: Weak<dyn Watcher>) -> WatchId;

    /// Cancels an idle registration.
    fn cancel_idle(&self, id: WatchId);
}
