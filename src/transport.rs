//! The transport core and its resolver-facing seams.
//!
//! [`UdpTransport`] borrows its collaborators instead of owning them: the
//! resolver constructs the [`Context`] and [`Handler`] and guarantees both
//! outlive the transport. The borrow is modeled as `Weak` references; an
//! upgrade failure means teardown is underway and the affected operation
//! quietly reports failure instead of touching freed state.

pub mod response;
pub mod udp;

use std::net::IpAddr;
use std::rc::Rc;

use crate::event::EventLoop;

pub use response::Response;
pub use udp::UdpTransport;

/// Resolver-side configuration and plumbing the transport reads.
pub trait Context {
    /// Preferred socket buffer size in bytes for both directions.
    /// Zero keeps the OS defaults.
    fn buffer_size(&self) -> usize {
        0
    }

    /// The event loop driving this transport.
    fn event_loop(&self) -> Rc<dyn EventLoop>;
}

/// Receiver of inbound datagrams.
///
/// Called at most once per idle tick, never reentrantly. The handler may
/// close the transport or drop its last strong reference from inside the
/// call; the transport touches none of its own state afterward.
pub trait Handler {
    /// One datagram arrived from `source`.
    fn on_received(&self, source: IpAddr, payload: &[u8]);
}

/// An encoded outbound DNS query.
///
/// Read-only view; no ownership transfer. Blanket-implemented for anything
/// byte-slice-like, so `&[u8]` and `Vec<u8>` are queries as-is.
pub trait Query {
    /// The wire bytes to transmit as one datagram.
    fn bytes(&self) -> &[u8];
}

impl<T: AsRef<[u8]> + ?Sized> Query for T {
    fn bytes(&self) -> &[u8] {
        self.as_ref()
    }
}
