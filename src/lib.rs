//! Non-blocking UDP transport core for a DNS resolver.
//!
//! A [`UdpTransport`] owns one datagram socket of one address family, drains
//! inbound datagrams into an ordered queue, and redelivers them to a
//! caller-supplied [`Handler`] one per idle tick of a cooperative event loop.
//! Deferring delivery to idle ticks keeps the handler safe: it may close or
//! drop the transport from inside the callback without corrupting later
//! processing, because every tick revalidates transport state from scratch.
//!
//! The transport is single-threaded by construction (`Rc` + interior
//! mutability, not `Send`). It is driven entirely by an [`EventLoop`]
//! through the [`Watcher`] callbacks; between callbacks it is quiescent.
//!
//! The [`event::poll`] module ships a [`mio`]-backed reference loop for
//! embedders who do not bring their own.

pub mod event;
pub mod net;
pub mod transport;

pub use event::{EventLoop, WatchId, Watcher};
pub use net::{DgramSocket, Family, SourceAddr, SourceAddrError};
pub use transport::{Context, Handler, Query, Response, UdpTransport};
