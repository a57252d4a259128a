//! The UDP transport core.
//!
//! One [`UdpTransport`] owns one datagram socket of one address family and
//! turns raw socket readiness into a disciplined callback stream:
//!
//! - a readability notification drains pending datagrams (bounded per call)
//!   into the response queue and arms the deferred dispatcher;
//! - each idle tick pops exactly one queued response and hands it to the
//!   [`Handler`], as the very last action of the tick.
//!
//! Popping before delivering is what makes handler-triggered teardown safe:
//! when the handler closes the transport or drops the last strong reference
//! to it, no queue cursor or registration is left dangling, and the next
//! tick (if the transport still exists) revalidates everything from
//! scratch.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsFd;
use std::rc::{Rc, Weak};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::event::{EventLoop, WatchId, Watcher};
use crate::net::{DgramSocket, Family};
use crate::transport::{Context, Handler, Query, Response};

/// Largest UDP payload one datagram can carry.
const MAX_DATAGRAM_SIZE: usize = 65535;

/// Fairness cap: datagrams drained per readability notification. Anything
/// beyond it stays kernel-buffered until the next notification so one busy
/// socket cannot monopolize a scheduling slice.
const MAX_BATCH_DRAIN: usize = 1024;

/// Nameservers answer on the well-known DNS port.
const NAMESERVER_PORT: u16 = 53;

/// Destination endpoint for a query to `ip`.
fn nameserver_addr(ip: IpAddr) -> SocketAddr {
    SocketAddr::new(ip, NAMESERVER_PORT)
}

struct OpenSocket {
    socket: DgramSocket,
    watch: WatchId,
}

/// Non-blocking UDP channel to nameservers, driven by an event loop.
///
/// Construct with [`UdpTransport::new`]; the socket opens lazily on the
/// first [`send`](UdpTransport::send) (or eagerly via
/// [`open`](UdpTransport::open)). Dropping the transport deterministically
/// releases the socket watch and the idle registration, whichever subset is
/// active.
pub struct UdpTransport {
    context: Weak<dyn Context>,
    handler: Weak<dyn Handler>,
    socket: RefCell<Option<OpenSocket>>,
    responses: RefCell<VecDeque<Response>>,
    idle: Cell<Option<WatchId>>,
    recv_buf: RefCell<Vec<u8>>,
    weak_self: Weak<UdpTransport>,
}

impl UdpTransport {
    /// Creates a closed transport borrowing its collaborators.
    ///
    /// Both references are non-owning; the caller keeps the context and
    /// handler alive for the transport's entire lifetime.
    pub fn new(context: Weak<dyn Context>, handler: Weak<dyn Handler>) -> Rc<Self> {
        Rc::new_cyclic(|weak_self| Self {
            context,
            handler,
            socket: RefCell::new(None),
            responses: RefCell::new(VecDeque::new()),
            idle: Cell::new(None),
            recv_buf: RefCell::new(vec![0; MAX_DATAGRAM_SIZE]),
            weak_self: weak_self.clone(),
        })
    }

    /// Opens the socket for `family` and registers it for readability.
    ///
    /// Returns `true` if the transport is open afterwards, including the
    /// case where it already was (no second socket is created). Returns
    /// `false` if the descriptor cannot be created; the transport stays
    /// closed and the caller decides whether to retry.
    pub fn open(&self, family: Family) -> bool {
        if self.socket.borrow().is_some() {
            return true;
        }
        let Some(context) = self.context.upgrade() else {
            return false;
        };
        let socket = match DgramSocket::open(family) {
            Ok(socket) => socket,
            Err(err) => {
                debug!(?family, %err, "socket creation failed");
                return false;
            }
        };
        let hint = context.buffer_size();
        if hint > 0 {
            // A sizing hint only; the OS default stands if the kernel
            // refuses.
            if let Err(err) = socket.set_buffer_sizes(hint) {
                debug!(bytes = hint, %err, "buffer sizing rejected");
            }
        }
        let watch = context
            .event_loop()
            .register_readable(socket.as_fd(), self.watcher());
        *self.socket.borrow_mut() = Some(OpenSocket { socket, watch });
        true
    }

    /// Closes the socket, deregistering it from the event loop first.
    ///
    /// Returns `false` if the transport was already closed. Responses that
    /// are already queued keep being dispatched; only destruction cancels
    /// the dispatcher.
    pub fn close(&self) -> bool {
        let Some(open) = self.socket.borrow_mut().take() else {
            return false;
        };
        if let Some(context) = self.context.upgrade() {
            context
                .event_loop()
                .unregister_readable(open.watch, open.socket.as_fd());
        }
        // Descriptor closes when `open` drops here.
        true
    }

    /// The kernel-assigned local endpoint, once the socket is open.
    ///
    /// Stays the family's unspecified address with port 0 until the first
    /// send binds the socket.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .borrow()
            .as_ref()
            .and_then(|open| open.socket.local_addr().ok())
    }

    /// Sends `query` to the nameserver at `ip`, port 53.
    ///
    /// Opens the socket for `ip`'s family first if needed. Returns `false`
    /// when the socket cannot be opened or the transmit call fails (for
    /// instance when `ip`'s family does not match an already-open socket);
    /// there is no retry.
    pub fn send(&self, ip: IpAddr, query: &(impl Query + ?Sized)) -> bool {
        if self.socket.borrow().is_none() && !self.open(Family::of(ip)) {
            return false;
        }

        // Callers may fire many queries back-to-back without yielding to
        // the loop; pick up whatever already landed so responses cannot
        // silt up in the kernel buffer meanwhile.
        let pending = self
            .socket
            .borrow()
            .as_ref()
            .is_some_and(|open| open.socket.readable_now());
        if pending {
            self.drain();
        }

        let guard = self.socket.borrow();
        let Some(open) = guard.as_ref() else {
            return false;
        };
        let dest = nameserver_addr(ip);
        match open.socket.send_dgram(query.bytes(), dest) {
            Ok(len) => {
                trace!(%dest, len, "query sent");
                true
            }
            Err(err) => {
                debug!(%dest, %err, "query transmit failed");
                false
            }
        }
    }

    fn watcher(&self) -> Weak<dyn Watcher> {
        self.weak_self.clone()
    }

    /// Drains pending datagrams into the response queue and arms the
    /// dispatcher.
    fn drain(&self) {
        let guard = self.socket.borrow();
        let Some(open) = guard.as_ref() else {
            // Stale notification for a closed socket.
            return;
        };

        // One clock capture per batch; the whole drain is one scheduling
        // slice.
        let batch_time = Instant::now();
        let mut buf = self.recv_buf.borrow_mut();
        let mut queued = 0usize;
        while queued < MAX_BATCH_DRAIN {
            match open.socket.recv_now(&mut buf) {
                // A zero-length read means nothing usable; end the batch.
                Ok((0, _)) => break,
                Ok((len, source)) => {
                    self.responses.borrow_mut().push_back(Response::new(
                        batch_time,
                        source,
                        buf[..len].to_vec(),
                    ));
                    queued += 1;
                }
                // Would-block or a transient receive failure: done for now,
                // the next readability notification retries.
                Err(_) => break,
            }
        }
        drop(buf);
        drop(guard);

        if queued > 0 {
            trace!(queued, "drained inbound datagrams");
        }
        self.arm_dispatcher();
    }

    /// Idempotent arm: while armed, the loop keeps granting ticks until the
    /// queue runs dry.
    fn arm_dispatcher(&self) {
        if self.idle.get().is_some() {
            return;
        }
        let Some(context) = self.context.upgrade() else {
            return;
        };
        let id = context.event_loop().register_idle(self.watcher());
        self.idle.set(Some(id));
    }

    fn disarm_dispatcher(&self) {
        let Some(id) = self.idle.take() else {
            return;
        };
        if let Some(context) = self.context.upgrade() {
            context.event_loop().cancel_idle(id);
        }
    }

    /// Delivers at most one queued response to the handler.
    fn dispatch_one(&self) {
        let popped = self.responses.borrow_mut().pop_front();
        let Some(response) = popped else {
            // Terminal state of a drain cycle.
            self.disarm_dispatcher();
            return;
        };
        let source = match response.source().ip() {
            Ok(ip) => ip,
            Err(err) => {
                // One bad datagram must not disturb the rest of the queue.
                warn!(%err, source = ?response.source(), "dropping response with unusable source");
                return;
            }
        };
        let Some(handler) = self.handler.upgrade() else {
            return;
        };
        // Nothing below this call may touch `self`: the handler may close
        // the transport or drop its last strong reference synchronously.
        handler.on_received(source, response.payload());
    }
}

impl Watcher for UdpTransport {
    fn on_readable(&self) {
        self.drain();
    }

    fn on_idle(&self) {
        self.dispatch_one();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        // Socket watch first, then the idle dispatcher, whichever subset is
        // active.
        self.close();
        self.disarm_dispatcher();
    }
}
