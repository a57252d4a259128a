//! Reference event loop backed by [`mio::Poll`].
//!
//! Readiness is level-triggered: every pass probes the registered
//! descriptors with a zero-timeout poll and dispatches the ones that report
//! pending data. The OS selector only provides the blocking wait in between,
//! so a watcher that leaves data unread (for instance after hitting a drain
//! cap) is called again on the very next pass rather than stalling until a
//! new datagram arrives.
//!
//! Idle ticks are emulated: a pass that dispatches no readiness work grants
//! one idle round to every armed watcher. While any idle registration is
//! active the blocking wait collapses to zero so idle watchers are never
//! starved behind a sleeping selector.
//!
//! Watchers are held as `Weak` references and may re-enter the loop from
//! inside their callbacks (registering, cancelling, or dropping the last
//! strong reference to themselves); no interior borrow is held across a
//! callback. Dead watchers are pruned as they are encountered.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::rc::Weak;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use rustix::event::{poll as poll_fds, PollFd, PollFlags};
use tracing::{debug, error};

use super::{EventLoop, WatchId, Watcher};

/// Event capacity of one selector pass.
const EVENTS_PER_PASS: usize = 256;

struct ReadEntry {
    /// Duplicate of the registered descriptor, used for readiness probes.
    /// Same open file description, so it observes the same receive queue.
    probe: OwnedFd,
    watcher: Weak<dyn Watcher>,
}

struct IdleEntry {
    id: WatchId,
    watcher: Weak<dyn Watcher>,
}

/// A single-threaded poll loop implementing [`EventLoop`].
pub struct PollLoop {
    poll: RefCell<Poll>,
    events: RefCell<Events>,
    readables: RefCell<HashMap<Token, ReadEntry>>,
    idles: RefCell<Vec<IdleEntry>>,
    next_id: Cell<u64>,
}

impl PollLoop {
    /// Creates a new loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS selector cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: RefCell::new(Poll::new()?),
            events: RefCell::new(Events::with_capacity(EVENTS_PER_PASS)),
            readables: RefCell::new(HashMap::new()),
            idles: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        })
    }

    fn mint(&self) -> WatchId {
        let raw = self.next_id.get();
        self.next_id.set(raw + 1);
        WatchId::new(raw)
    }

    /// Zero-timeout readiness probe over all registered descriptors.
    fn probe_ready(&self) -> Vec<Token> {
        let readables = self.readables.borrow();
        let mut ready = Vec::new();
        for (token, entry) in readables.iter() {
            let mut fds = [PollFd::new(&entry.probe, PollFlags::IN)];
            if matches!(poll_fds(&mut fds, 0), Ok(n) if n > 0) {
                ready.push(*token);
            }
        }
        ready
    }

    /// Runs one scheduling pass: dispatches readability callbacks for every
    /// descriptor with pending data, waiting on the selector for up to
    /// `max_wait` first if nothing is pending (not at all while idle
    /// registrations exist), then grants one idle round iff nothing was
    /// readable.
    ///
    /// Returns the number of callbacks dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if the selector wait fails (interrupts are absorbed
    /// and count as an empty wait).
    pub fn turn(&self, max_wait: Option<Duration>) -> io::Result<usize> {
        let mut ready = self.probe_ready();
        if ready.is_empty() {
            let timeout = if self.idles.borrow().is_empty() {
                max_wait
            } else {
                Some(Duration::ZERO)
            };
            {
                let mut poll = self.poll.borrow_mut();
                let mut events = self.events.borrow_mut();
                match poll.poll(&mut events, timeout) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err),
                }
            }
            ready = self.probe_ready();
        }

        let mut dispatched = 0;
        for token in ready {
            // Re-lookup per event: an earlier callback may have unregistered
            // this watch within the same pass.
            let Some(weak) = self
                .readables
                .borrow()
                .get(&token)
                .map(|entry| entry.watcher.clone())
            else {
                continue;
            };
            match weak.upgrade() {
                Some(watcher) => {
                    watcher.on_readable();
                    dispatched += 1;
                }
                None => {
                    self.readables.borrow_mut().remove(&token);
                }
            }
        }
        if dispatched > 0 {
            return Ok(dispatched);
        }

        let armed: Vec<(WatchId, Weak<dyn Watcher>)> = self
            .idles
            .borrow()
            .iter()
            .map(|entry| (entry.id, entry.watcher.clone()))
            .collect();
        for (id, weak) in armed {
            // Skip entries cancelled by an earlier idle callback this round.
            if !self.idles.borrow().iter().any(|entry| entry.id == id) {
                continue;
            }
            match weak.upgrade() {
                Some(watcher) => {
                    watcher.on_idle();
                    dispatched += 1;
                }
                None => self.idles.borrow_mut().retain(|entry| entry.id != id),
            }
        }
        Ok(dispatched)
    }
}

impl EventLoop for PollLoop {
    fn register_readable(&self, fd: BorrowedFd<'_>, watcher: Weak<dyn Watcher>) -> WatchId {
        let id = self.mint();
        let token = Token(id.raw() as usize);
        let probe = match fd.try_clone_to_owned() {
            Ok(probe) => probe,
            Err(err) => {
                error!(watch = %id, %err, "descriptor duplication failed; watch will never fire");
                return id;
            }
        };
        let poll = self.poll.borrow();
        if let Err(err) = poll
            .registry()
            .register(&mut SourceFd(&fd.as_raw_fd()), token, Interest::READABLE)
        {
            error!(watch = %id, %err, "selector registration failed; watch relies on probing only");
        }
        self.readables.borrow_mut().insert(token, ReadEntry { probe, watcher });
        id
    }

    fn unregister_readable(&self, id: WatchId, fd: BorrowedFd<'_>) {
        self.readables.borrow_mut().remove(&Token(id.raw() as usize));
        let poll = self.poll.borrow();
        if let Err(err) = poll.registry().deregister(&mut SourceFd(&fd.as_raw_fd())) {
            debug!(watch = %id, %err, "selector deregistration failed");
        }
    }

    fn register_idle(&self, watcher: Weak<dyn Watcher>) -> WatchId {
        let id = self.mint();
        self.idles.borrow_mut().push(IdleEntry { id, watcher });
        id
    }

    fn cancel_idle(&self, id: WatchId) {
        self.idles.borrow_mut().retain(|entry| entry.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::net::UdpSocket;
    use std::os::fd::AsFd;
    use std::rc::Rc;
    use std::time::Instant;

    #[derive(Default)]
    struct Flag {
        readable: Cell<usize>,
        idle: Cell<usize>,
    }

    impl Watcher for Flag {
        fn on_readable(&self) {
            self.readable.set(self.readable.get() + 1);
        }

        fn on_idle(&self) {
            self.idle.set(self.idle.get() + 1);
        }
    }

    fn turn_until(ev: &PollLoop, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !done() {
            assert!(Instant::now() < deadline, "loop made no progress");
            ev.turn(Some(Duration::from_millis(10))).expect("turn");
        }
    }

    #[test]
    fn readability_dispatch() {
        let ev = PollLoop::new().expect("loop");
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let addr = socket.local_addr().expect("local addr");
        let flag = Rc::new(Flag::default());

        let weak: Weak<dyn Watcher> = Rc::downgrade(&(flag.clone() as Rc<dyn Watcher>));
        let _watch = ev.register_readable(socket.as_fd(), weak);

        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        peer.send_to(b"ping", addr).expect("send");

        turn_until(&ev, || flag.readable.get() > 0);
        // Readiness work suppresses idle rounds.
        assert_eq!(flag.idle.get(), 0);
    }

    #[test]
    fn unread_data_keeps_firing() {
        // The watcher never consumes the datagram; a level-triggered loop
        // must keep reporting the descriptor rather than stalling.
        let ev = PollLoop::new().expect("loop");
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let addr = socket.local_addr().expect("local addr");
        let flag = Rc::new(Flag::default());

        let weak: Weak<dyn Watcher> = Rc::downgrade(&(flag.clone() as Rc<dyn Watcher>));
        let _watch = ev.register_readable(socket.as_fd(), weak);

        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        peer.send_to(b"ping", addr).expect("send");

        turn_until(&ev, || flag.readable.get() >= 3);
    }

    #[test]
    fn idle_fires_until_cancelled() {
        let ev = PollLoop::new().expect("loop");
        let flag = Rc::new(Flag::default());

        let weak: Weak<dyn Watcher> = Rc::downgrade(&(flag.clone() as Rc<dyn Watcher>));
        let watch = ev.register_idle(weak);

        turn_until(&ev, || flag.idle.get() >= 3);
        ev.cancel_idle(watch);

        let settled = flag.idle.get();
        ev.turn(Some(Duration::ZERO)).expect("turn");
        assert_eq!(flag.idle.get(), settled);
    }

    #[test]
    fn dead_idle_watcher_is_pruned() {
        let ev = PollLoop::new().expect("loop");
        let flag = Rc::new(Flag::default());
        let weak: Weak<dyn Watcher> = Rc::downgrade(&(flag.clone() as Rc<dyn Watcher>));
        ev.register_idle(weak);
        drop(flag);

        assert_eq!(ev.turn(Some(Duration::ZERO)).expect("turn"), 0);
        assert!(ev.idles.borrow().is_empty());
    }
}
