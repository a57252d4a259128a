//! Family-scoped UDP socket.
//!
//! Wraps one `SOCK_DGRAM` descriptor with the small operation set the
//! transport needs: best-effort buffer sizing, explicitly non-blocking
//! receives, signal-free sends, and a zero-timeout readability check.
//!
//! The descriptor is created with close-on-exec and deliberately left in
//! blocking mode: sends are unbuffered, so blocking on a briefly full send
//! queue is preferable to dropping the datagram, while receives request
//! `MSG_DONTWAIT` per call.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::event::{poll, PollFd, PollFlags};
use rustix::net::{
    recvfrom, sendto_v4, sendto_v6, socket_with, AddressFamily, RecvFlags, SendFlags, SocketFlags,
    SocketType,
};

use super::SourceAddr;

/// IP address family a socket is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// The family a given IP address belongs to.
    #[must_use]
    pub const fn of(ip: std::net::IpAddr) -> Self {
        match ip {
            std::net::IpAddr::V4(_) => Self::V4,
            std::net::IpAddr::V6(_) => Self::V6,
        }
    }
}

/// One UDP socket of one address family.
///
/// The socket is unbound; the kernel assigns an ephemeral local port on the
/// first send. Closing happens when the value is dropped.
pub struct DgramSocket {
    fd: OwnedFd,
    family: Family,
}

impl DgramSocket {
    /// Creates a datagram socket for the given family with close-on-exec
    /// semantics.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be created (resource or
    /// permission limits).
    pub fn open(family: Family) -> io::Result<Self> {
        let af = match family {
            Family::V4 => AddressFamily::INET,
            Family::V6 => AddressFamily::INET6,
        };
        let fd = socket_with(af, SocketType::DGRAM, SocketFlags::CLOEXEC, None)?;
        Ok(Self { fd, family })
    }

    /// The family this socket was opened for.
    #[must_use]
    pub const fn family(&self) -> Family {
        self.family
    }

    /// Sets both the send and receive buffer to `bytes`.
    ///
    /// The kernel treats these as sizing hints and may clamp them.
    ///
    /// # Errors
    ///
    /// Returns an error if either option cannot be set.
    pub fn set_buffer_sizes(&self, bytes: usize) -> io::Result<()> {
        rustix::net::sockopt::set_socket_send_buffer_size(&self.fd, bytes)?;
        rustix::net::sockopt::set_socket_recv_buffer_size(&self.fd, bytes)?;
        Ok(())
    }

    /// Gets the socket's send buffer size.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn send_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::get_socket_send_buffer_size(&self.fd)?)
    }

    /// Gets the socket's receive buffer size.
    ///
    /// # Errors
    ///
    /// Returns an error if the option cannot be retrieved.
    pub fn recv_buffer_size(&self) -> io::Result<usize> {
        Ok(rustix::net::sockopt::get_socket_recv_buffer_size(&self.fd)?)
    }

    /// Receives one datagram without blocking, regardless of the socket's
    /// own blocking mode.
    ///
    /// Returns the payload length and the kernel-reported sender. A
    /// zero-length datagram yields `Ok((0, _))`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is pending (`WouldBlock`) or on any other
    /// receive failure.
    pub fn recv_now(&self, buf: &mut [u8]) -> io::Result<(usize, SourceAddr)> {
        let (len, addr) = recvfrom(&self.fd, buf, RecvFlags::DONTWAIT)?;
        Ok((len, SourceAddr::from_any(addr)))
    }

    /// Sends one datagram to `dest`, suppressing `SIGPIPE`-style signals.
    ///
    /// UDP sends are atomic: the datagram either leaves whole or the call
    /// fails.
    ///
    /// # Errors
    ///
    /// Returns an error on transmit failure, including a destination family
    /// that does not match the socket's.
    pub fn send_dgram(&self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let sent = match dest {
            SocketAddr::V4(v4) => sendto_v4(&self.fd, payload, SendFlags::NOSIGNAL, &v4)?,
            SocketAddr::V6(v6) => sendto_v6(&self.fd, payload, SendFlags::NOSIGNAL, &v6)?,
        };
        Ok(sent)
    }

    /// Zero-timeout readability check: is a datagram waiting right now?
    #[must_use]
    pub fn readable_now(&self) -> bool {
        let mut fds = [PollFd::new(&self.fd, PollFlags::IN)];
        matches!(poll(&mut fds, 0), Ok(n) if n > 0)
    }

    /// Returns the kernel-assigned local endpoint.
    ///
    /// Before the first send this is the family's unspecified address with
    /// port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be retrieved or is not
    /// an INET address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        let addr = rustix::net::getsockname(&self.fd)?;
        SourceAddr::from_any(Some(addr))
            .socket_addr()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }
}

impl AsFd for DgramSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn open_is_unbound() {
        let socket = DgramSocket::open(Family::V4).expect("open");
        assert_eq!(socket.family(), Family::V4);
        let local = socket.local_addr().expect("local addr");
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(local.port(), 0);
    }

    #[test]
    fn open_v6() {
        let socket = DgramSocket::open(Family::V6).expect("open");
        assert_eq!(socket.family(), Family::V6);
        assert_eq!(
            socket.local_addr().expect("local addr").ip(),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        );
    }

    #[test]
    fn send_binds_and_peer_receives() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let peer_addr = peer.local_addr().expect("peer addr");

        let socket = DgramSocket::open(Family::V4).expect("open");
        let sent = socket.send_dgram(b"query", peer_addr).expect("send");
        assert_eq!(sent, 5);

        // The first send assigns an ephemeral port.
        assert_ne!(socket.local_addr().expect("local addr").port(), 0);

        let mut buf = [0u8; 64];
        let (len, from) = peer.recv_from(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"query");
        assert_eq!(from, socket.local_addr().expect("local addr"));
    }

    #[test]
    fn recv_now_on_empty_socket_errs() {
        let socket = DgramSocket::open(Family::V4).expect("open");
        let mut buf = [0u8; 64];
        assert!(socket.recv_now(&mut buf).is_err());
        assert!(!socket.readable_now());
    }

    #[test]
    fn readable_after_peer_sends() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let socket = DgramSocket::open(Family::V4).expect("open");
        socket
            .send_dgram(b"hello", peer.local_addr().expect("peer addr"))
            .expect("send");

        let local = socket.local_addr().expect("local addr");
        peer.send_to(b"reply", local).expect("send back");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !socket.readable_now() {
            assert!(std::time::Instant::now() < deadline, "datagram never arrived");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }

        let mut buf = [0u8; 64];
        let (len, source) = socket.recv_now(&mut buf).expect("recv");
        assert_eq!(&buf[..len], b"reply");
        assert_eq!(source.socket_addr().expect("source"), peer.local_addr().unwrap());
    }

    #[test]
    fn family_mismatch_send_fails() {
        let socket = DgramSocket::open(Family::V4).expect("open");
        let dest = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 5353);
        assert!(socket.send_dgram(b"x", dest).is_err());
    }

    #[test]
    fn buffer_sizes_grow() {
        let socket = DgramSocket::open(Family::V4).expect("open");
        let before = socket.recv_buffer_size().expect("get");
        socket.set_buffer_sizes(1024 * 1024).expect("set");
        assert!(socket.send_buffer_size().expect("get") >= before.min(1024 * 1024));
        assert!(socket.recv_buffer_size().expect("get") >= before.min(1024 * 1024));
    }
}
