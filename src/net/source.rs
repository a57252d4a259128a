//! Source addresses of received datagrams.

use std::net::{IpAddr, SocketAddr, SocketAddrV4, SocketAddrV6};

use rustix::net::SocketAddrAny;
use thiserror::Error;

/// The kernel-reported sender of one datagram, tagged by address family.
///
/// The kernel can hand back an address outside the INET pair (or none at
/// all); such a datagram is still queued, carrying [`SourceAddr::Unknown`],
/// and is discarded at dispatch time when the conversion to an IP address
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAddr {
    /// IPv4 sender.
    V4(SocketAddrV4),
    /// IPv6 sender.
    V6(SocketAddrV6),
    /// No address, or an address family we do not understand.
    Unknown,
}

/// Failure to interpret a source address as an IP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SourceAddrError {
    /// The kernel reported no address or a family outside the INET pair.
    #[error("address family outside the INET pair")]
    UnsupportedFamily,
}

impl SourceAddr {
    /// Classifies a kernel-reported address.
    #[must_use]
    pub fn from_any(addr: Option<SocketAddrAny>) -> Self {
        match addr {
            Some(SocketAddrAny::V4(v4)) => Self::V4(v4),
            Some(SocketAddrAny::V6(v6)) => Self::V6(v6),
            _ => Self::Unknown,
        }
    }

    /// Returns the sender's IP address.
    ///
    /// # Errors
    ///
    /// Fails for [`SourceAddr::Unknown`]; the caller is expected to drop the
    /// affected datagram and continue.
    pub fn ip(&self) -> Result<IpAddr, SourceAddrError> {
        self.socket_addr().map(|addr| addr.ip())
    }

    /// Returns the full sender endpoint (address and port).
    ///
    /// # Errors
    ///
    /// Fails for [`SourceAddr::Unknown`].
    pub fn socket_addr(&self) -> Result<SocketAddr, SourceAddrError> {
        match *self {
            Self::V4(v4) => Ok(SocketAddr::V4(v4)),
            Self::V6(v6) => Ok(SocketAddr::V6(v6)),
            Self::Unknown => Err(SourceAddrError::UnsupportedFamily),
        }
    }
}
