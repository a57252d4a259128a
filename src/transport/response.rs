//! Received datagrams queued for dispatch.

use std::time::Instant;

use crate::net::SourceAddr;

/// One received datagram: batch timestamp, sender, raw payload.
///
/// Immutable once constructed; the payload length is exactly the byte count
/// the receive call reported.
#[derive(Debug, Clone)]
pub struct Response {
    received_at: Instant,
    source: SourceAddr,
    payload: Vec<u8>,
}

impl Response {
    pub(crate) fn new(received_at: Instant, source: SourceAddr, payload: Vec<u8>) -> Self {
        Self {
            received_at,
            source,
            payload,
        }
    }

    /// Capture time of the drain batch this datagram arrived in.
    #[must_use]
    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// The kernel-reported sender.
    #[must_use]
    pub fn source(&self) -> SourceAddr {
        self.source
    }

    /// The raw datagram bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
