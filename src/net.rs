//! Datagram socket primitives.
//!
//! Thin rustix-backed wrappers around one UDP socket of one address family,
//! plus the family-tagged source address attached to every received
//! datagram. Backend-specific address structures never leave this module;
//! conversion to the standard library types happens here.

pub mod socket;
pub mod source;

pub use socket::{DgramSocket, Family};
pub use source::{SourceAddr, SourceAddrError};
