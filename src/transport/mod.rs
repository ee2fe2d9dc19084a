//! Datagram transport
//!
//! The fleet core only ever sees the [`Transport`] trait. Sends are
//! best-effort and non-blocking: a datagram that cannot be handed to the OS
//! right now is reported as [`TransportError::Send`] and dropped. Inbound
//! datagrams are delivered through a subscription channel owned by the
//! concrete transport.

use crate::error::TransportError;
use std::net::{IpAddr, SocketAddr};

pub mod mock;
mod udp;

pub use mock::MockTransport;
pub use udp::UdpTransport;

/// Largest payload the receiver accepts. Every protocol message is far smaller.
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// One inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub source: SocketAddr,
}

/// Send side of the link. Implementations must never block the caller.
pub trait Transport: Send + Sync {
    fn send_unicast(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<(), TransportError>;

    /// Send to the configured subnet broadcast address
    fn send_broadcast(&self, port: u16, payload: &[u8]) -> Result<(), TransportError>;
}
