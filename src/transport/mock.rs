//! In-memory transport for tests and dry runs

use super::Transport;
use crate::error::TransportError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Unicast(IpAddr, u16),
    Broadcast(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub destination: Destination,
    pub payload: Vec<u8>,
}

/// Records every successful send. Clones share the same log.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    sent: Vec<SentDatagram>,
    fail_next: usize,
    fail_all: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Make every send fail until cleared
    pub fn set_fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    pub fn sent(&self) -> Vec<SentDatagram> {
        self.lock().sent.clone()
    }

    /// Payloads sent to one unicast address, oldest first
    pub fn sent_to(&self, addr: IpAddr) -> Vec<Vec<u8>> {
        self.lock()
            .sent
            .iter()
            .filter(|d| matches!(d.destination, Destination::Unicast(ip, _) if ip == addr))
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.lock()
            .sent
            .iter()
            .filter(|d| matches!(d.destination, Destination::Broadcast(_)))
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.lock().sent.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, destination: Destination, dest_addr: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.fail_all || inner.fail_next > 0 {
            inner.fail_next = inner.fail_next.saturating_sub(1);
            return Err(TransportError::Send {
                dest: dest_addr,
                source: std::io::Error::new(std::io::ErrorKind::WouldBlock, "injected failure"),
            });
        }
        inner.sent.push(SentDatagram {
            destination,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

impl Transport for MockTransport {
    fn send_unicast(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<(), TransportError> {
        self.record(Destination::Unicast(addr, port), SocketAddr::new(addr, port), payload)
    }

    fn send_broadcast(&self, port: u16, payload: &[u8]) -> Result<(), TransportError> {
        let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port);
        self.record(Destination::Broadcast(port), dest, payload)
    }
}
