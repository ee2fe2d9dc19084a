use super::{Datagram, Transport, MAX_DATAGRAM_SIZE};
use crate::error::TransportError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// UDP transport over a single broadcast-enabled socket.
///
/// Robots reply to the source port of the probe, so one socket carries both
/// directions. Sends go through a non-blocking clone of the descriptor
/// straight to the OS; the tokio handle is only used for receiving.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    sender: StdUdpSocket,
    broadcast_addr: Ipv4Addr,
    receiver_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind the socket. Failure here is fatal for the station.
    pub async fn bind(bind_addr: SocketAddr, broadcast_addr: Ipv4Addr) -> Result<Self, TransportError> {
        let init_err = |source: std::io::Error| TransportError::Init {
            addr: bind_addr.to_string(),
            source,
        };

        let std_socket = StdUdpSocket::bind(bind_addr).map_err(init_err)?;
        std_socket.set_broadcast(true).map_err(init_err)?;
        std_socket.set_nonblocking(true).map_err(init_err)?;
        let sender = std_socket.try_clone().map_err(init_err)?;
        let socket = UdpSocket::from_std(std_socket).map_err(init_err)?;

        let local = socket.local_addr().map_err(init_err)?;
        info!(%local, broadcast = %broadcast_addr, "UDP transport bound");

        Ok(Self {
            socket: Arc::new(socket),
            sender,
            broadcast_addr,
            receiver_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(|source| TransportError::Init {
            addr: "local".to_string(),
            source,
        })
    }

    /// Start delivering inbound datagrams in arrival order.
    ///
    /// The channel holds a single datagram; while the consumer is busy the
    /// receive loop waits and further datagrams stay in the OS socket buffer.
    /// Calling this again replaces the previous subscription.
    pub fn subscribe(&self) -> mpsc::Receiver<Datagram> {
        let (tx, rx) = mpsc::channel(1);
        let socket = Arc::clone(&self.socket);

        let task = tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, source)) => {
                        let datagram = Datagram {
                            payload: buffer[..len].to_vec(),
                            source,
                        };
                        if tx.send(datagram).await.is_err() {
                            debug!("datagram subscriber dropped, receive loop exiting");
                            break;
                        }
                    }
                    Err(e) => {
                        // ICMP port-unreachable from a vanished robot surfaces here on some
                        // platforms; it must not end the loop.
                        warn!(error = %e, "UDP receive error");
                    }
                }
            }
        });

        if let Some(previous) = self.task_slot().replace(task) {
            previous.abort();
        }

        rx
    }

    /// Stop the receive loop and refuse further sends
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
        info!("UDP transport closed");
    }

    fn task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.receiver_task.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_to(&self, dest: SocketAddr, payload: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        match self.sender.send_to(payload, dest) {
            Ok(_) => Ok(()),
            Err(source) => Err(TransportError::Send { dest, source }),
        }
    }
}

impl Transport for UdpTransport {
    fn send_unicast(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<(), TransportError> {
        self.send_to(SocketAddr::new(addr, port), payload)
    }

    fn send_broadcast(&self, port: u16, payload: &[u8]) -> Result<(), TransportError> {
        self.send_to(SocketAddr::new(IpAddr::V4(self.broadcast_addr), port), payload)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task_slot().take() {
            task.abort();
        }
    }
}
