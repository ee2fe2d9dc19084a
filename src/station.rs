//! Station runtime
//!
//! Binds the sockets, spawns the receive loop, the four periodic loops and
//! the control server, and tears them down in order:
//!
//! 1. stop every task
//! 2. best-effort stop frame to each connected robot
//! 3. close the transport

use crate::config::FleetConfig;
use crate::control;
use crate::error::TransportError;
use crate::fleet::FleetCore;
use crate::scheduler::{wait_for_shutdown, TaskSet};
use crate::transport::{Transport, UdpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct Station {
    core: Arc<Mutex<FleetCore>>,
    transport: Arc<UdpTransport>,
    tasks: TaskSet,
    udp_addr: SocketAddr,
    control_addr: SocketAddr,
}

impl Station {
    /// Bring the station up. Socket failures here are fatal.
    pub async fn start(config: FleetConfig) -> Result<Self, TransportError> {
        let transport = Arc::new(UdpTransport::bind(config.bind_addr, config.broadcast_addr).await?);
        let udp_addr = transport.local_addr()?;

        let listener = TcpListener::bind(config.control_addr)
            .await
            .map_err(|source| TransportError::Init {
                addr: config.control_addr.to_string(),
                source,
            })?;
        let control_addr = listener.local_addr().map_err(|source| TransportError::Init {
            addr: config.control_addr.to_string(),
            source,
        })?;

        let shared: Arc<dyn Transport> = transport.clone();
        let core = Arc::new(Mutex::new(FleetCore::new(shared, &config)));
        let mut tasks = TaskSet::new();

        let mut inbound = transport.subscribe();
        let receiver_core = Arc::clone(&core);
        tasks.spawn("receiver", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    datagram = inbound.recv() => match datagram {
                        Some(datagram) => {
                            let mut core = receiver_core.lock().await;
                            let now = core.now_ms();
                            core.on_datagram(&datagram, now);
                        }
                        None => break,
                    },
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            debug!("receive loop stopped");
        });

        let discovery_core = Arc::clone(&core);
        tasks.spawn_periodic("discovery", config.discovery_period(), move || {
            let core = Arc::clone(&discovery_core);
            async move { core.lock().await.discovery_tick() }
        });

        let sweep_core = Arc::clone(&core);
        tasks.spawn_periodic("sweep", config.sweep_period(), move || {
            let core = Arc::clone(&sweep_core);
            async move {
                let mut core = core.lock().await;
                let now = core.now_ms();
                core.sweep_tick(now);
            }
        });

        let status_core = Arc::clone(&core);
        tasks.spawn_periodic("status", config.status_period(), move || {
            let core = Arc::clone(&status_core);
            async move {
                let mut core = core.lock().await;
                let now = core.now_ms();
                core.status_tick(now);
            }
        });

        let poll_core = Arc::clone(&core);
        tasks.spawn_periodic("poll", config.poll_period(), move || {
            let core = Arc::clone(&poll_core);
            async move {
                let mut core = core.lock().await;
                let now = core.now_ms();
                core.poll_tick(now);
            }
        });

        let control_core = Arc::clone(&core);
        tasks.spawn("control", move |shutdown| control::serve(listener, control_core, shutdown));

        info!(
            udp = %udp_addr,
            control = %control_addr,
            robot_port = config.robot_port,
            "station started"
        );

        Ok(Self {
            core,
            transport,
            tasks,
            udp_addr,
            control_addr,
        })
    }

    pub fn core(&self) -> Arc<Mutex<FleetCore>> {
        Arc::clone(&self.core)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub async fn shutdown(self) {
        info!("station shutting down");
        self.tasks.shutdown().await;

        {
            let mut core = self.core.lock().await;
            let now = core.now_ms();
            core.stop_all(now);
        }

        self.transport.close();
        info!("station stopped");
    }
}
