//! # Robofleet
//!
//! Communication and control core for a small fleet of UDP-connected minibots
//! driven from one operator station.
//!
//! ## Features
//!
//! - **Discovery**: broadcast `ping`, robots answer `pong:<id>`
//! - **Lifecycle**: discovered and connected buckets with timeout eviction
//! - **Input pipeline**: controller registry, pairing and a fixed-rate poll
//! - **Emergency override**: fleet-wide `ESTOP` that beats every other state
//!
//! ## Quick Start
//!
//! ```rust
//! use robofleet::{FleetConfig, FleetCore, MockTransport};
//! use std::sync::Arc;
//!
//! let transport = MockTransport::new();
//! let mut core = FleetCore::new(Arc::new(transport.clone()), &FleetConfig::default());
//!
//! core.discovery_tick();
//! assert_eq!(transport.broadcasts(), vec![b"ping".to_vec()]);
//! ```
//!
//! ## Architecture
//!
//! - [`transport`] - datagram sockets behind the [`Transport`] trait
//! - [`protocol`] - byte-exact codec for the minibot firmware
//! - [`lifecycle`] - robot registry, discovery, sweep and status loop bodies
//! - [`safety`] - emergency override state and its broadcast
//! - [`input`] - controller registry, normalisation and pairing
//! - [`fleet`] - the core that ties them together
//! - [`minibot`] - simulated robot for bench runs
//! - [`station`] - tokio runtime: sockets, periodic tasks, control server

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod fleet;
pub mod input;
pub mod lifecycle;
pub mod minibot;
pub mod protocol;
pub mod safety;
pub mod scheduler;
pub mod station;
pub mod transport;

pub use config::{DispatchPolicy, FleetConfig};
pub use error::{FleetError, Result};
pub use events::{EventBus, FleetEvent};
pub use fleet::FleetCore;
pub use protocol::{FleetMode, MovementCommand};
pub use station::Station;
pub use transport::{MockTransport, Transport, UdpTransport};
