//! Fleet event bus
//!
//! Observers (the control surface, the operator console, tests) subscribe to a
//! broadcast channel. A slow or dropped observer only loses its own events; it
//! can never stall or abort the loop that published them.

use crate::input::ControllerSnapshot;
use crate::lifecycle::RobotSnapshot;
use crate::protocol::FleetMode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

pub const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Operator,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    RobotDiscovered { robot: RobotSnapshot },
    RobotUpdated { robot: RobotSnapshot },
    RobotConnected { robot: RobotSnapshot },
    RobotDisconnected { id: String, reason: DisconnectReason },
    RobotReceivingChanged { id: String, receiving: bool },
    RobotEnabledChanged { id: String, enabled: bool },
    OverrideChanged { active: bool },
    FleetModeChanged { mode: FleetMode },
    ControllerSetChanged { controllers: Vec<ControllerSnapshot> },
    /// An operator asked for an immediate discovery probe
    RobotsRefreshing { timestamp_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber. Having none is normal.
    pub fn publish(&self, event: FleetEvent) {
        if self.tx.send(event).is_err() {
            trace!("fleet event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
