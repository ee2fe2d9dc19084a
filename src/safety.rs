use crate::error::FleetError;
use crate::protocol::{encode_override, OVERRIDE_CLEAR, OVERRIDE_SET};
use crate::transport::Transport;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const MAX_OVERRIDE_HISTORY: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub active: bool,
    pub timestamp: u64,
    pub attempts: u8,
    pub delivered: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideState {
    pub active: bool,
    pub activation_count: u32,
    pub last_change_ms: u64,
    /// Last broadcast of the current state never reached the socket
    pub undelivered: bool,
}

/// Fleet-wide emergency stop.
///
/// The flag flips before anything is sent, so movement suppression never
/// depends on the broadcast getting out. The broadcast goes to the subnet
/// broadcast address so robots missing from every registry still hear it.
#[derive(Debug)]
pub struct EmergencyOverride {
    state: OverrideState,
    history: Vec<OverrideRecord, MAX_OVERRIDE_HISTORY>,
    max_attempts: u8,
}

impl EmergencyOverride {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            state: OverrideState::default(),
            history: Vec::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Set or clear the override and broadcast it, retrying up to the
    /// configured attempt count. Returns the attempts used.
    pub fn apply(
        &mut self,
        active: bool,
        current_time: u64,
        transport: &dyn Transport,
        port: u16,
    ) -> Result<u8, FleetError> {
        if self.state.active != active {
            self.state.active = active;
            self.state.last_change_ms = current_time;
            if active {
                self.state.activation_count = self.state.activation_count.saturating_add(1);
            }
        }

        let (attempts, delivered) = self.broadcast(active, transport, port);
        self.state.undelivered = !delivered;
        self.record(active, current_time, attempts, delivered);

        if delivered {
            if active {
                warn!(attempts, "emergency override ACTIVATED");
            } else {
                info!(attempts, "emergency override released");
            }
            Ok(attempts)
        } else {
            error!(
                attempts,
                message = if active { OVERRIDE_SET } else { OVERRIDE_CLEAR },
                "emergency override broadcast NOT delivered"
            );
            Err(FleetError::OverrideNotDelivered { attempts })
        }
    }

    /// Re-broadcast ESTOP while the override holds. Called from the status loop.
    pub fn reassert(&mut self, current_time: u64, transport: &dyn Transport, port: u16) {
        if !self.state.active {
            return;
        }
        let (attempts, delivered) = self.broadcast(true, transport, port);
        // History only notes delivery failing or recovering, not every tick.
        let previously_delivered = !self.state.undelivered;
        if delivered != previously_delivered {
            self.record(true, current_time, attempts, delivered);
        }
        self.state.undelivered = !delivered;
        if !delivered {
            error!(attempts, "emergency override reassertion failed");
        }
    }

    fn broadcast(&self, active: bool, transport: &dyn Transport, port: u16) -> (u8, bool) {
        let payload = encode_override(active);
        for attempt in 1..=self.max_attempts {
            match transport.send_broadcast(port, payload) {
                Ok(()) => return (attempt, true),
                Err(e) => warn!(attempt, error = %e, "override broadcast attempt failed"),
            }
        }
        (self.max_attempts, false)
    }

    fn record(&mut self, active: bool, timestamp: u64, attempts: u8, delivered: bool) {
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(OverrideRecord {
            active,
            timestamp,
            attempts,
            delivered,
        });
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn get_state(&self) -> &OverrideState {
        &self.state
    }

    pub fn get_history(&self) -> &[OverrideRecord] {
        &self.history
    }
}
