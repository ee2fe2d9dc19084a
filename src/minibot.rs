//! Simulated minibot
//!
//! Robot-side half of the wire contract, for bench runs without hardware and
//! for end-to-end tests. Mirrors the firmware's quirks:
//!
//! - any 8-byte datagram is a movement frame, checked before text
//! - `ping` is answered once; after that the robot considers itself connected
//! - movement only takes effect in teleop
//!
//! ESTOP handling is the simulator's own: while set, frames are ignored and
//! the sticks are held centered.

use crate::error::ProtocolError;
use crate::protocol::{
    encode_discovery_response, validate_identity, ButtonBits, FleetMode, TextBuffer,
    DISCOVERY_PROBE, MOVEMENT_FRAME_LEN, NEUTRAL_AXIS, OVERRIDE_CLEAR, OVERRIDE_SET,
};
use crate::scheduler::{wait_for_shutdown, ShutdownSignal};
use crate::transport::MAX_DATAGRAM_SIZE;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    #[default]
    Unknown,
    Standby,
    Teleop,
}

impl From<FleetMode> for RobotStatus {
    fn from(mode: FleetMode) -> Self {
        match mode {
            FleetMode::Standby => RobotStatus::Standby,
            FleetMode::Active => RobotStatus::Teleop,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinibotState {
    pub id: String,
    pub connected: bool,
    pub status: RobotStatus,
    pub estopped: bool,
    pub axes: [u8; 4],
    pub buttons: ButtonBits,
    pub frames_applied: u32,
    pub frames_ignored: u32,
}

impl MinibotState {
    pub fn new(id: &str) -> Result<Self, ProtocolError> {
        validate_identity(id)?;
        Ok(Self {
            id: id.to_string(),
            connected: false,
            status: RobotStatus::Unknown,
            estopped: false,
            axes: [NEUTRAL_AXIS; 4],
            buttons: ButtonBits::NONE,
            frames_applied: 0,
            frames_ignored: 0,
        })
    }

    /// Apply one datagram. Returns the reply to send back, if any.
    pub fn handle(&mut self, payload: &[u8]) -> Option<TextBuffer> {
        if payload.len() == MOVEMENT_FRAME_LEN {
            self.apply_frame(payload);
            return None;
        }

        let text = core::str::from_utf8(payload).ok()?;
        match text {
            DISCOVERY_PROBE if !self.connected => {
                self.connected = true;
                info!(robot = %self.id, "answering discovery probe");
                return encode_discovery_response(&self.id).ok();
            }
            DISCOVERY_PROBE => trace!(robot = %self.id, "probe ignored: already connected"),
            OVERRIDE_SET => {
                if !self.estopped {
                    warn!(robot = %self.id, "ESTOP received");
                }
                self.estopped = true;
                self.axes = [NEUTRAL_AXIS; 4];
                self.buttons = ButtonBits::NONE;
            }
            OVERRIDE_CLEAR => {
                if self.estopped {
                    info!(robot = %self.id, "ESTOP released");
                }
                self.estopped = false;
            }
            _ => self.apply_status(text),
        }
        None
    }

    fn apply_frame(&mut self, frame: &[u8]) {
        if self.status != RobotStatus::Teleop || self.estopped {
            self.frames_ignored = self.frames_ignored.saturating_add(1);
            return;
        }
        self.axes.copy_from_slice(&frame[..4]);
        self.buttons = ButtonBits::from_button_mask(u16::from(frame[6]));
        self.frames_applied = self.frames_applied.saturating_add(1);
    }

    fn apply_status(&mut self, text: &str) {
        let Some(mode) = text
            .strip_prefix(self.id.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
        else {
            return;
        };
        let status = FleetMode::from_wire(mode).map_or(RobotStatus::Unknown, RobotStatus::from);
        if status != self.status {
            info!(robot = %self.id, ?status, "status changed");
        }
        self.status = status;
    }
}

/// Runs a [`MinibotState`] on a UDP socket until shutdown
pub struct MinibotSim {
    socket: UdpSocket,
    state: MinibotState,
}

impl MinibotSim {
    pub fn new(socket: UdpSocket, state: MinibotState) -> Self {
        Self { socket, state }
    }

    pub fn state(&self) -> &MinibotState {
        &self.state
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> MinibotState {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((len, source)) => {
                        if let Some(reply) = self.state.handle(&buffer[..len]) {
                            if let Err(e) = self.socket.send_to(reply.as_bytes(), source).await {
                                warn!(%source, error = %e, "reply not sent");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "receive error"),
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        debug!(robot = %self.state.id, "simulator stopped");
        self.state
    }
}
