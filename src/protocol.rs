//! Robot wire protocol
//!
//! Pure encode/decode between datagram payloads and typed messages. The byte
//! layouts must match the minibot firmware exactly:
//!
//! | Message            | Payload                                        |
//! |--------------------|------------------------------------------------|
//! | Discovery probe    | `ping`                                         |
//! | Discovery response | `pong:<identity>`                              |
//! | Movement           | 8 bytes: 4 axes, 2 neutral axes, buttons, 0x00 |
//! | Status             | `<identity>:teleop` or `<identity>:standby`    |
//! | Override set/clear | `ESTOP` / `ESTOP_OFF`                          |
//!
//! Decoding never fails: anything unrecognised becomes [`Message::Malformed`].

use crate::error::ProtocolError;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

pub const DISCOVERY_PROBE: &str = "ping";
pub const DISCOVERY_RESPONSE_PREFIX: &str = "pong:";
pub const OVERRIDE_SET: &str = "ESTOP";
pub const OVERRIDE_CLEAR: &str = "ESTOP_OFF";

pub const MOVEMENT_FRAME_LEN: usize = 8;
pub const NEUTRAL_AXIS: u8 = 127;
pub const MIN_IDENTITY_LEN: usize = 2;
pub const MAX_IDENTITY_LEN: usize = 32;
pub const MAX_TEXT_LEN: usize = 64;

// The firmware classifies any 8-byte datagram as a movement frame.
const_assert_eq!(MOVEMENT_FRAME_LEN, 8);
const_assert_eq!(NEUTRAL_AXIS, 127);

pub type TextBuffer = ArrayString<MAX_TEXT_LEN>;
pub type MovementFrame = [u8; MOVEMENT_FRAME_LEN];

/// Global operating mode sent to connected robots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FleetMode {
    #[default]
    Standby,
    Active,
}

impl FleetMode {
    /// Mode name as the firmware spells it
    pub fn wire_name(self) -> &'static str {
        match self {
            FleetMode::Standby => "standby",
            FleetMode::Active => "teleop",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "standby" => Some(FleetMode::Standby),
            "teleop" => Some(FleetMode::Active),
            _ => None,
        }
    }
}

/// Four logical buttons carried in byte 6 of the movement frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ButtonBits(pub u8);

impl ButtonBits {
    pub const NONE: ButtonBits = ButtonBits(0);
    pub const CROSS: u8 = 0x01;
    pub const CIRCLE: u8 = 0x02;
    pub const SQUARE: u8 = 0x04;
    pub const TRIANGLE: u8 = 0x08;
    const MASK: u8 = 0x0F;

    /// Keep the first four bits of a controller button mask
    pub fn from_button_mask(mask: u16) -> Self {
        ButtonBits((mask as u8) & Self::MASK)
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 & Self::MASK == 0
    }
}

/// Map a signed unit axis onto the wire byte range.
///
/// `-1.0 -> 0`, `0.0 -> 127`, `1.0 -> 255`. Non-finite input is centered.
pub fn axis_to_byte(axis: f32) -> u8 {
    if !axis.is_finite() {
        return NEUTRAL_AXIS;
    }
    let scaled = ((axis + 1.0) * 127.5).floor();
    scaled.clamp(0.0, 255.0) as u8
}

/// Inverse of [`axis_to_byte`]. Stick positions are only recovered to within one byte step.
pub fn byte_to_axis(byte: u8) -> f32 {
    (f32::from(byte) / 127.5 - 1.0).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCommand {
    pub axes: [u8; 4],
    pub buttons: ButtonBits,
}

impl MovementCommand {
    pub const STOP: MovementCommand = MovementCommand {
        axes: [NEUTRAL_AXIS; 4],
        buttons: ButtonBits::NONE,
    };

    pub fn from_axes(axes: [f32; 4], buttons: ButtonBits) -> Self {
        Self {
            axes: axes.map(axis_to_byte),
            buttons,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.axes == [NEUTRAL_AXIS; 4] && self.buttons.is_empty()
    }

    pub fn encode(&self) -> MovementFrame {
        [
            self.axes[0],
            self.axes[1],
            self.axes[2],
            self.axes[3],
            NEUTRAL_AXIS,
            NEUTRAL_AXIS,
            self.buttons.0,
            0,
        ]
    }
}

/// Every datagram shape either side of the link can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    DiscoveryProbe,
    DiscoveryResponse { identity: String },
    Movement(MovementCommand),
    Status { identity: String, mode: FleetMode },
    OverrideSet,
    OverrideClear,
    Malformed,
}

/// Check a robot identity can be carried in every text message.
///
/// Single-character identities are refused: `<id>:teleop` would then be exactly
/// eight bytes, which the firmware reads as a movement frame.
pub fn validate_identity(identity: &str) -> Result<(), ProtocolError> {
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(ProtocolError::IdentityTooLong { max: MAX_IDENTITY_LEN });
    }
    if identity.len() < MIN_IDENTITY_LEN
        || identity.contains(':')
        || identity.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(ProtocolError::InvalidIdentity);
    }
    Ok(())
}

pub fn encode_status(identity: &str, mode: FleetMode) -> Result<TextBuffer, ProtocolError> {
    validate_identity(identity)?;
    let mut text = TextBuffer::new();
    text.push_str(identity);
    text.push(':');
    text.push_str(mode.wire_name());
    Ok(text)
}

pub fn encode_discovery_response(identity: &str) -> Result<TextBuffer, ProtocolError> {
    validate_identity(identity)?;
    let mut text = TextBuffer::new();
    text.push_str(DISCOVERY_RESPONSE_PREFIX);
    text.push_str(identity);
    Ok(text)
}

pub fn encode_override(active: bool) -> &'static [u8] {
    if active {
        OVERRIDE_SET.as_bytes()
    } else {
        OVERRIDE_CLEAR.as_bytes()
    }
}

/// Classify an inbound payload. Total: never panics, never errors.
pub fn decode(payload: &[u8]) -> Message {
    if let Ok(text) = core::str::from_utf8(payload) {
        if let Some(message) = decode_text(text) {
            return message;
        }
    }

    if payload.len() == MOVEMENT_FRAME_LEN && payload[7] == 0 {
        return Message::Movement(MovementCommand {
            axes: [payload[0], payload[1], payload[2], payload[3]],
            buttons: ButtonBits(payload[6]),
        });
    }

    Message::Malformed
}

fn decode_text(text: &str) -> Option<Message> {
    match text {
        DISCOVERY_PROBE => return Some(Message::DiscoveryProbe),
        OVERRIDE_SET => return Some(Message::OverrideSet),
        OVERRIDE_CLEAR => return Some(Message::OverrideClear),
        _ => {}
    }

    if let Some(identity) = text.strip_prefix(DISCOVERY_RESPONSE_PREFIX) {
        return validate_identity(identity)
            .ok()
            .map(|()| Message::DiscoveryResponse {
                identity: identity.to_string(),
            });
    }

    let (identity, mode) = text.split_once(':')?;
    let mode = FleetMode::from_wire(mode)?;
    validate_identity(identity).ok()?;
    Some(Message::Status {
        identity: identity.to_string(),
        mode,
    })
}
