//! Controller samples
//!
//! [`RawSample`] is whatever the device layer hands us: loosely shaped arrays
//! from an untrusted source. [`ControllerSample::normalize`] is the only way
//! in; a sample that fails it is rejected whole.

use crate::error::FleetError;
use crate::protocol::{ButtonBits, MovementCommand};
use serde::{Deserialize, Serialize};

/// Primary stick axes carried in the movement frame
pub const PRIMARY_AXES: usize = 4;
/// Primary sticks plus two analog triggers
pub const MAX_AXES: usize = 6;
pub const MAX_BUTTONS: usize = 16;

/// Drivers routinely report a hair past full deflection
const AXIS_TOLERANCE: f32 = 0.01;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Device name as reported by the OS, used to classify new controllers
    #[serde(default)]
    pub device_name: Option<String>,
    pub axes: Vec<f32>,
    #[serde(default)]
    pub buttons: Vec<bool>,
    /// D-pad as `[x, y]`, each -1, 0 or 1
    #[serde(default)]
    pub hat: Option<[i8; 2]>,
}

/// Fixed-shape sample after validation, deadzone and trigger rescaling
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerSample {
    /// Left x, left y, right x, right y in [-1, 1]
    pub sticks: [f32; PRIMARY_AXES],
    /// Left and right trigger in [0, 1]
    pub triggers: [f32; 2],
    pub buttons: u16,
    /// D-pad folded as `x + 2y`
    pub dpad: i8,
}

impl ControllerSample {
    pub fn normalize(raw: &RawSample, deadzone: f32) -> Result<Self, FleetError> {
        if raw.axes.len() < PRIMARY_AXES {
            return Err(FleetError::InvalidSample("fewer than four axes"));
        }
        if raw.axes.len() > MAX_AXES {
            return Err(FleetError::InvalidSample("more than six axes"));
        }
        if raw.buttons.len() > MAX_BUTTONS {
            return Err(FleetError::InvalidSample("more than sixteen buttons"));
        }
        if raw
            .axes
            .iter()
            .any(|a| !a.is_finite() || a.abs() > 1.0 + AXIS_TOLERANCE)
        {
            return Err(FleetError::InvalidSample("axis outside [-1, 1]"));
        }

        let dpad = match raw.hat {
            Some([x, y]) if (-1..=1).contains(&x) && (-1..=1).contains(&y) => x + 2 * y,
            Some(_) => return Err(FleetError::InvalidSample("hat component outside [-1, 1]")),
            None => 0,
        };

        let mut sticks = [0.0; PRIMARY_AXES];
        for (out, &value) in sticks.iter_mut().zip(&raw.axes) {
            let value = value.clamp(-1.0, 1.0);
            *out = if value.abs() < deadzone { 0.0 } else { value };
        }

        // Triggers rest at -1 on every driver we have seen.
        let mut triggers = [0.0; 2];
        for (out, &value) in triggers.iter_mut().zip(raw.axes.iter().skip(PRIMARY_AXES)) {
            *out = (value.clamp(-1.0, 1.0) + 1.0) / 2.0;
        }

        let buttons = raw
            .buttons
            .iter()
            .enumerate()
            .filter(|(_, pressed)| **pressed)
            .fold(0u16, |mask, (i, _)| mask | (1 << i));

        Ok(Self {
            sticks,
            triggers,
            buttons,
            dpad,
        })
    }

    /// Anything beyond the deadzone: a stick, a trigger, a button or the d-pad
    pub fn is_active(&self, deadzone: f32) -> bool {
        self.sticks.iter().any(|a| a.abs() > deadzone)
            || self.triggers.iter().any(|t| *t > deadzone)
            || self.buttons != 0
            || self.dpad != 0
    }

    /// Any primary stick beyond the movement threshold
    pub fn is_moving(&self, threshold: f32) -> bool {
        self.sticks.iter().any(|a| a.abs() > threshold)
    }

    pub fn to_command(&self) -> MovementCommand {
        MovementCommand::from_axes(self.sticks, ButtonBits::from_button_mask(self.buttons))
    }
}
