//! Input pipeline
//!
//! Owns the controller registry and the controller side of every pairing.
//! The robot side lives in the lifecycle manager; the fleet core keeps both
//! sides in step. This module never touches the transport: [`InputPipeline::poll`]
//! only says which robot should get which frame.

mod sample;

pub use sample::{ControllerSample, RawSample, MAX_AXES, MAX_BUTTONS, PRIMARY_AXES};

use crate::config::DispatchPolicy;
use crate::error::{FleetError, Result};
use crate::protocol::MovementCommand;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Controller family, derived from the device name on first sight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    PlayStation,
    Xbox,
    Nintendo,
    Generic,
}

impl DeviceClass {
    pub fn from_device_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if any(&["playstation", "ps4", "ps5", "dualsense", "dualshock", "sony"]) {
            DeviceClass::PlayStation
        } else if any(&["xbox", "x-box"]) {
            DeviceClass::Xbox
        } else if any(&["nintendo", "switch", "joy-con", "pro controller"]) {
            DeviceClass::Nintendo
        } else {
            DeviceClass::Generic
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceClass::PlayStation => "PlayStation",
            DeviceClass::Xbox => "Xbox",
            DeviceClass::Nintendo => "Nintendo",
            DeviceClass::Generic => "Controller",
        }
    }
}

#[derive(Debug, Clone)]
struct Controller {
    id: String,
    class: DeviceClass,
    ordinal: u32,
    enabled: bool,
    paired_robot: Option<String>,
    sample: ControllerSample,
    active: bool,
    last_activity: u64,
    /// Sticks were past the movement threshold on the previous tick
    moving: bool,
}

impl Controller {
    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            id: self.id.clone(),
            class: self.class,
            ordinal: self.ordinal,
            display_name: format!("{} {}", self.class.label(), self.ordinal),
            enabled: self.enabled,
            paired_robot: self.paired_robot.clone(),
            active: self.active,
            sample: self.sample,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub id: String,
    pub class: DeviceClass,
    pub ordinal: u32,
    pub display_name: String,
    pub enabled: bool,
    pub paired_robot: Option<String>,
    pub active: bool,
    pub sample: ControllerSample,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// First sample from this controller
    pub created: bool,
    pub activity_changed: bool,
}

/// Pairing changes the caller has to mirror on the robot side
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairOutcome {
    /// Robot the controller drove before, if different
    pub previous_robot: Option<String>,
    /// Controller that drove the target robot before, now unpaired
    pub displaced_controller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub controller: String,
    pub robot: String,
    pub command: MovementCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub dispatches: Vec<Dispatch>,
    pub activity_changed: bool,
}

pub struct InputPipeline {
    controllers: HashMap<String, Controller>,
    next_ordinal: HashMap<DeviceClass, u32>,
    deadzone: f32,
    movement_threshold: f32,
    activity_window_ms: u64,
}

impl InputPipeline {
    pub fn new(deadzone: f32, movement_threshold: f32, activity_window_ms: u64) -> Self {
        Self {
            controllers: HashMap::new(),
            next_ordinal: HashMap::new(),
            deadzone,
            movement_threshold,
            activity_window_ms,
        }
    }

    /// Store a sample, registering the controller on first sight.
    ///
    /// Invalid samples are rejected before any state changes, including
    /// registration.
    pub fn ingest_sample(&mut self, id: &str, raw: &RawSample, now: u64) -> Result<IngestOutcome> {
        let sample = ControllerSample::normalize(raw, self.deadzone).map_err(|e| {
            debug!(controller = id, error = %e, "sample rejected");
            e
        })?;

        let mut outcome = IngestOutcome::default();
        if !self.controllers.contains_key(id) {
            let class = raw
                .device_name
                .as_deref()
                .map(DeviceClass::from_device_name)
                .unwrap_or(DeviceClass::Generic);
            let ordinal = self.assign_ordinal(class);
            info!(controller = id, ?class, ordinal, "controller registered");
            self.controllers.insert(
                id.to_string(),
                Controller {
                    id: id.to_string(),
                    class,
                    ordinal,
                    enabled: true,
                    paired_robot: None,
                    sample,
                    active: false,
                    last_activity: now,
                    moving: false,
                },
            );
            outcome.created = true;
        }

        let deadzone = self.deadzone;
        let controller = self
            .controllers
            .get_mut(id)
            .ok_or_else(|| FleetError::ControllerNotFound(id.to_string()))?;
        controller.sample = sample;
        if sample.is_active(deadzone) {
            outcome.activity_changed = !controller.active;
            controller.active = true;
            controller.last_activity = now;
        }
        Ok(outcome)
    }

    /// Ordinals count up per class and are never handed out twice
    fn assign_ordinal(&mut self, class: DeviceClass) -> u32 {
        let next = self.next_ordinal.entry(class).or_insert(1);
        let ordinal = *next;
        *next += 1;
        ordinal
    }

    pub fn remove_controller(&mut self, id: &str) -> Result<ControllerSnapshot> {
        let controller = self
            .controllers
            .remove(id)
            .ok_or_else(|| FleetError::ControllerNotFound(id.to_string()))?;
        info!(controller = id, robot = ?controller.paired_robot, "controller removed");
        Ok(controller.snapshot())
    }

    /// Bind a controller to a robot, clearing any earlier pairing on either side
    pub fn pair(&mut self, id: &str, robot: &str) -> Result<PairOutcome> {
        if !self.controllers.contains_key(id) {
            warn!(controller = id, robot, "pair failed: unknown controller");
            return Err(FleetError::ControllerNotFound(id.to_string()));
        }

        let displaced_controller = self.unpair_robot(robot).filter(|c| c != id);

        let controller = self
            .controllers
            .get_mut(id)
            .ok_or_else(|| FleetError::ControllerNotFound(id.to_string()))?;
        let previous_robot = controller
            .paired_robot
            .replace(robot.to_string())
            .filter(|r| r != robot);
        controller.moving = false;

        info!(controller = id, robot, "controller paired");
        Ok(PairOutcome {
            previous_robot,
            displaced_controller,
        })
    }

    /// Clear a controller's pairing. Returns the robot it drove.
    pub fn unpair(&mut self, id: &str) -> Result<Option<String>> {
        let controller = self
            .controllers
            .get_mut(id)
            .ok_or_else(|| FleetError::ControllerNotFound(id.to_string()))?;
        controller.moving = false;
        let robot = controller.paired_robot.take();
        if let Some(robot) = &robot {
            info!(controller = id, robot = %robot, "controller unpaired");
        }
        Ok(robot)
    }

    /// Clear whichever controller drives `robot`. Returns that controller.
    pub fn unpair_robot(&mut self, robot: &str) -> Option<String> {
        let controller = self
            .controllers
            .values_mut()
            .find(|c| c.paired_robot.as_deref() == Some(robot))?;
        controller.paired_robot = None;
        controller.moving = false;
        debug!(controller = %controller.id, robot, "pairing cleared from robot side");
        Some(controller.id.clone())
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<ControllerSnapshot> {
        let controller = self
            .controllers
            .get_mut(id)
            .ok_or_else(|| FleetError::ControllerNotFound(id.to_string()))?;
        controller.enabled = enabled;
        controller.moving = false;
        info!(controller = id, enabled, "controller enable state changed");
        Ok(controller.snapshot())
    }

    /// One poll tick.
    ///
    /// Expires stale activity flags, then yields one frame per enabled, paired
    /// controller. Under [`DispatchPolicy::Continuous`] centered sticks still
    /// produce a frame; under [`DispatchPolicy::OnMovement`] only moving sticks
    /// do, plus a single stop when they settle.
    pub fn poll(&mut self, now: u64, policy: DispatchPolicy) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        let mut ids: Vec<&String> = self.controllers.keys().collect();
        ids.sort();
        let ids: Vec<String> = ids.into_iter().cloned().collect();

        for id in ids {
            let Some(controller) = self.controllers.get_mut(&id) else {
                continue;
            };

            if controller.active && now.saturating_sub(controller.last_activity) > self.activity_window_ms {
                controller.active = false;
                outcome.activity_changed = true;
            }

            if !controller.enabled {
                continue;
            }
            let Some(robot) = controller.paired_robot.clone() else {
                continue;
            };

            let moving = controller.sample.is_moving(self.movement_threshold);
            let command = match policy {
                DispatchPolicy::Continuous => Some(controller.sample.to_command()),
                DispatchPolicy::OnMovement if moving => Some(controller.sample.to_command()),
                DispatchPolicy::OnMovement if controller.moving => Some(MovementCommand::STOP),
                DispatchPolicy::OnMovement => None,
            };
            controller.moving = moving;

            if let Some(command) = command {
                outcome.dispatches.push(Dispatch {
                    controller: id,
                    robot,
                    command,
                });
            }
        }
        outcome
    }

    pub fn controller(&self, id: &str) -> Option<ControllerSnapshot> {
        self.controllers.get(id).map(Controller::snapshot)
    }

    /// Controllers ordered by class, then ordinal
    pub fn controllers(&self) -> Vec<ControllerSnapshot> {
        let mut all: Vec<ControllerSnapshot> =
            self.controllers.values().map(Controller::snapshot).collect();
        all.sort_by(|a, b| {
            a.class
                .label()
                .cmp(b.class.label())
                .then(a.ordinal.cmp(&b.ordinal))
        });
        all
    }

    pub fn paired_robot(&self, id: &str) -> Option<String> {
        self.controllers.get(id).and_then(|c| c.paired_robot.clone())
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
