//! Robot lifecycle manager
//!
//! Owns the robot registry and every datagram the station sends to robots.
//!
//! ```text
//! Unknown --(pong)--> Discovered --(connect)--> Connected
//! Discovered --(sweep: age > discovered timeout)--> evicted
//! Connected  --(disconnect)--> evicted
//! Connected  --(sweep: age > connected timeout, if configured)--> evicted
//! ```
//!
//! An identity lives in exactly one of the two bucket maps. All times are
//! milliseconds on the station's monotonic clock, passed in by the caller.

use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::events::{DisconnectReason, EventBus, FleetEvent};
use crate::protocol::{
    encode_status, validate_identity, FleetMode, MovementCommand, MovementFrame, DISCOVERY_PROBE,
};
use crate::safety::{EmergencyOverride, OverrideState};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleBucket {
    Discovered,
    Connected,
}

#[derive(Debug, Clone)]
struct Robot {
    id: String,
    address: IpAddr,
    bucket: LifecycleBucket,
    last_seen: u64,
    last_command: Option<u64>,
    paired_controller: Option<String>,
    enabled: bool,
    receiving: bool,
    last_frame: Option<MovementFrame>,
}

impl Robot {
    fn discovered(id: &str, address: IpAddr, now: u64) -> Self {
        Self {
            id: id.to_string(),
            address,
            bucket: LifecycleBucket::Discovered,
            last_seen: now,
            last_command: None,
            paired_controller: None,
            enabled: true,
            receiving: false,
            last_frame: None,
        }
    }

    fn snapshot(&self) -> RobotSnapshot {
        RobotSnapshot {
            id: self.id.clone(),
            address: self.address,
            bucket: self.bucket,
            last_seen_ms: self.last_seen,
            last_command_ms: self.last_command,
            paired_controller: self.paired_controller.clone(),
            enabled: self.enabled,
            receiving: self.receiving,
            last_frame: self.last_frame.map(|f| f.to_vec()).unwrap_or_default(),
        }
    }
}

/// Read-only copy of a registry entry handed to collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub id: String,
    pub address: IpAddr,
    pub bucket: LifecycleBucket,
    pub last_seen_ms: u64,
    pub last_command_ms: Option<u64>,
    pub paired_controller: Option<String>,
    pub enabled: bool,
    pub receiving: bool,
    #[serde(with = "serde_bytes")]
    pub last_frame: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinkStats {
    pub probes_sent: u32,
    pub status_sent: u32,
    pub frames_sent: u32,
    pub send_failures: u32,
}

pub struct LifecycleManager {
    transport: Arc<dyn Transport>,
    events: EventBus,
    discovered: HashMap<String, Robot>,
    connected: HashMap<String, Robot>,
    fleet_mode: FleetMode,
    emergency: EmergencyOverride,
    robot_port: u16,
    discovered_timeout_ms: u64,
    connected_timeout_ms: Option<u64>,
    stats: LinkStats,
}

impl LifecycleManager {
    pub fn new(transport: Arc<dyn Transport>, events: EventBus, config: &FleetConfig) -> Self {
        Self {
            transport,
            events,
            discovered: HashMap::new(),
            connected: HashMap::new(),
            fleet_mode: FleetMode::Standby,
            emergency: EmergencyOverride::new(config.override_attempts),
            robot_port: config.robot_port,
            discovered_timeout_ms: config.discovered_timeout_ms,
            connected_timeout_ms: config.connected_timeout_ms,
            stats: LinkStats::default(),
        }
    }

    /// Record a `pong:<identity>` from `address`.
    ///
    /// Connected robots only get their address and last-seen refreshed; anything
    /// else lands in (or is refreshed in) the discovered bucket.
    pub fn on_discovery_response(&mut self, identity: &str, address: IpAddr, now: u64) {
        if validate_identity(identity).is_err() {
            trace!(identity, "ignoring discovery response with unusable identity");
            return;
        }

        let bucket = if self.connected.contains_key(identity) {
            &mut self.connected
        } else {
            &mut self.discovered
        };

        match bucket.get_mut(identity) {
            Some(robot) => {
                let moved = robot.address != address;
                robot.address = address;
                robot.last_seen = now;
                if moved {
                    info!(robot = identity, %address, "robot address changed");
                    let snapshot = robot.snapshot();
                    self.events.publish(FleetEvent::RobotUpdated { robot: snapshot });
                }
            }
            None => {
                let robot = Robot::discovered(identity, address, now);
                let snapshot = robot.snapshot();
                self.discovered.insert(identity.to_string(), robot);
                info!(robot = identity, %address, "discovered new robot");
                self.events.publish(FleetEvent::RobotDiscovered { robot: snapshot });
            }
        }
    }

    /// Promote a discovered robot, refresh its last-seen time and tell it the
    /// current fleet mode.
    /// Connecting an already connected robot changes nothing.
    pub fn connect(&mut self, id: &str, now: u64) -> Result<RobotSnapshot> {
        if let Some(robot) = self.connected.get(id) {
            debug!(robot = id, "connect ignored: already connected");
            return Ok(robot.snapshot());
        }

        let Some(mut robot) = self.discovered.remove(id) else {
            warn!(robot = id, "connect failed: robot not found");
            return Err(FleetError::RobotNotFound(id.to_string()));
        };

        robot.bucket = LifecycleBucket::Connected;
        robot.last_seen = robot.last_seen.max(now);
        let address = robot.address;
        self.connected.insert(id.to_string(), robot);
        info!(robot = id, %address, "robot connected");

        self.send_status(id, address, self.fleet_mode);

        let snapshot = self.snapshot_of(id)?;
        self.events.publish(FleetEvent::RobotConnected {
            robot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Remove a robot from the registry. Connected robots get a stop frame first.
    /// Returns the removed entry so the caller can unwind its pairing.
    pub fn disconnect(&mut self, id: &str, now: u64) -> Result<RobotSnapshot> {
        if self.connected.contains_key(id) {
            if let Err(e) = self.send_stop(id, now) {
                warn!(robot = id, error = %e, "stop before disconnect not delivered");
            }
        }

        let robot = match self.connected.remove(id) {
            Some(robot) => robot,
            None => self.discovered.remove(id).ok_or_else(|| {
                warn!(robot = id, "disconnect failed: robot not found");
                FleetError::RobotNotFound(id.to_string())
            })?,
        };

        info!(robot = id, "robot disconnected by operator");
        self.events.publish(FleetEvent::RobotDisconnected {
            id: id.to_string(),
            reason: DisconnectReason::Operator,
        });
        Ok(robot.snapshot())
    }

    /// Encode and send one movement frame.
    ///
    /// Stop frames always go out. Anything else is refused while the override
    /// holds or the robot is disabled.
    pub fn send_movement(&mut self, id: &str, command: MovementCommand, now: u64) -> Result<()> {
        let Some(robot) = self.connected.get(id).or_else(|| self.discovered.get(id)) else {
            warn!(robot = id, "movement for unknown robot dropped");
            return Err(FleetError::RobotNotFound(id.to_string()));
        };

        if !command.is_stop() {
            if self.emergency.is_active() {
                return Err(FleetError::OverrideActive);
            }
            if !robot.enabled {
                return Err(FleetError::RobotDisabled(id.to_string()));
            }
        }

        let address = robot.address;
        let frame = command.encode();
        if let Err(e) = self.transport.send_unicast(address, self.robot_port, &frame) {
            self.stats.send_failures = self.stats.send_failures.saturating_add(1);
            warn!(robot = id, %address, error = %e, "movement frame dropped");
            return Err(e.into());
        }
        self.stats.frames_sent = self.stats.frames_sent.saturating_add(1);

        let receiving = !command.is_stop();
        let changed = match self.robot_mut(id) {
            Some(robot) => {
                robot.last_command = Some(now);
                robot.last_frame = Some(frame);
                let changed = robot.receiving != receiving;
                robot.receiving = receiving;
                changed
            }
            None => false,
        };
        if changed {
            self.events.publish(FleetEvent::RobotReceivingChanged {
                id: id.to_string(),
                receiving,
            });
        }
        Ok(())
    }

    pub fn send_stop(&mut self, id: &str, now: u64) -> Result<()> {
        self.send_movement(id, MovementCommand::STOP, now)
    }

    /// Disabling sends a stop and refuses further movement until re-enabled
    pub fn set_enabled(&mut self, id: &str, enabled: bool, now: u64) -> Result<RobotSnapshot> {
        let robot = self
            .robot_mut(id)
            .ok_or_else(|| FleetError::RobotNotFound(id.to_string()))?;
        let changed = robot.enabled != enabled;
        robot.enabled = enabled;

        if !enabled {
            if let Err(e) = self.send_stop(id, now) {
                warn!(robot = id, error = %e, "stop on disable not delivered");
            }
        }
        if changed {
            info!(robot = id, enabled, "robot enable state changed");
            self.events.publish(FleetEvent::RobotEnabledChanged {
                id: id.to_string(),
                enabled,
            });
        }
        self.snapshot_of(id)
    }

    /// Switch the fleet mode and push it to every connected robot at once.
    /// Standby also stops every connected robot.
    pub fn set_fleet_mode(&mut self, mode: FleetMode, now: u64) {
        let changed = self.fleet_mode != mode;
        self.fleet_mode = mode;
        info!(mode = mode.wire_name(), "fleet mode set");

        self.broadcast_status(now);
        if mode == FleetMode::Standby {
            self.stop_all(now);
        }
        if changed {
            self.events.publish(FleetEvent::FleetModeChanged { mode });
        }
    }

    pub fn fleet_mode(&self) -> FleetMode {
        self.fleet_mode
    }

    /// Set or clear the emergency override. The broadcast goes out on every
    /// call; an undeliverable ESTOP is returned as an error, never swallowed.
    pub fn set_override(&mut self, active: bool, now: u64) -> Result<()> {
        let changed = self.emergency.is_active() != active;
        let result = self
            .emergency
            .apply(active, now, self.transport.as_ref(), self.robot_port);

        if active {
            let mut stopped = Vec::new();
            for robot in self.connected.values_mut() {
                if robot.receiving {
                    robot.receiving = false;
                    stopped.push(robot.id.clone());
                }
            }
            for id in stopped {
                self.events.publish(FleetEvent::RobotReceivingChanged { id, receiving: false });
            }
        }
        if changed {
            self.events.publish(FleetEvent::OverrideChanged { active });
        }
        result.map(|_| ())
    }

    pub fn override_active(&self) -> bool {
        self.emergency.is_active()
    }

    pub fn override_state(&self) -> &OverrideState {
        self.emergency.get_state()
    }

    pub fn emergency(&self) -> &EmergencyOverride {
        &self.emergency
    }

    /// Discovery loop body: one broadcast probe
    pub fn probe(&mut self) {
        match self
            .transport
            .send_broadcast(self.robot_port, DISCOVERY_PROBE.as_bytes())
        {
            Ok(()) => {
                self.stats.probes_sent = self.stats.probes_sent.saturating_add(1);
                trace!("discovery probe sent");
            }
            Err(e) => {
                self.stats.send_failures = self.stats.send_failures.saturating_add(1);
                warn!(error = %e, "discovery probe dropped");
            }
        }
    }

    /// Timeout sweep body. Evicts stale robots from both buckets and publishes
    /// one disconnect event per eviction.
    pub fn sweep(&mut self, now: u64) -> Vec<RobotSnapshot> {
        let discovered_timeout = self.discovered_timeout_ms;
        let mut evicted = Self::evict_stale(&mut self.discovered, now, Some(discovered_timeout));
        evicted.extend(Self::evict_stale(&mut self.connected, now, self.connected_timeout_ms));

        for robot in &evicted {
            warn!(
                robot = %robot.id,
                bucket = ?robot.bucket,
                silent_ms = now.saturating_sub(robot.last_seen_ms),
                paired = ?robot.paired_controller,
                "robot timed out"
            );
            if robot.receiving {
                self.events.publish(FleetEvent::RobotReceivingChanged {
                    id: robot.id.clone(),
                    receiving: false,
                });
            }
            self.events.publish(FleetEvent::RobotDisconnected {
                id: robot.id.clone(),
                reason: DisconnectReason::Timeout,
            });
        }
        evicted
    }

    fn evict_stale(
        bucket: &mut HashMap<String, Robot>,
        now: u64,
        timeout_ms: Option<u64>,
    ) -> Vec<RobotSnapshot> {
        let Some(timeout_ms) = timeout_ms else {
            return Vec::new();
        };
        let stale: Vec<String> = bucket
            .values()
            .filter(|robot| now.saturating_sub(robot.last_seen) > timeout_ms)
            .map(|robot| robot.id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| bucket.remove(id))
            .map(|robot| robot.snapshot())
            .collect()
    }

    /// Status loop body: current mode to every connected robot, plus ESTOP
    /// while the override holds
    pub fn broadcast_status(&mut self, now: u64) {
        let targets: Vec<(String, IpAddr)> = self
            .connected
            .values()
            .map(|robot| (robot.id.clone(), robot.address))
            .collect();
        for (id, address) in targets {
            self.send_status(&id, address, self.fleet_mode);
        }
        self.emergency
            .reassert(now, self.transport.as_ref(), self.robot_port);
    }

    /// Best-effort stop frame to every connected robot
    pub fn stop_all(&mut self, now: u64) {
        let ids: Vec<String> = self.connected.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.send_stop(&id, now) {
                warn!(robot = %id, error = %e, "stop frame not delivered");
            }
        }
    }

    /// Record which controller drives a robot. Maintained by the fleet core so
    /// both sides of a pairing change together.
    pub fn set_paired_controller(&mut self, id: &str, controller: Option<&str>) -> Result<()> {
        let robot = self
            .robot_mut(id)
            .ok_or_else(|| FleetError::RobotNotFound(id.to_string()))?;
        robot.paired_controller = controller.map(str::to_string);
        Ok(())
    }

    pub fn robot(&self, id: &str) -> Option<RobotSnapshot> {
        self.connected
            .get(id)
            .or_else(|| self.discovered.get(id))
            .map(Robot::snapshot)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connected.contains_key(id) || self.discovered.contains_key(id)
    }

    pub fn connected_robots(&self) -> Vec<RobotSnapshot> {
        Self::sorted_snapshots(&self.connected)
    }

    pub fn discovered_robots(&self) -> Vec<RobotSnapshot> {
        Self::sorted_snapshots(&self.discovered)
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn sorted_snapshots(bucket: &HashMap<String, Robot>) -> Vec<RobotSnapshot> {
        let mut robots: Vec<RobotSnapshot> = bucket.values().map(Robot::snapshot).collect();
        robots.sort_by(|a, b| a.id.cmp(&b.id));
        robots
    }

    fn robot_mut(&mut self, id: &str) -> Option<&mut Robot> {
        if self.connected.contains_key(id) {
            self.connected.get_mut(id)
        } else {
            self.discovered.get_mut(id)
        }
    }

    fn snapshot_of(&self, id: &str) -> Result<RobotSnapshot> {
        self.robot(id)
            .ok_or_else(|| FleetError::RobotNotFound(id.to_string()))
    }

    fn send_status(&mut self, id: &str, address: IpAddr, mode: FleetMode) {
        let text = match encode_status(id, mode) {
            Ok(text) => text,
            Err(e) => {
                warn!(robot = id, error = %e, "status command not encodable");
                return;
            }
        };
        match self
            .transport
            .send_unicast(address, self.robot_port, text.as_bytes())
        {
            Ok(()) => {
                self.stats.status_sent = self.stats.status_sent.saturating_add(1);
                trace!(robot = id, mode = mode.wire_name(), "status sent");
            }
            Err(e) => {
                self.stats.send_failures = self.stats.send_failures.saturating_add(1);
                warn!(robot = id, %address, error = %e, "status command dropped");
            }
        }
    }
}
