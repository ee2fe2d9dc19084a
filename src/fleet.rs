//! Fleet core
//!
//! Ties the lifecycle manager and the input pipeline together and is the one
//! surface collaborators talk to. The station wraps a single `FleetCore` in a
//! `tokio::sync::Mutex`; every loop and every control request takes that lock,
//! so registry mutation is serialised without further synchronisation.

use crate::config::{DispatchPolicy, FleetConfig};
use crate::error::{FleetError, Result};
use crate::events::{EventBus, FleetEvent};
use crate::input::{ControllerSnapshot, IngestOutcome, InputPipeline, RawSample};
use crate::lifecycle::{LifecycleManager, LinkStats, RobotSnapshot};
use crate::protocol::{self, ButtonBits, FleetMode, Message, MovementCommand};
use crate::safety::{OverrideRecord, OverrideState};
use crate::transport::{Datagram, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotList {
    pub connected: Vec<RobotSnapshot>,
    pub discovered: Vec<RobotSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FleetStats {
    pub uptime_ms: u64,
    pub datagrams_received: u32,
    pub malformed_datagrams: u32,
    pub poll_ticks: u32,
    pub frames_dispatched: u32,
    pub dispatch_failures: u32,
    pub evictions: u32,
    pub connected_robots: usize,
    pub discovered_robots: usize,
    pub controllers: usize,
    pub fleet_mode: FleetMode,
    pub override_active: bool,
    pub link: LinkStats,
}

pub struct FleetCore {
    lifecycle: LifecycleManager,
    input: InputPipeline,
    events: EventBus,
    dispatch_policy: DispatchPolicy,
    stats: FleetStats,
    start_time: Instant,
}

impl FleetCore {
    pub fn new(transport: Arc<dyn Transport>, config: &FleetConfig) -> Self {
        let events = EventBus::new();
        Self {
            lifecycle: LifecycleManager::new(transport, events.clone(), config),
            input: InputPipeline::new(
                config.stick_deadzone,
                config.movement_threshold,
                config.activity_window_ms,
            ),
            events,
            dispatch_policy: config.dispatch_policy,
            stats: FleetStats::default(),
            start_time: Instant::now(),
        }
    }

    /// Milliseconds since the core was created
    pub fn now_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Inbound datagram handler. Only discovery responses change state.
    pub fn on_datagram(&mut self, datagram: &Datagram, now: u64) {
        self.stats.datagrams_received = self.stats.datagrams_received.saturating_add(1);
        match protocol::decode(&datagram.payload) {
            Message::DiscoveryResponse { identity } => {
                self.lifecycle
                    .on_discovery_response(&identity, datagram.source.ip(), now);
            }
            Message::Malformed => {
                self.stats.malformed_datagrams = self.stats.malformed_datagrams.saturating_add(1);
                trace!(source = %datagram.source, len = datagram.payload.len(), "malformed datagram discarded");
            }
            // Our own probes and overrides loop back on the broadcast address.
            other => trace!(source = %datagram.source, message = ?other, "ignoring station-bound traffic"),
        }
    }

    // Robots

    pub fn list_robots(&self) -> RobotList {
        RobotList {
            connected: self.lifecycle.connected_robots(),
            discovered: self.lifecycle.discovered_robots(),
        }
    }

    pub fn get_robot(&self, id: &str) -> Result<RobotSnapshot> {
        self.lifecycle
            .robot(id)
            .ok_or_else(|| FleetError::RobotNotFound(id.to_string()))
    }

    pub fn connect(&mut self, id: &str, now: u64) -> Result<RobotSnapshot> {
        self.lifecycle.connect(id, now)
    }

    /// Stop and forget a robot; a controller paired with it is unpaired
    pub fn disconnect(&mut self, id: &str, now: u64) -> Result<RobotSnapshot> {
        let removed = self.lifecycle.disconnect(id, now)?;
        if self.input.unpair_robot(id).is_some() {
            self.publish_controllers();
        }
        Ok(removed)
    }

    pub fn set_robot_enabled(&mut self, id: &str, enabled: bool, now: u64) -> Result<RobotSnapshot> {
        self.lifecycle.set_enabled(id, enabled, now)
    }

    pub fn send_movement(&mut self, id: &str, axes: [f32; 4], buttons: ButtonBits, now: u64) -> Result<()> {
        self.lifecycle
            .send_movement(id, MovementCommand::from_axes(axes, buttons), now)
    }

    pub fn send_stop(&mut self, id: &str, now: u64) -> Result<()> {
        self.lifecycle.send_stop(id, now)
    }

    // Controllers

    pub fn list_controllers(&self) -> Vec<ControllerSnapshot> {
        self.input.controllers()
    }

    pub fn ingest_sample(&mut self, id: &str, raw: &RawSample, now: u64) -> Result<IngestOutcome> {
        let outcome = self.input.ingest_sample(id, raw, now)?;
        if outcome.created || outcome.activity_changed {
            self.publish_controllers();
        }
        Ok(outcome)
    }

    /// Forget a controller. The robot it drove gets a stop frame.
    pub fn remove_controller(&mut self, id: &str, now: u64) -> Result<ControllerSnapshot> {
        let removed = self.input.remove_controller(id)?;
        if let Some(robot) = &removed.paired_robot {
            self.release_robot(robot, now);
        }
        self.publish_controllers();
        Ok(removed)
    }

    /// Pair a controller with a known robot. Both ends lose any earlier pairing.
    pub fn pair(&mut self, controller: &str, robot: &str, now: u64) -> Result<()> {
        if !self.lifecycle.contains(robot) {
            warn!(controller, robot, "pair failed: unknown robot");
            return Err(FleetError::RobotNotFound(robot.to_string()));
        }
        let outcome = self.input.pair(controller, robot)?;
        if let Some(previous) = &outcome.previous_robot {
            self.release_robot(previous, now);
        }
        if let Some(displaced) = &outcome.displaced_controller {
            debug!(controller = %displaced, robot, "controller displaced by new pairing");
        }
        self.lifecycle.set_paired_controller(robot, Some(controller))?;
        self.publish_controllers();
        Ok(())
    }

    pub fn unpair(&mut self, controller: &str, now: u64) -> Result<()> {
        if let Some(robot) = self.input.unpair(controller)? {
            self.release_robot(&robot, now);
        }
        self.publish_controllers();
        Ok(())
    }

    pub fn set_controller_enabled(&mut self, id: &str, enabled: bool, now: u64) -> Result<ControllerSnapshot> {
        let snapshot = self.input.set_enabled(id, enabled)?;
        if !enabled {
            if let Some(robot) = &snapshot.paired_robot {
                if let Err(e) = self.lifecycle.send_stop(robot, now) {
                    debug!(robot = %robot, error = %e, "stop on controller disable not sent");
                }
            }
        }
        self.publish_controllers();
        Ok(snapshot)
    }

    // Fleet-wide

    pub fn set_override(&mut self, active: bool, now: u64) -> Result<()> {
        self.lifecycle.set_override(active, now)
    }

    pub fn override_active(&self) -> bool {
        self.lifecycle.override_active()
    }

    pub fn override_state(&self) -> &OverrideState {
        self.lifecycle.override_state()
    }

    pub fn override_history(&self) -> &[OverrideRecord] {
        self.lifecycle.emergency().get_history()
    }

    pub fn set_fleet_mode(&mut self, mode: FleetMode, now: u64) {
        self.lifecycle.set_fleet_mode(mode, now);
    }

    pub fn fleet_mode(&self) -> FleetMode {
        self.lifecycle.fleet_mode()
    }

    pub fn stats(&self) -> FleetStats {
        FleetStats {
            uptime_ms: self.now_ms(),
            connected_robots: self.lifecycle.connected_robots().len(),
            discovered_robots: self.lifecycle.discovered_robots().len(),
            controllers: self.input.len(),
            fleet_mode: self.lifecycle.fleet_mode(),
            override_active: self.lifecycle.override_active(),
            link: self.lifecycle.stats(),
            ..self.stats
        }
    }

    // Periodic task bodies

    pub fn discovery_tick(&mut self) {
        self.lifecycle.probe();
    }

    /// Probe now instead of waiting for the next discovery tick. Robots only
    /// answer a probe while unconnected, so this is how an operator rescans.
    pub fn refresh_robots(&mut self, now: u64) {
        info!("manual robot refresh");
        self.events.publish(FleetEvent::RobotsRefreshing { timestamp_ms: now });
        self.discovery_tick();
    }

    /// Evict stale robots and drop any pairing that pointed at them
    pub fn sweep_tick(&mut self, now: u64) -> Vec<String> {
        let evicted = self.lifecycle.sweep(now);
        let mut pairings_changed = false;
        for robot in &evicted {
            pairings_changed |= self.input.unpair_robot(&robot.id).is_some();
        }
        if pairings_changed {
            self.publish_controllers();
        }
        self.stats.evictions = self.stats.evictions.saturating_add(evicted.len() as u32);
        evicted.into_iter().map(|robot| robot.id).collect()
    }

    pub fn status_tick(&mut self, now: u64) {
        self.lifecycle.broadcast_status(now);
    }

    /// Input poll: expire activity, then dispatch one frame per live pairing.
    /// Nothing is dispatched while the override holds.
    pub fn poll_tick(&mut self, now: u64) {
        self.stats.poll_ticks = self.stats.poll_ticks.saturating_add(1);
        let outcome = self.input.poll(now, self.dispatch_policy);
        if outcome.activity_changed {
            self.publish_controllers();
        }
        if self.lifecycle.override_active() {
            return;
        }

        for dispatch in outcome.dispatches {
            match self.lifecycle.send_movement(&dispatch.robot, dispatch.command, now) {
                Ok(()) => {
                    self.stats.frames_dispatched = self.stats.frames_dispatched.saturating_add(1);
                }
                Err(FleetError::RobotDisabled(_)) => {}
                Err(e) => {
                    self.stats.dispatch_failures = self.stats.dispatch_failures.saturating_add(1);
                    debug!(
                        controller = %dispatch.controller,
                        robot = %dispatch.robot,
                        error = %e,
                        "dispatch failed"
                    );
                }
            }
        }
    }

    /// Best-effort stop to every connected robot. Part of station shutdown.
    pub fn stop_all(&mut self, now: u64) {
        info!(
            robots = self.lifecycle.connected_robots().len(),
            "stopping all connected robots"
        );
        self.lifecycle.stop_all(now);
    }

    fn release_robot(&mut self, robot: &str, now: u64) {
        if let Err(e) = self.lifecycle.set_paired_controller(robot, None) {
            debug!(robot, error = %e, "released robot already gone");
            return;
        }
        if let Err(e) = self.lifecycle.send_stop(robot, now) {
            warn!(robot, error = %e, "stop for released robot not delivered");
        }
    }

    fn publish_controllers(&self) {
        self.events.publish(FleetEvent::ControllerSetChanged {
            controllers: self.input.controllers(),
        });
    }
}
