//! Station configuration
//!
//! Every field has a default matching the minibot firmware, so an empty JSON
//! object (or no file at all) yields a working station. Command-line flags in
//! the station binary override individual fields after loading.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// UDP port the minibot firmware listens on
pub const DEFAULT_ROBOT_PORT: u16 = 2367;
/// TCP port of the operator control surface
pub const DEFAULT_CONTROL_PORT: u16 = 8080;

/// When the input pipeline sends movement frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Every poll tick sends the current frame, centered or not
    #[default]
    Continuous,
    /// Frames only while the sticks move, plus one stop frame when they settle
    OnMovement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Local address of the station's datagram socket
    pub bind_addr: SocketAddr,
    pub robot_port: u16,
    pub broadcast_addr: Ipv4Addr,
    /// TCP address of the line-JSON control surface
    pub control_addr: SocketAddr,

    pub discovery_period_ms: u64,
    pub sweep_period_ms: u64,
    pub status_period_ms: u64,
    pub poll_period_ms: u64,

    pub discovered_timeout_ms: u64,
    /// `None` keeps connected robots until an explicit disconnect
    pub connected_timeout_ms: Option<u64>,

    pub activity_window_ms: u64,
    pub stick_deadzone: f32,
    pub movement_threshold: f32,
    pub dispatch_policy: DispatchPolicy,

    /// Broadcast attempts for ESTOP / ESTOP_OFF before the failure is surfaced
    pub override_attempts: u8,

    pub log_level: String,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            robot_port: DEFAULT_ROBOT_PORT,
            broadcast_addr: Ipv4Addr::BROADCAST,
            control_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CONTROL_PORT)),
            discovery_period_ms: 1000,
            sweep_period_ms: 2000,
            status_period_ms: 1000,
            poll_period_ms: 16,
            discovered_timeout_ms: 10_000,
            connected_timeout_ms: None,
            activity_window_ms: 500,
            stick_deadzone: 0.1,
            movement_threshold: 0.05,
            dispatch_policy: DispatchPolicy::Continuous,
            override_attempts: 3,
            log_level: "info".to_string(),
        }
    }
}

impl FleetConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("discovery_period_ms", self.discovery_period_ms),
            ("sweep_period_ms", self.sweep_period_ms),
            ("status_period_ms", self.status_period_ms),
            ("poll_period_ms", self.poll_period_ms),
            ("discovered_timeout_ms", self.discovered_timeout_ms),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        if self.connected_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "connected_timeout_ms must be greater than zero when set".into(),
            ));
        }

        if self.override_attempts == 0 {
            return Err(ConfigError::Invalid("override_attempts must be at least 1".into()));
        }

        if !(0.0..1.0).contains(&self.stick_deadzone) {
            return Err(ConfigError::Invalid("stick_deadzone must be in [0, 1)".into()));
        }

        if !(0.0..1.0).contains(&self.movement_threshold) {
            return Err(ConfigError::Invalid("movement_threshold must be in [0, 1)".into()));
        }

        if self.robot_port == 0 {
            return Err(ConfigError::Invalid("robot_port must be non-zero".into()));
        }

        Ok(())
    }

    pub fn discovery_period(&self) -> Duration {
        Duration::from_millis(self.discovery_period_ms)
    }

    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis(self.sweep_period_ms)
    }

    pub fn status_period(&self) -> Duration {
        Duration::from_millis(self.status_period_ms)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    /// Tracing level parsed from `log_level`, falling back to INFO
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}
