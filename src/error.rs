//! Error types for the fleet core

use std::net::SocketAddr;

/// Result type alias for collaborator-facing operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Datagram transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket could not be created or configured. Fatal at startup.
    #[error("transport init failed on {addr}: {source}")]
    Init {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// One datagram was dropped
    #[error("send to {dest} failed: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Transport was already closed
    #[error("transport closed")]
    Closed,
}

/// Wire encoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("robot identity exceeds {max} bytes")]
    IdentityTooLong { max: usize },

    #[error("robot identity is empty or contains reserved characters")]
    InvalidIdentity,
}

/// Errors returned by the lifecycle manager, input pipeline and fleet core
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("robot not found: {0}")]
    RobotNotFound(String),

    #[error("controller not found: {0}")]
    ControllerNotFound(String),

    #[error("movement suppressed: emergency override active")]
    OverrideActive,

    #[error("robot {0} is disabled")]
    RobotDisabled(String),

    #[error("emergency override broadcast failed after {attempts} attempts")]
    OverrideNotDelivered { attempts: u8 },

    #[error("invalid controller sample: {0}")]
    InvalidSample(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Configuration loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
