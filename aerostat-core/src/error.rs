use core::fmt;

use crate::types::{ActuatorKind, SensorKind};

/// A single failed collaborator read. Recovered locally by keeping the
/// previous value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    BusError,
    Timeout,
    DataNotReady,
    /// The device answered but the value is physically impossible.
    OutOfRange,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::BusError => f.write_str("bus error"),
            SensorError::Timeout => f.write_str("timed out"),
            SensorError::DataNotReady => f.write_str("data not ready"),
            SensorError::OutOfRange => f.write_str("reading out of range"),
        }
    }
}

/// Transmit failure. The packet is dropped, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Hardware retransmits exhausted without an ack from the ground.
    NoAck,
    Busy,
    BusError,
    /// Payload larger than a single radio frame.
    PayloadTooLarge,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::NoAck => f.write_str("no acknowledgement"),
            RadioError::Busy => f.write_str("transceiver busy"),
            RadioError::BusError => f.write_str("bus error"),
            RadioError::PayloadTooLarge => f.write_str("payload too large"),
        }
    }
}

/// Inbound frame that could not be turned into a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeError {
    WrongLength { expected: usize, actual: usize },
    Malformed,
    NonFinite,
    ReservedFlags(u8),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::WrongLength { expected, actual } => {
                write!(f, "expected {} bytes got {}", expected, actual)
            }
            DecodeError::Malformed => f.write_str("malformed payload"),
            DecodeError::NonFinite => f.write_str("non-finite field"),
            DecodeError::ReservedFlags(bits) => write!(f, "reserved flag bits set: {:#04x}", bits),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActuatorFault {
    pub actuator: ActuatorKind,
}

impl fmt::Display for ActuatorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actuator {
            ActuatorKind::Pump => f.write_str("pump output fault"),
            ActuatorKind::Bleed => f.write_str("bleed output fault"),
        }
    }
}

/// Unrecoverable condition. Actuators are forced off, then the scheduler stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulerFatal {
    SensorFailureStreak { sensor: SensorKind, failures: u32 },
    ActuatorFault(ActuatorFault),
    TaskTableFull,
}

impl fmt::Display for SchedulerFatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerFatal::SensorFailureStreak { sensor, failures } => write!(
                f,
                "{} failed {} consecutive reads",
                sensor.name(),
                failures
            ),
            SchedulerFatal::ActuatorFault(fault) => fault.fmt(f),
            SchedulerFatal::TaskTableFull => f.write_str("task table full"),
        }
    }
}

impl From<ActuatorFault> for SchedulerFatal {
    fn from(fault: ActuatorFault) -> Self {
        SchedulerFatal::ActuatorFault(fault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroPeriod(&'static str),
    InvalidDeadBand,
    InvalidTarget,
    ZeroFailureThreshold,
    InvalidSeaLevelPressure,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroPeriod(name) => write!(f, "{} must be greater than zero", name),
            ConfigError::InvalidDeadBand => f.write_str("dead-band must be finite and >= 0"),
            ConfigError::InvalidTarget => f.write_str("startup target altitude must be finite"),
            ConfigError::ZeroFailureThreshold => {
                f.write_str("sensor failure threshold must be at least 1")
            }
            ConfigError::InvalidSeaLevelPressure => {
                f.write_str("sea-level pressure must be finite and positive")
            }
        }
    }
}

impl core::error::Error for SensorError {}
impl core::error::Error for RadioError {}
impl core::error::Error for DecodeError {}
impl core::error::Error for ActuatorFault {}
impl core::error::Error for SchedulerFatal {}
impl core::error::Error for ConfigError {}
