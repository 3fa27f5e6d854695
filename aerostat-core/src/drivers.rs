//! Narrow interfaces to the hardware collaborators.
//!
//! Implementations own their bus/pin handles, handed to them at construction.
//! Every call must bound its own worst-case latency: the scheduler is
//! cooperative and a stalled call stalls every task.

use crate::config::RadioConfig;
use crate::error::{ActuatorFault, RadioError, SensorError};
use crate::types::Axes;

/// nRF24 payload limit.
pub const MAX_FRAME_LEN: usize = 32;

/// One received radio payload.
pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BaroReading {
    pub temperature_c: f32,
    pub pressure_hpa: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImuReading {
    pub accel: Axes,
    pub gyro: Axes,
}

pub trait Barometer {
    fn read(&mut self) -> Result<BaroReading, SensorError>;
}

pub trait Imu {
    fn read(&mut self) -> Result<ImuReading, SensorError>;
}

/// Position receiver. `latitude`/`longitude` return the fix parsed by the
/// last successful `update`.
pub trait Gnss {
    fn update(&mut self) -> Result<(), SensorError>;
    fn latitude(&self) -> f64;
    fn longitude(&self) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    Transmit,
    Receive,
}

/// Half-duplex packet radio. Transmits only in `Transmit` mode, receives
/// only in `Receive` mode.
pub trait RadioTransceiver {
    /// Called exactly once, before any other method.
    fn configure(&mut self, config: &RadioConfig);
    fn set_mode(&mut self, mode: RadioMode);
    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError>;
    /// Take at most one pending payload.
    fn poll_receive(&mut self) -> Option<Frame>;
}

/// Digital output driving the pump or the bleed valve.
pub trait Actuator {
    /// Fire-and-forget.
    fn set(&mut self, on: bool);

    /// Outputs with feedback can report a fault here. Plain GPIO never does.
    fn check(&self) -> Result<(), ActuatorFault> {
        Ok(())
    }
}
