// types.rs
pub type FlightTicks = u64;

/// Three-axis reading in sensor frame order (x, y, z).
pub type Axes = (f32, f32, f32);

/// Latest known vehicle state. Always replaced as a whole, never patched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySnapshot {
    /// Barometric altitude derived from `pressure_hpa`.
    pub altitude_m: f32,
    pub temperature_c: f32,
    pub pressure_hpa: f32,
    /// Acceleration in m/s².
    pub accel: Axes,
    /// Angular rate in deg/s.
    pub gyro: Axes,
    pub latitude: f64,
    pub longitude: f64,
    /// One per sampling pass. `0` means nothing has been sampled yet.
    pub sequence: u32,
}

impl TelemetrySnapshot {
    pub const fn new() -> Self {
        Self {
            altitude_m: 0.0,
            temperature_c: 0.0,
            pressure_hpa: 0.0,
            accel: (0.0, 0.0, 0.0),
            gyro: (0.0, 0.0, 0.0),
            latitude: 0.0,
            longitude: 0.0,
            sequence: 0,
        }
    }

    /// True until the sampler has published its first pass.
    pub const fn is_startup_sentinel(&self) -> bool {
        self.sequence == 0
    }
}

/// Pump and bleed outputs.
///
/// Only `OFF`, `PUMPING` and `BLEEDING` exist, so pumping and bleeding at
/// the same time cannot be expressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActuatorState {
    pump_on: bool,
    bleed_on: bool,
}

impl ActuatorState {
    pub const OFF: Self = Self {
        pump_on: false,
        bleed_on: false,
    };
    pub const PUMPING: Self = Self {
        pump_on: true,
        bleed_on: false,
    };
    pub const BLEEDING: Self = Self {
        pump_on: false,
        bleed_on: true,
    };

    pub const fn pump_on(&self) -> bool {
        self.pump_on
    }

    pub const fn bleed_on(&self) -> bool {
        self.bleed_on
    }
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self::OFF
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AltitudeMode {
    Hold = 0,    // Inside the dead-band (or no usable data)
    Ascend = 1,  // Pump running
    Descend = 2, // Bleed valve open
    Abort = 3,   // Latched until restart, outputs off
}

impl AltitudeMode {
    /// Outputs commanded in this mode.
    pub const fn actuators(&self) -> ActuatorState {
        match self {
            AltitudeMode::Ascend => ActuatorState::PUMPING,
            AltitudeMode::Descend => ActuatorState::BLEEDING,
            AltitudeMode::Hold | AltitudeMode::Abort => ActuatorState::OFF,
        }
    }
}

/// The collaborator behind a degraded reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    Barometer,
    Imu,
    Gnss,
}

impl SensorKind {
    pub const fn name(&self) -> &'static str {
        match self {
            SensorKind::Barometer => "barometer",
            SensorKind::Imu => "imu",
            SensorKind::Gnss => "gnss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActuatorKind {
    Pump,
    Bleed,
}
