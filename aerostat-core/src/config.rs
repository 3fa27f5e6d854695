//! Startup configuration. Built once, handed to the components by value and
//! never reloaded while flying.

use embassy_time::Duration;

use crate::error::ConfigError;

/// International Standard Atmosphere sea-level pressure.
pub const STANDARD_SEA_LEVEL_HPA: f32 = 1013.25;

/// nRF24-style PA levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerLevel {
    Min,
    Low,
    High,
    Max,
}

impl PowerLevel {
    pub const fn dbm(&self) -> i8 {
        match self {
            PowerLevel::Min => -18,
            PowerLevel::Low => -12,
            PowerLevel::High => -6,
            PowerLevel::Max => 0,
        }
    }

    pub const fn from_dbm(dbm: i8) -> Option<Self> {
        match dbm {
            -18 => Some(PowerLevel::Min),
            -12 => Some(PowerLevel::Low),
            -6 => Some(PowerLevel::High),
            0 => Some(PowerLevel::Max),
            _ => None,
        }
    }
}

pub type PipeAddress = [u8; 5];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioConfig {
    /// Pipe the vehicle transmits on.
    pub tx_address: PipeAddress,
    /// Pipe the vehicle listens on.
    pub rx_address: PipeAddress,
    pub power_level: PowerLevel,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_address: *b"1Node",
            rx_address: *b"2Node",
            power_level: PowerLevel::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlightConfig {
    pub sample_period: Duration,
    pub radio_period: Duration,
    pub control_period: Duration,
    /// Half-width of the no-actuation window around the target.
    pub dead_band_m: f32,
    /// Target held until the ground station sends one.
    pub startup_target_altitude_m: f32,
    pub sea_level_pressure_hpa: f32,
    /// Consecutive failed reads of one sensor that end the flight.
    pub max_consecutive_sensor_failures: u32,
    /// The controller refuses to actuate on a snapshot older than this.
    pub stale_snapshot_after: Duration,
    /// How long the scheduler idles when only best-effort tasks are registered
    /// and none of them had work.
    pub idle_backoff: Duration,
    pub radio: RadioConfig,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_secs(1),
            radio_period: Duration::from_secs(1),
            control_period: Duration::from_millis(500),
            dead_band_m: 2.0,
            startup_target_altitude_m: 100.0,
            sea_level_pressure_hpa: STANDARD_SEA_LEVEL_HPA,
            max_consecutive_sensor_failures: 5,
            stale_snapshot_after: Duration::from_secs(3),
            idle_backoff: Duration::from_millis(1),
            radio: RadioConfig::default(),
        }
    }
}

impl FlightConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("sample_period", self.sample_period),
            ("radio_period", self.radio_period),
            ("control_period", self.control_period),
            ("stale_snapshot_after", self.stale_snapshot_after),
        ];
        for (name, period) in periods {
            if period.as_ticks() == 0 {
                return Err(ConfigError::ZeroPeriod(name));
            }
        }
        if !self.dead_band_m.is_finite() || self.dead_band_m < 0.0 {
            return Err(ConfigError::InvalidDeadBand);
        }
        if !self.startup_target_altitude_m.is_finite() {
            return Err(ConfigError::InvalidTarget);
        }
        if self.max_consecutive_sensor_failures == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if !self.sea_level_pressure_hpa.is_finite() || self.sea_level_pressure_hpa <= 0.0 {
            return Err(ConfigError::InvalidSeaLevelPressure);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(FlightConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_zero_period() {
        let config = FlightConfig {
            radio_period: Duration::from_ticks(0),
            ..FlightConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroPeriod("radio_period"))
        );
    }

    #[test]
    fn test_rejects_bad_dead_band_and_target() {
        let negative = FlightConfig {
            dead_band_m: -1.0,
            ..FlightConfig::default()
        };
        assert_eq!(negative.validate(), Err(ConfigError::InvalidDeadBand));

        let nan_target = FlightConfig {
            startup_target_altitude_m: f32::NAN,
            ..FlightConfig::default()
        };
        assert_eq!(nan_target.validate(), Err(ConfigError::InvalidTarget));
    }

    #[test]
    fn test_power_level_dbm_mapping() {
        assert_eq!(RadioConfig::default().power_level.dbm(), -12);
        assert_eq!(PowerLevel::from_dbm(0), Some(PowerLevel::Max));
        assert_eq!(PowerLevel::from_dbm(3), None);
    }
}
