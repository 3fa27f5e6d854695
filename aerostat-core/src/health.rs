// health.rs
use crate::log::{LogBuffer, Loggable};
use crate::types::{FlightTicks, SensorKind};
use core::fmt::Write;

/// Failure bookkeeping for the three sampled sensors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorHealth {
    pub tickstamp: FlightTicks,
    /// Consecutive failed reads, reset by a good read.
    pub baro_streak: u32,
    pub imu_streak: u32,
    pub gnss_streak: u32,
    pub baro_failures: u32,
    pub imu_failures: u32,
    pub gnss_failures: u32,
}

impl SensorHealth {
    pub const fn new() -> Self {
        Self {
            tickstamp: 0,
            baro_streak: 0,
            imu_streak: 0,
            gnss_streak: 0,
            baro_failures: 0,
            imu_failures: 0,
            gnss_failures: 0,
        }
    }

    /// Account for one read of `sensor`.
    pub fn record(&mut self, sensor: SensorKind, ok: bool) {
        let (streak, total) = match sensor {
            SensorKind::Barometer => (&mut self.baro_streak, &mut self.baro_failures),
            SensorKind::Imu => (&mut self.imu_streak, &mut self.imu_failures),
            SensorKind::Gnss => (&mut self.gnss_streak, &mut self.gnss_failures),
        };
        if ok {
            *streak = 0;
        } else {
            *streak = streak.saturating_add(1);
            *total = total.saturating_add(1);
        }
    }

    /// The sensor with the longest current failure streak.
    pub fn worst_streak(&self) -> (SensorKind, u32) {
        [
            (SensorKind::Barometer, self.baro_streak),
            (SensorKind::Imu, self.imu_streak),
            (SensorKind::Gnss, self.gnss_streak),
        ]
        .into_iter()
        .fold((SensorKind::Barometer, 0), |worst, candidate| {
            if candidate.1 > worst.1 { candidate } else { worst }
        })
    }
}

impl Loggable for SensorHealth {
    const TAG: &'static str = "SH";
    const CSV_HEADER: &'static str =
        "baro_streak,imu_streak,gnss_streak,baro_failures,imu_failures,gnss_failures";
    fn format_payload<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        write!(
            cursor,
            "{},{},{},{},{},{}",
            self.baro_streak,
            self.imu_streak,
            self.gnss_streak,
            self.baro_failures,
            self.imu_failures,
            self.gnss_failures
        )
    }
}

/// Radio link counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkHealth {
    pub tickstamp: FlightTicks,
    pub packets_sent: u32,
    pub packets_lost: u32,
    pub commands_received: u32,
    pub decode_errors: u32,
}

impl LinkHealth {
    pub const fn new() -> Self {
        Self {
            tickstamp: 0,
            packets_sent: 0,
            packets_lost: 0,
            commands_received: 0,
            decode_errors: 0,
        }
    }
}

impl Loggable for LinkHealth {
    const TAG: &'static str = "LH";
    const CSV_HEADER: &'static str = "packets_sent,packets_lost,commands_received,decode_errors";
    fn format_payload<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        write!(
            cursor,
            "{},{},{},{}",
            self.packets_sent, self.packets_lost, self.commands_received, self.decode_errors
        )
    }
}
