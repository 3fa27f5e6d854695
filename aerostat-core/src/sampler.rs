use embassy_time::{Duration, Instant};

use crate::blackboard::Blackboard;
use crate::config::FlightConfig;
use crate::drivers::{Barometer, Gnss, Imu};
use crate::error::{SchedulerFatal, SensorError};
use crate::health::SensorHealth;
use crate::log::{FlightEvent, LogEntry};
use crate::scheduler::{Cadence, Task, TaskSpec, TaskStatus};
use crate::types::{SensorKind, TelemetrySnapshot};

/// Exponent of the international barometric formula, 1 / 5.255.
const BAROMETRIC_EXPONENT: f32 = 1.0 / 5.255;

/// Altitude in metres for a static pressure, relative to `sea_level_hpa`.
pub fn pressure_to_altitude_m(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    44_330.0 * (1.0 - libm::powf(pressure_hpa / sea_level_hpa, BAROMETRIC_EXPONENT))
}

/// Reads the barometer, IMU and GNSS once per period and publishes one
/// complete snapshot per pass.
pub struct SensorSampler<'a, B, I, G> {
    barometer: B,
    imu: I,
    gnss: G,
    board: &'a Blackboard,
    period: Duration,
    sea_level_hpa: f32,
    max_consecutive_failures: u32,
    current: TelemetrySnapshot,
    health: SensorHealth,
}

impl<'a, B: Barometer, I: Imu, G: Gnss> SensorSampler<'a, B, I, G> {
    pub fn new(barometer: B, imu: I, gnss: G, board: &'a Blackboard, config: &FlightConfig) -> Self {
        Self {
            barometer,
            imu,
            gnss,
            board,
            period: config.sample_period,
            sea_level_hpa: config.sea_level_pressure_hpa,
            max_consecutive_failures: config.max_consecutive_sensor_failures,
            current: board.snapshot.read(),
            health: SensorHealth::new(),
        }
    }

    /// One sampling pass.
    ///
    /// A sensor that fails keeps its fields from the previous snapshot. The
    /// sequence advances regardless, and the result is published in one
    /// update so readers never see a half-written pass.
    pub fn sample_once(&mut self, now: Instant) -> TelemetrySnapshot {
        let mut next = self.current;

        let baro = self.barometer.read().and_then(|reading| {
            let pressure = reading.pressure_hpa;
            if !pressure.is_finite() || pressure <= 0.0 || !reading.temperature_c.is_finite() {
                return Err(SensorError::OutOfRange);
            }
            Ok(reading)
        });
        match baro {
            Ok(reading) => {
                next.temperature_c = reading.temperature_c;
                next.pressure_hpa = reading.pressure_hpa;
                next.altitude_m = pressure_to_altitude_m(reading.pressure_hpa, self.sea_level_hpa);
                self.health.record(SensorKind::Barometer, true);
            }
            Err(error) => self.degraded(now, SensorKind::Barometer, error),
        }

        match self.imu.read() {
            Ok(reading) => {
                next.accel = reading.accel;
                next.gyro = reading.gyro;
                self.health.record(SensorKind::Imu, true);
            }
            Err(error) => self.degraded(now, SensorKind::Imu, error),
        }

        match self.gnss.update() {
            Ok(()) => {
                let (lat, lon) = (self.gnss.latitude(), self.gnss.longitude());
                if lat.is_finite() && lon.is_finite() {
                    next.latitude = lat;
                    next.longitude = lon;
                    self.health.record(SensorKind::Gnss, true);
                } else {
                    self.degraded(now, SensorKind::Gnss, SensorError::OutOfRange);
                }
            }
            Err(error) => self.degraded(now, SensorKind::Gnss, error),
        }

        // 0 is reserved for "never sampled".
        next.sequence = match self.current.sequence.wrapping_add(1) {
            0 => 1,
            seq => seq,
        };
        self.current = next;
        self.health.tickstamp = now.as_ticks();

        self.board.snapshot.update(next, now);
        self.board.sensor_health.update(self.health, now);
        self.board.log.record(LogEntry::Snapshot(now.as_ticks(), next));
        next
    }

    pub fn health(&self) -> &SensorHealth {
        &self.health
    }

    fn degraded(&mut self, now: Instant, sensor: SensorKind, error: SensorError) {
        self.health.record(sensor, false);
        self.board
            .log
            .report(now, FlightEvent::SensorDegraded { sensor, error });
    }
}

impl<B: Barometer, I: Imu, G: Gnss> Task for SensorSampler<'_, B, I, G> {
    fn spec(&self) -> TaskSpec {
        TaskSpec {
            name: "sampler",
            cadence: Cadence::Periodic(self.period),
            budget: Some(self.period / 4),
        }
    }

    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal> {
        let failures_before = self.total_failures();
        self.sample_once(now);
        if self.total_failures() != failures_before {
            self.board.log.record(LogEntry::SensorHealth(self.health));
        }

        let (sensor, failures) = self.health.worst_streak();
        if failures >= self.max_consecutive_failures {
            return Err(SchedulerFatal::SensorFailureStreak { sensor, failures });
        }
        Ok(TaskStatus::Worked)
    }
}

impl<B, I, G> SensorSampler<'_, B, I, G> {
    fn total_failures(&self) -> u32 {
        self.health.baro_failures + self.health.imu_failures + self.health.gnss_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{BaroReading, ImuReading};

    struct ScriptedBaro {
        pressures: &'static [Option<f32>],
        next: usize,
    }

    impl Barometer for ScriptedBaro {
        fn read(&mut self) -> Result<BaroReading, SensorError> {
            let step = self.pressures[self.next.min(self.pressures.len() - 1)];
            self.next += 1;
            step.map(|pressure_hpa| BaroReading {
                temperature_c: 15.0,
                pressure_hpa,
            })
            .ok_or(SensorError::Timeout)
        }
    }

    struct FlakyImu {
        fail: bool,
        count: f32,
    }

    impl Imu for FlakyImu {
        fn read(&mut self) -> Result<ImuReading, SensorError> {
            if self.fail {
                return Err(SensorError::BusError);
            }
            self.count += 1.0;
            Ok(ImuReading {
                accel: (0.0, 0.0, self.count),
                gyro: (self.count, 0.0, 0.0),
            })
        }
    }

    struct FixedGnss {
        fix: Option<(f64, f64)>,
    }

    impl Gnss for FixedGnss {
        fn update(&mut self) -> Result<(), SensorError> {
            self.fix.map(|_| ()).ok_or(SensorError::DataNotReady)
        }
        fn latitude(&self) -> f64 {
            self.fix.map_or(0.0, |f| f.0)
        }
        fn longitude(&self) -> f64 {
            self.fix.map_or(0.0, |f| f.1)
        }
    }

    fn sampler<'a>(
        board: &'a Blackboard,
        pressures: &'static [Option<f32>],
    ) -> SensorSampler<'a, ScriptedBaro, FlakyImu, FixedGnss> {
        SensorSampler::new(
            ScriptedBaro { pressures, next: 0 },
            FlakyImu {
                fail: false,
                count: 0.0,
            },
            FixedGnss {
                fix: Some((52.0, 0.1)),
            },
            board,
            &FlightConfig::default(),
        )
    }

    #[test]
    fn test_altitude_from_pressure() {
        assert!(pressure_to_altitude_m(1013.25, 1013.25).abs() < 1e-3);
        let h = pressure_to_altitude_m(899.0, 1013.25);
        assert!((h - 1000.0).abs() < 5.0, "got {h}");
        assert!(pressure_to_altitude_m(1020.0, 1013.25) < 0.0);
    }

    #[test]
    fn test_sequence_strictly_increases_and_is_published_whole() {
        let board = Blackboard::new();
        let mut sampler = sampler(&board, &[Some(1000.0), None, Some(990.0), None]);
        let mut last = 0;
        for i in 0..6u64 {
            let snapshot = sampler.sample_once(Instant::from_secs(i));
            assert!(snapshot.sequence > last);
            last = snapshot.sequence;
            assert_eq!(board.snapshot.read(), snapshot);
        }
        assert_eq!(board.snapshot.version(), 6);
    }

    #[test]
    fn test_failed_sensor_keeps_only_its_own_fields() {
        let board = Blackboard::new();
        let mut sampler = sampler(&board, &[Some(1000.0), None]);
        let first = sampler.sample_once(Instant::from_secs(0));
        let second = sampler.sample_once(Instant::from_secs(1));

        assert_eq!(second.sequence, first.sequence + 1);
        assert_eq!(second.pressure_hpa, first.pressure_hpa);
        assert_eq!(second.altitude_m, first.altitude_m);
        assert_eq!(second.temperature_c, first.temperature_c);
        // IMU still read fresh values.
        assert_ne!(second.accel, first.accel);
        assert_eq!(sampler.health().baro_streak, 1);
        assert_eq!(board.log.counts().sensor_degraded, 1);
    }

    #[test]
    fn test_impossible_pressure_is_a_barometer_failure() {
        let board = Blackboard::new();
        let mut sampler = sampler(&board, &[Some(1000.0), Some(-3.0), Some(f32::NAN)]);
        let good = sampler.sample_once(Instant::from_secs(0));
        sampler.sample_once(Instant::from_secs(1));
        let after = sampler.sample_once(Instant::from_secs(2));
        assert_eq!(after.altitude_m, good.altitude_m);
        assert_eq!(sampler.health().baro_streak, 2);
    }

    #[test]
    fn test_failure_streak_escalates() {
        let board = Blackboard::new();
        let config = FlightConfig {
            max_consecutive_sensor_failures: 3,
            ..FlightConfig::default()
        };
        let mut sampler = SensorSampler::new(
            ScriptedBaro {
                pressures: &[Some(1000.0)],
                next: 0,
            },
            FlakyImu {
                fail: false,
                count: 0.0,
            },
            FixedGnss { fix: None },
            &board,
            &config,
        );
        assert_eq!(sampler.tick(Instant::from_secs(0)), Ok(TaskStatus::Worked));
        assert_eq!(sampler.tick(Instant::from_secs(1)), Ok(TaskStatus::Worked));
        assert_eq!(
            sampler.tick(Instant::from_secs(2)),
            Err(SchedulerFatal::SensorFailureStreak {
                sensor: SensorKind::Gnss,
                failures: 3
            })
        );
    }

    #[test]
    fn test_imu_failure_is_recovered_by_next_good_read() {
        let board = Blackboard::new();
        let mut sampler = sampler(&board, &[Some(1000.0)]);
        sampler.imu.fail = true;
        sampler.sample_once(Instant::from_secs(0));
        assert_eq!(sampler.health().imu_streak, 1);
        sampler.imu.fail = false;
        sampler.sample_once(Instant::from_secs(1));
        assert_eq!(sampler.health().imu_streak, 0);
        assert_eq!(sampler.health().imu_failures, 1);
    }
}
