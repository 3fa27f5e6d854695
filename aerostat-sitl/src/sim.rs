//! Simulated vehicle: vertical balloon dynamics plus the sensors and
//! outputs the flight core talks to.

use std::cell::RefCell;

use aerostat_core::config::STANDARD_SEA_LEVEL_HPA;
use aerostat_core::drivers::{Actuator, BaroReading, Barometer, Gnss, Imu, ImuReading};
use aerostat_core::scheduler::{Cadence, Task, TaskSpec, TaskStatus};
use aerostat_core::{ActuatorKind, SchedulerFatal, SensorError};
use embassy_time::{Duration, Instant};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Net lift with the pump running, m/s².
const PUMP_ACCEL: f32 = 0.35;
/// Net sink with the bleed valve open, m/s².
const BLEED_ACCEL: f32 = -0.35;
/// Envelope leak, always present.
const LEAK_ACCEL: f32 = -0.01;
/// Linear drag coefficient, 1/s.
const DRAG: f32 = 0.25;
const GRAVITY: f32 = 9.81;
/// ISA temperature lapse rate, K/m.
const LAPSE_RATE: f32 = 0.0065;
const SEA_LEVEL_TEMP_C: f32 = 15.0;
/// Metres per degree of latitude.
const METRES_PER_DEG: f64 = 111_320.0;

/// Per-read failure probabilities.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultRates {
    pub barometer: f64,
    pub imu: f64,
    pub gnss: f64,
}

pub struct World {
    pub altitude_m: f32,
    pub vertical_speed: f32,
    pub vertical_accel: f32,
    pub latitude: f64,
    pub longitude: f64,
    pub pump: bool,
    pub bleed: bool,
    /// Set if pump and bleed were ever on together.
    pub overlapped: bool,
    pub faults: FaultRates,
    /// Wind drift, m/s east and north.
    wind: (f64, f64),
    rng: StdRng,
    last_step: Option<Instant>,
}

impl World {
    pub fn new(altitude_m: f32, latitude: f64, longitude: f64, faults: FaultRates, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let wind = (rng.gen_range(-2.0..2.0), rng.gen_range(-2.0..2.0));
        Self {
            altitude_m,
            vertical_speed: 0.0,
            vertical_accel: 0.0,
            latitude,
            longitude,
            pump: false,
            bleed: false,
            overlapped: false,
            faults,
            wind,
            rng,
            last_step: None,
        }
    }

    /// Integrate the dynamics up to `now`.
    pub fn step(&mut self, now: Instant) {
        let Some(last) = self.last_step.replace(now) else {
            return;
        };
        let dt = now.saturating_duration_since(last).as_micros() as f32 / 1e6;
        if dt <= 0.0 {
            return;
        }

        let mut thrust = LEAK_ACCEL;
        if self.pump {
            thrust += PUMP_ACCEL;
        }
        if self.bleed {
            thrust += BLEED_ACCEL;
        }
        self.vertical_accel = thrust - DRAG * self.vertical_speed;
        self.vertical_speed += self.vertical_accel * dt;
        self.altitude_m = (self.altitude_m + self.vertical_speed * dt).max(0.0);
        if self.altitude_m == 0.0 && self.vertical_speed < 0.0 {
            self.vertical_speed = 0.0;
        }

        let dt = dt as f64;
        self.latitude += self.wind.1 * dt / METRES_PER_DEG;
        self.longitude +=
            self.wind.0 * dt / (METRES_PER_DEG * self.latitude.to_radians().cos().max(0.01));
    }

    /// ISA static pressure at the current altitude.
    pub fn pressure_hpa(&self) -> f32 {
        STANDARD_SEA_LEVEL_HPA * (1.0 - self.altitude_m / 44_330.0).powf(5.255)
    }

    pub fn temperature_c(&self) -> f32 {
        SEA_LEVEL_TEMP_C - LAPSE_RATE * self.altitude_m
    }

    fn fails(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }

    fn noise(&mut self, amplitude: f32) -> f32 {
        self.rng.gen_range(-amplitude..=amplitude)
    }
}

/// Advances the world between the flight tasks.
pub struct PhysicsTask<'w> {
    world: &'w RefCell<World>,
    period: Duration,
}

impl<'w> PhysicsTask<'w> {
    pub fn new(world: &'w RefCell<World>, period: Duration) -> Self {
        Self { world, period }
    }
}

impl Task for PhysicsTask<'_> {
    fn spec(&self) -> TaskSpec {
        TaskSpec {
            name: "physics",
            cadence: Cadence::Periodic(self.period),
            budget: None,
        }
    }

    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal> {
        self.world.borrow_mut().step(now);
        Ok(TaskStatus::Worked)
    }
}

pub struct SimBarometer<'w>(pub &'w RefCell<World>);

impl Barometer for SimBarometer<'_> {
    fn read(&mut self) -> Result<BaroReading, SensorError> {
        let mut world = self.0.borrow_mut();
        let rate = world.faults.barometer;
        if world.fails(rate) {
            return Err(SensorError::Timeout);
        }
        let pressure_hpa = world.pressure_hpa() + world.noise(0.02);
        let temperature_c = world.temperature_c() + world.noise(0.1);
        Ok(BaroReading {
            temperature_c,
            pressure_hpa,
        })
    }
}

pub struct SimImu<'w>(pub &'w RefCell<World>);

impl Imu for SimImu<'_> {
    fn read(&mut self) -> Result<ImuReading, SensorError> {
        let mut world = self.0.borrow_mut();
        let rate = world.faults.imu;
        if world.fails(rate) {
            return Err(SensorError::BusError);
        }
        let vertical = GRAVITY + world.vertical_accel;
        Ok(ImuReading {
            accel: (world.noise(0.05), world.noise(0.05), vertical + world.noise(0.05)),
            gyro: (world.noise(0.5), world.noise(0.5), world.noise(0.5)),
        })
    }
}

/// Holds the last fix like a real receiver does between sentences.
pub struct SimGnss<'w> {
    world: &'w RefCell<World>,
    fix: (f64, f64),
}

impl<'w> SimGnss<'w> {
    pub fn new(world: &'w RefCell<World>) -> Self {
        Self { world, fix: (0.0, 0.0) }
    }
}

impl Gnss for SimGnss<'_> {
    fn update(&mut self) -> Result<(), SensorError> {
        let mut world = self.world.borrow_mut();
        let rate = world.faults.gnss;
        if world.fails(rate) {
            return Err(SensorError::DataNotReady);
        }
        self.fix = (world.latitude, world.longitude);
        Ok(())
    }

    fn latitude(&self) -> f64 {
        self.fix.0
    }

    fn longitude(&self) -> f64 {
        self.fix.1
    }
}

pub struct SimOutput<'w> {
    world: &'w RefCell<World>,
    kind: ActuatorKind,
}

impl<'w> SimOutput<'w> {
    pub fn pump(world: &'w RefCell<World>) -> Self {
        Self {
            world,
            kind: ActuatorKind::Pump,
        }
    }

    pub fn bleed(world: &'w RefCell<World>) -> Self {
        Self {
            world,
            kind: ActuatorKind::Bleed,
        }
    }
}

impl Actuator for SimOutput<'_> {
    fn set(&mut self, on: bool) {
        let mut world = self.world.borrow_mut();
        match self.kind {
            ActuatorKind::Pump => world.pump = on,
            ActuatorKind::Bleed => world.bleed = on,
        }
        if world.pump && world.bleed {
            world.overlapped = true;
        }
    }
}
