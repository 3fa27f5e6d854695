//! Whole-controller scenarios on virtual time: sampler, radio link and
//! altitude task under one scheduler, with scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;

use aerostat_core::drivers::{
    Actuator, BaroReading, Barometer, Frame, Gnss, Imu, ImuReading, RadioMode, RadioTransceiver,
};
use aerostat_core::scheduler::Clock;
use aerostat_core::{
    AltitudeMode, AltitudeTask, Blackboard, CommandPacket, FlightConfig, ManualClock, RadioConfig,
    RadioError, RadioLink, Scheduler, SchedulerFatal, SensorError, SensorSampler,
    TelemetryPacket,
};
use embassy_time::{Duration, Instant};

const SEA_LEVEL_HPA: f32 = 1013.25;

fn pressure_at(altitude_m: f32) -> f32 {
    SEA_LEVEL_HPA * (1.0 - altitude_m / 44_330.0).powf(5.255)
}

#[derive(Default)]
struct World {
    altitude_m: f32,
    imu_broken: bool,
    pump: bool,
    bleed: bool,
    overlapped: bool,
    /// (time, pump, bleed) after every actuator write.
    outputs: Vec<(Instant, bool, bool)>,
    /// Every transmit attempt: packet and whether it went out.
    downlink: Vec<(TelemetryPacket, bool)>,
    /// Transmit attempts that fail, by attempt index.
    failing_attempts: Vec<usize>,
    /// Uplink frames and the time they become receivable.
    uplink: VecDeque<(Instant, Frame)>,
    mode: Option<RadioMode>,
}

struct Baro<'w>(&'w RefCell<World>);
struct Accel<'w>(&'w RefCell<World>);
struct Receiver;
struct Radio<'w> {
    world: &'w RefCell<World>,
    clock: &'w ManualClock,
}
struct Output<'w> {
    world: &'w RefCell<World>,
    clock: &'w ManualClock,
    pump: bool,
}

impl Barometer for Baro<'_> {
    fn read(&mut self) -> Result<BaroReading, SensorError> {
        Ok(BaroReading {
            temperature_c: 15.0,
            pressure_hpa: pressure_at(self.0.borrow().altitude_m),
        })
    }
}

impl Imu for Accel<'_> {
    fn read(&mut self) -> Result<ImuReading, SensorError> {
        if self.0.borrow().imu_broken {
            return Err(SensorError::BusError);
        }
        Ok(ImuReading {
            accel: (0.0, 0.0, 9.81),
            gyro: (0.0, 0.0, 0.0),
        })
    }
}

impl Gnss for Receiver {
    fn update(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
    fn latitude(&self) -> f64 {
        52.2
    }
    fn longitude(&self) -> f64 {
        0.12
    }
}

impl RadioTransceiver for Radio<'_> {
    fn configure(&mut self, _config: &RadioConfig) {}

    fn set_mode(&mut self, mode: RadioMode) {
        self.world.borrow_mut().mode = Some(mode);
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        let mut world = self.world.borrow_mut();
        assert_eq!(world.mode, Some(RadioMode::Transmit));
        let packet = TelemetryPacket::decode(payload).unwrap();
        let attempt = world.downlink.len();
        let ok = !world.failing_attempts.contains(&attempt);
        world.downlink.push((packet, ok));
        if ok { Ok(()) } else { Err(RadioError::NoAck) }
    }

    fn poll_receive(&mut self) -> Option<Frame> {
        let mut world = self.world.borrow_mut();
        assert_eq!(world.mode, Some(RadioMode::Receive));
        let now = self.clock.now();
        let ready = world.uplink.front().is_some_and(|(at, _)| *at <= now);
        if !ready {
            return None;
        }
        world.uplink.pop_front().map(|(_, frame)| frame)
    }
}

impl Actuator for Output<'_> {
    fn set(&mut self, on: bool) {
        let mut world = self.world.borrow_mut();
        if self.pump {
            world.pump = on;
        } else {
            world.bleed = on;
        }
        if world.pump && world.bleed {
            world.overlapped = true;
        }
        let entry = (self.clock.now(), world.pump, world.bleed);
        world.outputs.push(entry);
    }
}

fn frame(command: CommandPacket) -> Frame {
    Frame::from_slice(&command.encode().unwrap()).unwrap()
}

fn config() -> FlightConfig {
    FlightConfig {
        sample_period: Duration::from_secs(1),
        radio_period: Duration::from_secs(1),
        control_period: Duration::from_millis(500),
        startup_target_altitude_m: 100.0,
        dead_band_m: 2.0,
        max_consecutive_sensor_failures: 3,
        ..FlightConfig::default()
    }
}

/// Runs the three flight tasks until `until`, returning the final mode and
/// the scheduler result.
fn fly(
    world: &RefCell<World>,
    board: &Blackboard,
    clock: &ManualClock,
    until: Instant,
) -> (AltitudeMode, Result<(), SchedulerFatal>) {
    let config = config();
    let mut sampler = SensorSampler::new(Baro(world), Accel(world), Receiver, board, &config);
    let mut radio = RadioLink::new(Radio { world, clock }, board, &config);
    let mut altitude = AltitudeTask::new(
        Output {
            world,
            clock,
            pump: true,
        },
        Output {
            world,
            clock,
            pump: false,
        },
        board,
        &config,
    );

    let result = {
        let mut scheduler: Scheduler<'_, _> = Scheduler::new(clock, &board.log, config.idle_backoff);
        scheduler.spawn(&mut sampler).unwrap();
        scheduler.spawn(&mut radio).unwrap();
        scheduler.spawn(&mut altitude).unwrap();
        scheduler.run_until(|now| now >= until)
    };
    (altitude.controller().state(), result)
}

fn outputs_at(world: &World, at: Instant) -> (bool, bool) {
    world
        .outputs
        .iter()
        .rev()
        .find(|(t, _, _)| *t <= at)
        .map_or((false, false), |(_, pump, bleed)| (*pump, *bleed))
}

#[test]
fn ground_commands_steer_then_abort_latches() {
    let world = RefCell::new(World {
        altitude_m: 95.0,
        ..World::default()
    });
    {
        let mut w = world.borrow_mut();
        w.uplink
            .push_back((Instant::from_secs(3), frame(CommandPacket::target(50.0))));
        w.uplink
            .push_back((Instant::from_secs(6), frame(CommandPacket::abort())));
        w.uplink
            .push_back((Instant::from_secs(7), frame(CommandPacket::target(200.0))));
    }
    let board = Blackboard::new();
    let clock = ManualClock::new();

    let (mode, result) = fly(&world, &board, &clock, Instant::from_secs(10));
    assert_eq!(result, Ok(()));
    assert_eq!(mode, AltitudeMode::Abort);

    let world = world.borrow();
    assert!(!world.overlapped);
    // Below target: pumping.
    assert_eq!(outputs_at(&world, Instant::from_millis(2500)), (true, false));
    // Target lowered to 50 m: bleeding.
    assert_eq!(outputs_at(&world, Instant::from_millis(5500)), (false, true));
    // Aborted: off, and the later target does not revive anything.
    assert_eq!(outputs_at(&world, Instant::from_millis(9500)), (false, false));
    assert!(world.outputs.iter().all(|(t, pump, bleed)| *t < Instant::from_secs(7)
        || (!*pump && !*bleed)));

    // Telemetry keeps flowing after the abort.
    let sequences: Vec<u32> = world.downlink.iter().map(|(p, _)| p.sequence).collect();
    assert_eq!(sequences, (1..=10).collect::<Vec<u32>>());
    assert!((world.downlink[9].0.altitude_m - 95.0).abs() < 0.5);
    assert_eq!(board.log.counts().commands_accepted, 3);
    assert_eq!(board.log.counts().commands_dropped, 0);
}

#[test]
fn dropped_packet_is_not_resent() {
    let world = RefCell::new(World {
        altitude_m: 100.0,
        failing_attempts: vec![1],
        ..World::default()
    });
    let board = Blackboard::new();
    let clock = ManualClock::new();

    let (_, result) = fly(&world, &board, &clock, Instant::from_secs(3));
    assert_eq!(result, Ok(()));

    let world = world.borrow();
    let attempts: Vec<(u32, bool)> = world
        .downlink
        .iter()
        .map(|(packet, ok)| (packet.sequence, *ok))
        .collect();
    // The third tick carries the then-current snapshot, not packet 2 again.
    assert_eq!(attempts, vec![(1, true), (2, false), (3, true)]);
    assert_eq!(board.link_health.read().packets_lost, 1);
    assert_eq!(board.log.counts().packets_lost, 1);
}

#[test]
fn sensor_failure_streak_forces_outputs_off() {
    let world = RefCell::new(World {
        altitude_m: 90.0,
        imu_broken: true,
        ..World::default()
    });
    let board = Blackboard::new();
    let clock = ManualClock::new();

    let (_, result) = fly(&world, &board, &clock, Instant::from_secs(60));
    assert!(matches!(
        result,
        Err(SchedulerFatal::SensorFailureStreak { failures: 3, .. })
    ));
    // Third failed pass at t = 2 s ends the flight.
    assert_eq!(clock.now(), Instant::from_secs(2));

    let world = world.borrow();
    assert!(world.outputs.iter().any(|(_, pump, _)| *pump));
    assert_eq!(world.outputs.last().map(|o| (o.1, o.2)), Some((false, false)));
    assert_eq!(board.actuators.read(), aerostat_core::ActuatorState::OFF);
    assert_eq!(board.log.counts().fatal, 1);
}
