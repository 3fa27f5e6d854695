mod clock;
mod ground;
mod recorder;
mod sim;

use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use aerostat_core::config::{PipeAddress, STANDARD_SEA_LEVEL_HPA};
use aerostat_core::scheduler::Clock;
use aerostat_core::utilization::TaskStats;
use aerostat_core::{
    AltitudeTask, Blackboard, CommandPacket, FlightConfig, ManualClock, PowerLevel, RadioConfig,
    RadioLink, Scheduler, SensorSampler,
};
use clap::Parser;
use embassy_time::Duration;

use clock::{SimClock, WallClock};
use ground::{GroundStation, LinkConditions, SimRadio};
use recorder::FlightRecorder;
use sim::{FaultRates, PhysicsTask, SimBarometer, SimGnss, SimImu, SimOutput, World};

#[derive(Parser, Debug)]
#[command(
    name = "aerostat-sitl",
    about = "Fly the aerostat flight core against a simulated balloon and ground station"
)]
struct Args {
    #[arg(long, default_value_t = 600, help = "Simulated flight time in seconds")]
    duration: u64,
    #[arg(long, help = "Pace the flight against the wall clock")]
    realtime: bool,
    #[arg(long, default_value_t = 1, help = "Seed for noise and fault injection")]
    seed: u64,
    #[arg(long, default_value = "flight.csv", help = "CSV flight log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = 80.0, help = "Launch altitude in metres")]
    start_altitude: f32,
    #[arg(long, default_value_t = 52.2053, help = "Launch latitude")]
    latitude: f64,
    #[arg(long, default_value_t = 0.1218, help = "Launch longitude")]
    longitude: f64,

    #[arg(long, default_value_t = 100.0, help = "Target altitude until the ground sends one")]
    target: f32,
    #[arg(long, default_value_t = 2.0, help = "Dead-band half-width in metres")]
    dead_band: f32,
    #[arg(long, default_value_t = 1000)]
    sample_ms: u64,
    #[arg(long, default_value_t = 1000)]
    radio_ms: u64,
    #[arg(long, default_value_t = 500)]
    control_ms: u64,
    #[arg(long, default_value_t = 5, help = "Consecutive failed reads that end the flight")]
    max_sensor_failures: u32,
    #[arg(long, default_value_t = STANDARD_SEA_LEVEL_HPA)]
    sea_level_hpa: f32,

    #[arg(long, default_value_t = -12, allow_hyphen_values = true, help = "PA level: -18, -12, -6 or 0 dBm")]
    power_dbm: i8,
    #[arg(long, default_value = "1Node", value_parser = parse_address)]
    tx_address: PipeAddress,
    #[arg(long, default_value = "2Node", value_parser = parse_address)]
    rx_address: PipeAddress,

    #[arg(long, value_parser = parse_uplink, help = "Uplink a new target, SECS:METRES (repeatable)")]
    uplink: Vec<(u64, f32)>,
    #[arg(long, help = "Uplink an abort at SECS")]
    abort_at: Option<u64>,
    #[arg(long, default_value_t = 0.0, help = "Downlink loss probability")]
    loss_rate: f64,
    #[arg(long, default_value_t = 0.0, help = "Uplink corruption probability")]
    corrupt_rate: f64,
    #[arg(long, default_value_t = 0.0)]
    baro_fail: f64,
    #[arg(long, default_value_t = 0.0)]
    imu_fail: f64,
    #[arg(long, default_value_t = 0.0)]
    gnss_fail: f64,
}

impl Args {
    fn flight_config(&self) -> Result<FlightConfig, Box<dyn std::error::Error>> {
        let power_level = PowerLevel::from_dbm(self.power_dbm)
            .ok_or_else(|| format!("unsupported power level {} dBm", self.power_dbm))?;
        let config = FlightConfig {
            sample_period: Duration::from_millis(self.sample_ms),
            radio_period: Duration::from_millis(self.radio_ms),
            control_period: Duration::from_millis(self.control_ms),
            dead_band_m: self.dead_band,
            startup_target_altitude_m: self.target,
            sea_level_pressure_hpa: self.sea_level_hpa,
            max_consecutive_sensor_failures: self.max_sensor_failures,
            radio: RadioConfig {
                tx_address: self.tx_address,
                rx_address: self.rx_address,
                power_level,
            },
            ..FlightConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_address(s: &str) -> Result<PipeAddress, String> {
    s.as_bytes()
        .try_into()
        .map_err(|_| format!("pipe address must be 5 bytes, got {}", s.len()))
}

fn parse_uplink(s: &str) -> Result<(u64, f32), String> {
    let (secs, metres) = s
        .split_once(':')
        .ok_or_else(|| format!("expected SECS:METRES, got {s}"))?;
    let secs = secs.parse().map_err(|e| format!("bad time {secs}: {e}"))?;
    let metres: f32 = metres.parse().map_err(|e| format!("bad altitude {metres}: {e}"))?;
    if !metres.is_finite() {
        return Err(format!("altitude must be finite, got {metres}"));
    }
    Ok((secs, metres))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let config = args.flight_config()?;

    let clock = if args.realtime {
        SimClock::Wall(WallClock)
    } else {
        SimClock::Virtual(ManualClock::new())
    };
    let start = clock.now();

    let board = Blackboard::new();
    let faults = FaultRates {
        barometer: args.baro_fail,
        imu: args.imu_fail,
        gnss: args.gnss_fail,
    };
    let world = RefCell::new(World::new(
        args.start_altitude,
        args.latitude,
        args.longitude,
        faults,
        args.seed,
    ));
    let conditions = LinkConditions {
        loss_rate: args.loss_rate,
        corrupt_rate: args.corrupt_rate,
    };
    let ground = RefCell::new(GroundStation::new(conditions, args.seed.wrapping_add(1)));
    for &(secs, metres) in &args.uplink {
        ground
            .borrow_mut()
            .schedule(start + Duration::from_secs(secs), CommandPacket::target(metres));
    }
    if let Some(secs) = args.abort_at {
        ground
            .borrow_mut()
            .schedule(start + Duration::from_secs(secs), CommandPacket::abort());
    }

    let log_file = File::create(&args.log_file)?;
    println!(
        "Flying for {} s ({}), logging to {}",
        args.duration,
        if args.realtime { "real time" } else { "virtual time" },
        args.log_file.display()
    );

    let mut physics = PhysicsTask::new(&world, Duration::from_millis(100));
    let mut sampler = SensorSampler::new(
        SimBarometer(&world),
        SimImu(&world),
        SimGnss::new(&world),
        &board,
        &config,
    );
    let mut radio = RadioLink::new(SimRadio::new(&ground, &clock), &board, &config);
    let mut altitude = AltitudeTask::new(
        SimOutput::pump(&world),
        SimOutput::bleed(&world),
        &board,
        &config,
    );
    let mut recorder = FlightRecorder::new(
        &board,
        BufWriter::new(log_file),
        Duration::from_millis(250),
        Duration::from_secs(1),
    );

    let until = start + Duration::from_secs(args.duration);
    let (outcome, task_report) = {
        let mut scheduler: Scheduler<'_, &SimClock> =
            Scheduler::new(&clock, &board.log, config.idle_backoff);
        scheduler.spawn(&mut physics)?;
        scheduler.spawn(&mut sampler)?;
        scheduler.spawn(&mut radio)?;
        scheduler.spawn(&mut altitude)?;
        scheduler.spawn(&mut recorder)?;
        let outcome = scheduler.run_until(|now| now >= until);
        let report: Vec<(&'static str, TaskStats)> = scheduler
            .task_stats()
            .map(|(name, stats)| (name, *stats))
            .collect();
        (outcome, report)
    };

    let elapsed = clock.now().saturating_duration_since(start);
    let world = world.borrow();
    let ground = ground.borrow();
    let snapshot = board.snapshot.read();
    let link = board.link_health.read();
    let counts = board.log.counts();
    let ground_stats = ground.stats();

    println!("\n=== Flight summary after {:.1} s ===", elapsed.as_millis() as f64 / 1000.0);
    println!(
        "Vehicle: {:.1} m true, {:.1} m measured, mode {:?}, target {:.1} m",
        world.altitude_m,
        snapshot.altitude_m,
        altitude.controller().state(),
        altitude.controller().target()
    );
    println!(
        "Snapshot #{}: {:.1} hPa, {:.1} C at {:.5},{:.5}",
        snapshot.sequence,
        snapshot.pressure_hpa,
        snapshot.temperature_c,
        snapshot.latitude,
        snapshot.longitude
    );
    println!(
        "Radio: {} sent, {} lost, {} commands, {} decode errors",
        link.packets_sent, link.packets_lost, link.commands_received, link.decode_errors
    );
    println!(
        "Ground: {} received, {} gaps, {} uplinked ({} corrupted), last #{}",
        ground_stats.packets_received,
        ground_stats.sequence_gaps,
        ground_stats.commands_sent,
        ground_stats.commands_corrupted,
        ground.last_telemetry().map_or(0, |p| p.sequence)
    );
    println!("Events: {:?}", counts);
    println!(
        "Recorder: {} rows, {} dropped{}",
        recorder.rows(),
        board.log.dropped(),
        if recorder.is_healthy() { "" } else { ", sink failed" }
    );
    for (name, stats) in &task_report {
        println!(
            "Task {:<9} runs {:>6}  max {:>6} ticks  cpu {:>4}‰  over budget {}  late {}",
            name,
            stats.runs,
            stats.max_ticks,
            stats.utilization_permille(elapsed),
            stats.budget_overruns,
            stats.late_starts
        );
    }
    if world.overlapped {
        log::error!("pump and bleed were on at the same time");
    }

    outcome?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uplink() {
        assert_eq!(parse_uplink("30:150.5"), Ok((30, 150.5)));
        assert!(parse_uplink("30").is_err());
        assert!(parse_uplink("x:10").is_err());
        assert!(parse_uplink("10:NaN").is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("1Node"), Ok(*b"1Node"));
        assert!(parse_address("toolong").is_err());
    }

    #[test]
    fn test_default_args_make_a_valid_config() {
        let args = Args::parse_from(["aerostat-sitl"]);
        let config = args.flight_config().unwrap();
        assert_eq!(config.radio, RadioConfig::default());
        assert_eq!(config, FlightConfig::default());
    }

    #[test]
    fn test_rejects_unknown_power_level() {
        let args = Args::parse_from(["aerostat-sitl", "--power-dbm", "3"]);
        assert!(args.flight_config().is_err());
    }
}
