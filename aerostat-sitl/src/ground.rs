//! Ground station on the far side of a simulated half-duplex link.

use std::cell::RefCell;
use std::collections::VecDeque;

use aerostat_core::config::RadioConfig;
use aerostat_core::drivers::{Frame, RadioMode, RadioTransceiver};
use aerostat_core::scheduler::Clock;
use aerostat_core::{CommandPacket, RadioError, TelemetryPacket};
use embassy_time::Instant;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Link impairments.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkConditions {
    /// Probability a downlink packet is not acknowledged.
    pub loss_rate: f64,
    /// Probability an uplink frame arrives damaged.
    pub corrupt_rate: f64,
}

/// What the ground saw.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroundStats {
    pub packets_received: u32,
    /// Sequence numbers skipped between consecutive packets.
    pub sequence_gaps: u32,
    pub commands_sent: u32,
    pub commands_corrupted: u32,
    /// Calls made in the wrong radio mode.
    pub mode_violations: u32,
}

pub struct GroundStation {
    conditions: LinkConditions,
    rng: StdRng,
    uplink: VecDeque<(Instant, CommandPacket)>,
    mode: Option<RadioMode>,
    configured: Option<RadioConfig>,
    last: Option<TelemetryPacket>,
    stats: GroundStats,
}

impl GroundStation {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            uplink: VecDeque::new(),
            mode: None,
            configured: None,
            last: None,
            stats: GroundStats::default(),
        }
    }

    /// Queue `command` for uplink once `at` has passed. Commands go out in
    /// the order they were scheduled.
    pub fn schedule(&mut self, at: Instant, command: CommandPacket) {
        let index = self.uplink.partition_point(|(t, _)| *t <= at);
        self.uplink.insert(index, (at, command));
    }

    pub fn last_telemetry(&self) -> Option<TelemetryPacket> {
        self.last
    }

    pub fn stats(&self) -> GroundStats {
        self.stats
    }

    /// Anything that is not a positive rate, NaN included, never happens.
    fn chance(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }

    fn receive_telemetry(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if self.chance(self.conditions.loss_rate) {
            return Err(RadioError::NoAck);
        }
        let packet = match TelemetryPacket::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("ground: unreadable telemetry: {}", e);
                return Ok(());
            }
        };
        if let Some(last) = self.last {
            let skipped = packet.sequence.wrapping_sub(last.sequence).saturating_sub(1);
            self.stats.sequence_gaps = self.stats.sequence_gaps.saturating_add(skipped);
        }
        self.stats.packets_received += 1;
        log::debug!(
            "ground: #{} alt {:.1} m temp {:.1} C at {:.6},{:.6}",
            packet.sequence,
            packet.altitude_m,
            packet.temperature_c,
            packet.latitude,
            packet.longitude
        );
        self.last = Some(packet);
        Ok(())
    }

    fn next_command(&mut self, now: Instant) -> Option<Frame> {
        if !self.uplink.front().is_some_and(|(at, _)| *at <= now) {
            return None;
        }
        let (_, command) = self.uplink.pop_front()?;
        let bytes = command.encode().ok()?;
        let mut frame = Frame::from_slice(&bytes).ok()?;
        self.stats.commands_sent += 1;

        if self.chance(self.conditions.corrupt_rate) {
            self.stats.commands_corrupted += 1;
            // Either a truncated frame or a flipped reserved flag bit.
            if self.rng.gen_bool(0.5) {
                frame.truncate(frame.len() - 1);
            } else if let Some(flags) = frame.last_mut() {
                *flags |= 1 << self.rng.gen_range(2u8..8);
            }
        }
        log::info!("ground: uplinking {:?}", command);
        Some(frame)
    }
}

/// Vehicle-side transceiver wired to a [`GroundStation`].
pub struct SimRadio<'g> {
    ground: &'g RefCell<GroundStation>,
    clock: &'g dyn Clock,
}

impl<'g> SimRadio<'g> {
    pub fn new(ground: &'g RefCell<GroundStation>, clock: &'g dyn Clock) -> Self {
        Self { ground, clock }
    }
}

impl RadioTransceiver for SimRadio<'_> {
    fn configure(&mut self, config: &RadioConfig) {
        log::info!(
            "radio: tx {} rx {} at {} dBm",
            String::from_utf8_lossy(&config.tx_address),
            String::from_utf8_lossy(&config.rx_address),
            config.power_level.dbm()
        );
        self.ground.borrow_mut().configured = Some(*config);
    }

    fn set_mode(&mut self, mode: RadioMode) {
        self.ground.borrow_mut().mode = Some(mode);
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        let mut ground = self.ground.borrow_mut();
        if ground.configured.is_none() || ground.mode != Some(RadioMode::Transmit) {
            ground.stats.mode_violations += 1;
            return Err(RadioError::Busy);
        }
        ground.receive_telemetry(payload)
    }

    fn poll_receive(&mut self) -> Option<Frame> {
        let mut ground = self.ground.borrow_mut();
        if ground.mode != Some(RadioMode::Receive) {
            ground.stats.mode_violations += 1;
            return None;
        }
        ground.next_command(self.clock.now())
    }
}
