//! Half-duplex telemetry/command exchange with the ground station.
//!
//! Each tick sends one telemetry packet built from the current snapshot,
//! then listens for at most one command. Nothing is queued or retried in
//! either direction.

use embassy_time::{Duration, Instant};

use crate::blackboard::Blackboard;
use crate::config::FlightConfig;
use crate::drivers::{RadioMode, RadioTransceiver};
use crate::error::SchedulerFatal;
use crate::health::LinkHealth;
use crate::log::{FlightEvent, LogEntry};
use crate::radio_types::{CommandPacket, TelemetryPacket};
use crate::scheduler::{Cadence, Task, TaskSpec, TaskStatus};

/// What one exchange did.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Exchange {
    /// Sequence of the packet that went out, `None` if it was dropped.
    pub sent: Option<u32>,
    pub received: Option<CommandPacket>,
}

pub struct RadioLink<'a, R> {
    radio: R,
    board: &'a Blackboard,
    period: Duration,
    health: LinkHealth,
}

impl<'a, R: RadioTransceiver> RadioLink<'a, R> {
    /// Takes ownership of the transceiver and configures it once.
    pub fn new(mut radio: R, board: &'a Blackboard, config: &FlightConfig) -> Self {
        radio.configure(&config.radio);
        log::info!(
            "radio configured: power {} dBm",
            config.radio.power_level.dbm()
        );
        Self {
            radio,
            board,
            period: config.radio_period,
            health: LinkHealth::new(),
        }
    }

    /// Transmit phase, then receive phase.
    pub fn exchange(&mut self, now: Instant) -> Exchange {
        let sent = self.transmit_phase(now);
        let received = self.receive_phase(now);
        self.health.tickstamp = now.as_ticks();
        self.board.link_health.update(self.health, now);
        Exchange { sent, received }
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    fn transmit_phase(&mut self, now: Instant) -> Option<u32> {
        self.radio.set_mode(RadioMode::Transmit);

        let packet = TelemetryPacket::from_snapshot(&self.board.snapshot.read());
        let result = packet
            .encode()
            .and_then(|bytes| self.radio.transmit(&bytes));
        match result {
            Ok(()) => {
                self.health.packets_sent = self.health.packets_sent.wrapping_add(1);
                Some(packet.sequence)
            }
            Err(error) => {
                self.health.packets_lost = self.health.packets_lost.wrapping_add(1);
                self.board.log.report(
                    now,
                    FlightEvent::PacketLost {
                        sequence: packet.sequence,
                        error,
                    },
                );
                None
            }
        }
    }

    fn receive_phase(&mut self, now: Instant) -> Option<CommandPacket> {
        self.radio.set_mode(RadioMode::Receive);

        let frame = self.radio.poll_receive()?;
        match CommandPacket::decode(&frame) {
            Ok(command) => {
                self.health.commands_received = self.health.commands_received.wrapping_add(1);
                let dropped = match self.board.commands.post(command) {
                    Ok(replaced) => {
                        self.board
                            .log
                            .report(now, FlightEvent::CommandAccepted(command));
                        replaced
                    }
                    // An abort is still waiting for the controller.
                    Err(rejected) => Some(rejected),
                };
                if let Some(dropped) = dropped {
                    self.board
                        .log
                        .report(now, FlightEvent::CommandDropped(dropped));
                }
                Some(command)
            }
            Err(error) => {
                self.health.decode_errors = self.health.decode_errors.wrapping_add(1);
                self.board.log.report(now, FlightEvent::DecodeFailed(error));
                None
            }
        }
    }
}

impl<R: RadioTransceiver> Task for RadioLink<'_, R> {
    fn spec(&self) -> TaskSpec {
        TaskSpec {
            name: "radio",
            cadence: Cadence::Periodic(self.period),
            budget: Some(self.period / 2),
        }
    }

    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal> {
        let exchange = self.exchange(now);
        if exchange.sent.is_none() || exchange.received.is_some() {
            self.board.log.record(LogEntry::LinkHealth(self.health));
        }
        Ok(TaskStatus::Worked)
    }
}
