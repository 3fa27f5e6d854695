use embassy_time::{Duration, Instant};

use crate::blackboard::Blackboard;
use crate::config::FlightConfig;
use crate::drivers::Actuator;
use crate::error::SchedulerFatal;
use crate::log::FlightEvent;
use crate::radio_types::CommandPacket;
use crate::scheduler::{Cadence, Task, TaskSpec, TaskStatus};
use crate::types::{ActuatorState, AltitudeMode};

/// Bang-bang altitude hold around a commanded target.
///
/// Pure decision logic: it never touches hardware. [`AltitudeTask`] feeds it
/// and drives the outputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AltitudeController {
    state: AltitudeMode,
    target_altitude_m: f32,
    /// Half-width of the window around the target where nothing runs.
    dead_band_m: f32,
    /// Set by the latest accepted command.
    manual_override: bool,
}

impl AltitudeController {
    /// Constructs a controller in Hold, aiming for `target_altitude_m`.
    pub const fn new(target_altitude_m: f32, dead_band_m: f32) -> Self {
        Self {
            state: AltitudeMode::Hold,
            target_altitude_m,
            dead_band_m,
            manual_override: false,
        }
    }

    pub const fn from_config(config: &FlightConfig) -> Self {
        Self::new(config.startup_target_altitude_m, config.dead_band_m)
    }

    pub const fn state(&self) -> AltitudeMode {
        self.state
    }

    pub const fn target(&self) -> f32 {
        self.target_altitude_m
    }

    pub const fn actuators(&self) -> ActuatorState {
        self.state.actuators()
    }

    pub const fn is_aborted(&self) -> bool {
        matches!(self.state, AltitudeMode::Abort)
    }

    /// Primary entry point: one control decision from the current altitude
    /// and the command received this tick, if any.
    pub fn update(&mut self, altitude_m: f32, command: Option<CommandPacket>) -> AltitudeMode {
        self.accept(command);
        if self.is_aborted() {
            return self.state;
        }
        self.state = if self.manual_override || !altitude_m.is_finite() {
            AltitudeMode::Hold
        } else if altitude_m < self.target_altitude_m - self.dead_band_m {
            AltitudeMode::Ascend
        } else if altitude_m > self.target_altitude_m + self.dead_band_m {
            AltitudeMode::Descend
        } else {
            AltitudeMode::Hold
        };
        self.state
    }

    /// Same command handling as [`update`](Self::update), but there is no
    /// altitude worth acting on, so hold.
    pub fn update_without_fix(&mut self, command: Option<CommandPacket>) -> AltitudeMode {
        self.accept(command);
        self.force_safe();
        self.state
    }

    /// Outputs off. Abort stays latched.
    pub fn force_safe(&mut self) {
        if !self.is_aborted() {
            self.state = AltitudeMode::Hold;
        }
    }

    fn accept(&mut self, command: Option<CommandPacket>) {
        // Nothing is accepted once aborted.
        let Some(command) = command.filter(|_| !self.is_aborted()) else {
            return;
        };
        if command.is_abort() {
            self.state = AltitudeMode::Abort;
            return;
        }
        self.target_altitude_m = command.target_altitude_m;
        self.manual_override = command.is_manual_override();
    }
}

/// Controller task. Owns the pump and bleed outputs; nothing else writes them.
pub struct AltitudeTask<'a, P, B> {
    controller: AltitudeController,
    pump: P,
    bleed: B,
    board: &'a Blackboard,
    period: Duration,
    stale_after: Duration,
    /// Inside a stale episode, already reported.
    stale: bool,
    /// Abort outputs have been written; the actuators are left alone from now on.
    abort_applied: bool,
    last_tick: Instant,
}

impl<'a, P: Actuator, B: Actuator> AltitudeTask<'a, P, B> {
    /// Takes ownership of both outputs and drives them off.
    pub fn new(mut pump: P, mut bleed: B, board: &'a Blackboard, config: &FlightConfig) -> Self {
        pump.set(false);
        bleed.set(false);
        Self {
            controller: AltitudeController::from_config(config),
            pump,
            bleed,
            board,
            period: config.control_period,
            stale_after: config.stale_snapshot_after,
            stale: false,
            abort_applied: false,
            last_tick: Instant::from_ticks(0),
        }
    }

    pub fn controller(&self) -> &AltitudeController {
        &self.controller
    }

    /// One control step: consume the pending command, decide, drive outputs.
    pub fn control(&mut self, now: Instant) -> Result<AltitudeMode, SchedulerFatal> {
        self.last_tick = now;
        let command = self.board.commands.try_take();
        let previous = self.controller.state();

        let mode = match self.fresh_altitude(now) {
            Some(altitude_m) => self.controller.update(altitude_m, command),
            None => self.controller.update_without_fix(command),
        };
        if mode != previous {
            self.board
                .log
                .report(now, FlightEvent::ModeChanged { from: previous, to: mode });
        }

        if mode == AltitudeMode::Abort {
            if !self.abort_applied {
                self.apply(ActuatorState::OFF);
                self.abort_applied = true;
            }
        } else {
            self.apply(mode.actuators());
        }

        self.pump.check()?;
        self.bleed.check()?;
        Ok(mode)
    }

    /// Altitude from the snapshot, if it is safe to act on.
    fn fresh_altitude(&mut self, now: Instant) -> Option<f32> {
        let stamped = self.board.snapshot.read_stamped();
        if stamped.value.is_startup_sentinel() {
            return None;
        }
        let age = stamped
            .updated_at
            .map_or(Duration::MAX, |at| now.saturating_duration_since(at));
        if age > self.stale_after {
            if !self.stale {
                self.stale = true;
                self.board.log.report(
                    now,
                    FlightEvent::StaleSnapshot {
                        age_ms: age.as_millis(),
                    },
                );
            }
            return None;
        }
        self.stale = false;
        Some(stamped.value.altitude_m)
    }

    /// Release before engaging, so both lines are never high together.
    fn apply(&mut self, outputs: ActuatorState) {
        if !outputs.pump_on() {
            self.pump.set(false);
        }
        if !outputs.bleed_on() {
            self.bleed.set(false);
        }
        if outputs.pump_on() {
            self.pump.set(true);
        }
        if outputs.bleed_on() {
            self.bleed.set(true);
        }
        self.board.actuators.update(outputs, self.last_tick);
    }
}

impl<P: Actuator, B: Actuator> Task for AltitudeTask<'_, P, B> {
    fn spec(&self) -> TaskSpec {
        TaskSpec {
            name: "altitude",
            cadence: Cadence::Periodic(self.period),
            budget: Some(self.period / 4),
        }
    }

    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal> {
        self.control(now)?;
        Ok(TaskStatus::Worked)
    }

    fn safe(&mut self) {
        self.controller.force_safe();
        self.pump.set(false);
        self.bleed.set(false);
        self.board.actuators.update(ActuatorState::OFF, self.last_tick);
    }
}
