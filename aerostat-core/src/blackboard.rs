use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::datacells::DataCell;
use crate::health::{LinkHealth, SensorHealth};
use crate::log::FlightLog;
use crate::radio_types::CommandPacket;
use crate::types::{ActuatorState, TelemetrySnapshot};

/// Single-slot hand-off from the radio link to the controller.
///
/// A newer command replaces one that was never taken, except that a pending
/// abort is never replaced.
pub struct CommandMailbox {
    slot: Mutex<CriticalSectionRawMutex, Cell<Option<CommandPacket>>>,
}

impl CommandMailbox {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(Cell::new(None)),
        }
    }

    /// Leave `command` for the controller.
    ///
    /// `Ok` carries the pending command it replaced, if any. `Err` hands
    /// `command` back because an abort is pending.
    pub fn post(&self, command: CommandPacket) -> Result<Option<CommandPacket>, CommandPacket> {
        self.slot.lock(|slot| match slot.get() {
            Some(pending) if pending.is_abort() => Err(command),
            pending => {
                slot.set(Some(command));
                Ok(pending)
            }
        })
    }

    /// Take the pending command, if any.
    pub fn try_take(&self) -> Option<CommandPacket> {
        self.slot.lock(|slot| slot.take())
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock(|slot| slot.get().is_some())
    }
}

impl Default for CommandMailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the flight tasks share.
///
/// Built once at startup and lent to each task. Each cell has exactly one
/// writer: the sampler owns `snapshot` and `sensor_health`, the radio link
/// owns `link_health` and posts to `commands`, the controller owns
/// `actuators` and takes from `commands`.
pub struct Blackboard {
    pub snapshot: DataCell<TelemetrySnapshot>,
    pub actuators: DataCell<ActuatorState>,
    pub sensor_health: DataCell<SensorHealth>,
    pub link_health: DataCell<LinkHealth>,
    pub commands: CommandMailbox,
    pub log: FlightLog,
}

impl Blackboard {
    pub const fn new() -> Self {
        Self {
            snapshot: DataCell::new(TelemetrySnapshot::new()),
            actuators: DataCell::new(ActuatorState::OFF),
            sensor_health: DataCell::new(SensorHealth::new()),
            link_health: DataCell::new(LinkHealth::new()),
            commands: CommandMailbox::new(),
            log: FlightLog::new(),
        }
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_command_replaces_pending_one() {
        let mailbox = CommandMailbox::new();
        assert_eq!(mailbox.post(CommandPacket::target(10.0)), Ok(None));
        assert_eq!(
            mailbox.post(CommandPacket::target(20.0)),
            Ok(Some(CommandPacket::target(10.0)))
        );
        assert_eq!(mailbox.try_take(), Some(CommandPacket::target(20.0)));
        assert!(!mailbox.is_pending());
    }

    #[test]
    fn test_pending_abort_is_never_replaced() {
        let mailbox = CommandMailbox::new();
        assert_eq!(mailbox.post(CommandPacket::abort()), Ok(None));
        assert_eq!(
            mailbox.post(CommandPacket::target(200.0)),
            Err(CommandPacket::target(200.0))
        );
        assert_eq!(
            mailbox.post(CommandPacket::abort()),
            Err(CommandPacket::abort())
        );
        assert_eq!(mailbox.try_take(), Some(CommandPacket::abort()));
        assert_eq!(mailbox.try_take(), None);
    }
}
