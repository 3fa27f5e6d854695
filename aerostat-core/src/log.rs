use crate::error::{DecodeError, RadioError, SchedulerFatal, SensorError};
use crate::health::{LinkHealth, SensorHealth};
use crate::radio_types::CommandPacket;
use crate::types::{AltitudeMode, FlightTicks, SensorKind, TelemetrySnapshot};
use core::fmt::{self, Write};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Instant, TICK_HZ};
use portable_atomic::{AtomicU32, Ordering};

// A safe upper bound for any single CSV row (Tag + Timestamp + Data + Newline)
pub const MAX_LOG_LINE_LEN: usize = 256;

/// Entries buffered between the flight tasks and whoever drains the log.
pub const LOG_CHANNEL_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn tag(&self) -> &'static str {
        match self {
            LogLevel::Info => "I",
            LogLevel::Warn => "W",
            LogLevel::Error => "E",
        }
    }
}

/// Everything the core reports to the outside world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlightEvent {
    /// A sensor read failed; its fields kept their previous values.
    SensorDegraded {
        sensor: SensorKind,
        error: SensorError,
    },
    /// Downlink packet dropped, not retried.
    PacketLost { sequence: u32, error: RadioError },
    /// Uplink frame discarded.
    DecodeFailed(DecodeError),
    CommandAccepted(CommandPacket),
    /// A received command that will never reach the controller.
    CommandDropped(CommandPacket),
    ModeChanged {
        from: AltitudeMode,
        to: AltitudeMode,
    },
    /// Controller held because the snapshot stopped updating.
    StaleSnapshot { age_ms: u64 },
    /// A periodic task started more than one period late.
    Overrun { task: &'static str, late_by_us: u64 },
    BudgetExceeded { task: &'static str, took_us: u64 },
    Fatal(SchedulerFatal),
}

impl FlightEvent {
    pub const fn level(&self) -> LogLevel {
        match self {
            FlightEvent::CommandAccepted(_) | FlightEvent::ModeChanged { .. } => LogLevel::Info,
            FlightEvent::Fatal(_) => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            FlightEvent::SensorDegraded { .. } => "sensor_degraded",
            FlightEvent::PacketLost { .. } => "packet_lost",
            FlightEvent::DecodeFailed(_) => "decode_failed",
            FlightEvent::CommandAccepted(_) => "command_accepted",
            FlightEvent::CommandDropped(_) => "command_dropped",
            FlightEvent::ModeChanged { .. } => "mode_changed",
            FlightEvent::StaleSnapshot { .. } => "stale_snapshot",
            FlightEvent::Overrun { .. } => "overrun",
            FlightEvent::BudgetExceeded { .. } => "budget_exceeded",
            FlightEvent::Fatal(_) => "fatal",
        }
    }
}

impl fmt::Display for FlightEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlightEvent::SensorDegraded { sensor, error } => {
                write!(f, "{} degraded: {}", sensor.name(), error)
            }
            FlightEvent::PacketLost { sequence, error } => {
                write!(f, "telemetry #{} lost: {}", sequence, error)
            }
            FlightEvent::DecodeFailed(error) => write!(f, "uplink discarded: {}", error),
            FlightEvent::CommandAccepted(command) => write!(
                f,
                "command: target {:.1} m flags {:#04x}",
                command.target_altitude_m, command.flags
            ),
            FlightEvent::CommandDropped(command) => write!(
                f,
                "command dropped: target {:.1} m flags {:#04x}",
                command.target_altitude_m, command.flags
            ),
            FlightEvent::ModeChanged { from, to } => write!(f, "mode {:?} -> {:?}", from, to),
            FlightEvent::StaleSnapshot { age_ms } => {
                write!(f, "snapshot stale for {} ms; holding", age_ms)
            }
            FlightEvent::Overrun { task, late_by_us } => {
                write!(f, "LOOP OVERRUN: {} is late by {}us", task, late_by_us)
            }
            FlightEvent::BudgetExceeded { task, took_us } => {
                write!(f, "{} took {}us; over budget", task, took_us)
            }
            FlightEvent::Fatal(fatal) => write!(f, "FATAL: {}", fatal),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum LogEntry {
    Snapshot(FlightTicks, TelemetrySnapshot),
    Event(FlightTicks, FlightEvent),
    SensorHealth(SensorHealth),
    LinkHealth(LinkHealth),
}

impl LogEntry {
    pub fn write_schema<const SIZE: usize>(cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        writeln!(cursor, "# SCHEMA DEFINITION")?;
        writeln!(cursor, "# METADATA,tick_hz,{}", TICK_HZ)?;
        writeln!(
            cursor,
            "# {},tickstamp,{}",
            TelemetrySnapshot::TAG,
            TelemetrySnapshot::CSV_HEADER
        )?;
        writeln!(
            cursor,
            "# {},tickstamp,{}",
            FlightEvent::TAG,
            FlightEvent::CSV_HEADER
        )?;
        writeln!(
            cursor,
            "# {},tickstamp,{}",
            SensorHealth::TAG,
            SensorHealth::CSV_HEADER
        )?;
        writeln!(
            cursor,
            "# {},tickstamp,{}",
            LinkHealth::TAG,
            LinkHealth::CSV_HEADER
        )?;
        Ok(())
    }

    pub fn format_to<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        match self {
            LogEntry::Snapshot(ts, data) => write_line(*ts, data, cursor),
            LogEntry::Event(ts, event) => write_line(*ts, event, cursor),
            LogEntry::SensorHealth(data) => write_line(data.tickstamp, data, cursor),
            LogEntry::LinkHealth(data) => write_line(data.tickstamp, data, cursor),
        }
    }
}

// Every row is TAG,TIMESTAMP,PAYLOAD...\n
fn write_line<T: Loggable, const SIZE: usize>(
    ts: FlightTicks,
    data: &T,
    cursor: &mut LogBuffer<SIZE>,
) -> core::fmt::Result {
    write!(cursor, "{},{},", T::TAG, ts)?;
    data.format_payload(cursor)?;
    writeln!(cursor)?;
    Ok(())
}

// A trait for types that can be logged
pub trait Loggable {
    /// The 'Tag' that identifies this row (e.g., 'S', 'E', 'LH')
    const TAG: &'static str;
    /// Column names of the payload.
    const CSV_HEADER: &'static str;

    /// Only write the fields and commas. Do NOT write the tag, timestamp, or \n.
    fn format_payload<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result;
}

impl Loggable for TelemetrySnapshot {
    const TAG: &'static str = "S";
    const CSV_HEADER: &'static str = "sequence,altitude_m,temperature_c,pressure_hpa,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,latitude,longitude";
    fn format_payload<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        write!(
            cursor,
            "{},{:.2},{:.2},{:.2},{:.3},{:.3},{:.3},{:.3},{:.3},{:.3},{:.7},{:.7}",
            self.sequence,
            self.altitude_m,
            self.temperature_c,
            self.pressure_hpa,
            self.accel.0,
            self.accel.1,
            self.accel.2,
            self.gyro.0,
            self.gyro.1,
            self.gyro.2,
            self.latitude,
            self.longitude
        )
    }
}

impl Loggable for FlightEvent {
    const TAG: &'static str = "E";
    const CSV_HEADER: &'static str = "level,kind,detail";
    fn format_payload<const SIZE: usize>(&self, cursor: &mut LogBuffer<SIZE>) -> core::fmt::Result {
        // Display texts never contain commas.
        write!(cursor, "{},{},{}", self.level().tag(), self.kind(), self)
    }
}

/// Copy of the event counters at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub sensor_degraded: u32,
    pub packets_lost: u32,
    pub decode_errors: u32,
    pub commands_accepted: u32,
    pub commands_dropped: u32,
    pub mode_changes: u32,
    pub stale_snapshots: u32,
    pub overruns: u32,
    pub budget_exceeded: u32,
    pub fatal: u32,
}

struct EventCounters {
    sensor_degraded: AtomicU32,
    packets_lost: AtomicU32,
    decode_errors: AtomicU32,
    commands_accepted: AtomicU32,
    commands_dropped: AtomicU32,
    mode_changes: AtomicU32,
    stale_snapshots: AtomicU32,
    overruns: AtomicU32,
    budget_exceeded: AtomicU32,
    fatal: AtomicU32,
}

impl EventCounters {
    const fn new() -> Self {
        Self {
            sensor_degraded: AtomicU32::new(0),
            packets_lost: AtomicU32::new(0),
            decode_errors: AtomicU32::new(0),
            commands_accepted: AtomicU32::new(0),
            commands_dropped: AtomicU32::new(0),
            mode_changes: AtomicU32::new(0),
            stale_snapshots: AtomicU32::new(0),
            overruns: AtomicU32::new(0),
            budget_exceeded: AtomicU32::new(0),
            fatal: AtomicU32::new(0),
        }
    }

    fn counter(&self, event: &FlightEvent) -> &AtomicU32 {
        match event {
            FlightEvent::SensorDegraded { .. } => &self.sensor_degraded,
            FlightEvent::PacketLost { .. } => &self.packets_lost,
            FlightEvent::DecodeFailed(_) => &self.decode_errors,
            FlightEvent::CommandAccepted(_) => &self.commands_accepted,
            FlightEvent::CommandDropped(_) => &self.commands_dropped,
            FlightEvent::ModeChanged { .. } => &self.mode_changes,
            FlightEvent::StaleSnapshot { .. } => &self.stale_snapshots,
            FlightEvent::Overrun { .. } => &self.overruns,
            FlightEvent::BudgetExceeded { .. } => &self.budget_exceeded,
            FlightEvent::Fatal(_) => &self.fatal,
        }
    }

    fn snapshot(&self) -> EventCounts {
        EventCounts {
            sensor_degraded: self.sensor_degraded.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            mode_changes: self.mode_changes.load(Ordering::Relaxed),
            stale_snapshots: self.stale_snapshots.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            budget_exceeded: self.budget_exceeded.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
        }
    }
}

/// Observability channel shared by every task.
///
/// Events go to the `log` facade immediately and are counted. Events and
/// data rows are also queued for a recorder; when the queue is full the
/// entry is dropped and counted instead of blocking a flight task.
pub struct FlightLog {
    channel: Channel<CriticalSectionRawMutex, LogEntry, LOG_CHANNEL_DEPTH>,
    dropped: AtomicU32,
    counters: EventCounters,
}

impl FlightLog {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
            counters: EventCounters::new(),
        }
    }

    pub fn report(&self, at: Instant, event: FlightEvent) {
        match event.level() {
            LogLevel::Info => log::info!("{}", event),
            LogLevel::Warn => log::warn!("{}", event),
            LogLevel::Error => log::error!("{}", event),
        }
        self.counters
            .counter(&event)
            .fetch_add(1, Ordering::Relaxed);
        self.record(LogEntry::Event(at.as_ticks(), event));
    }

    /// Queue a row for the recorder without blocking.
    pub fn record(&self, entry: LogEntry) {
        if self.channel.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn try_next(&self) -> Option<LogEntry> {
        self.channel.try_receive().ok()
    }

    pub fn backlog(&self) -> usize {
        self.channel.len()
    }

    /// Entries lost because the queue was full.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn counts(&self) -> EventCounts {
        self.counters.snapshot()
    }
}

impl Default for FlightLog {
    fn default() -> Self {
        Self::new()
    }
}

// Helper for formatting into a buffer
#[repr(align(4))]
pub struct LogBuffer<const SIZE: usize> {
    buf: [u8; SIZE],
    pub pos: usize,
}

impl<const SIZE: usize> core::fmt::Write for LogBuffer<SIZE> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remainder = self.buf.len() - self.pos;
        if remainder < bytes.len() {
            return Err(core::fmt::Error);
        }

        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

impl<const SIZE: usize> Default for LogBuffer<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> LogBuffer<SIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; SIZE],
            pos: 0,
        }
    }
    /// Attempts to format a LogEntry into the buffer.
    /// Returns the number of bytes written, or an error if it doesn't fit.
    /// A failed write leaves the buffer as it was.
    pub fn write_entry(&mut self, entry: &LogEntry) -> Result<usize, core::fmt::Error> {
        let start_pos = self.pos;
        if let Err(e) = entry.format_to(self) {
            self.pos = start_pos;
            return Err(e);
        }
        Ok(self.pos - start_pos)
    }

    pub fn space_remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
    pub fn get_active_buffer(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(buf: &LogBuffer<MAX_LOG_LINE_LEN>) -> &str {
        core::str::from_utf8(buf.get_active_buffer()).unwrap()
    }

    #[test]
    fn test_event_row_format() {
        let mut buf = LogBuffer::<MAX_LOG_LINE_LEN>::new();
        let entry = LogEntry::Event(
            1500,
            FlightEvent::SensorDegraded {
                sensor: SensorKind::Gnss,
                error: SensorError::Timeout,
            },
        );
        buf.write_entry(&entry).unwrap();
        assert_eq!(
            line(&buf),
            "E,1500,W,sensor_degraded,gnss degraded: timed out\n"
        );
    }

    #[test]
    fn test_snapshot_row_has_every_column() {
        let mut buf = LogBuffer::<MAX_LOG_LINE_LEN>::new();
        let snapshot = TelemetrySnapshot {
            sequence: 3,
            altitude_m: 101.5,
            ..TelemetrySnapshot::new()
        };
        buf.write_entry(&LogEntry::Snapshot(10, snapshot)).unwrap();
        let row = line(&buf);
        assert!(row.starts_with("S,10,3,101.50,"));
        let columns = row.trim_end().split(',').count();
        let header_columns = TelemetrySnapshot::CSV_HEADER.split(',').count();
        assert_eq!(columns, header_columns + 2);
    }

    #[test]
    fn test_write_entry_rolls_back_when_full() {
        let mut buf = LogBuffer::<16>::new();
        let entry = LogEntry::Snapshot(0, TelemetrySnapshot::new());
        assert!(buf.write_entry(&entry).is_err());
        assert_eq!(buf.pos, 0);
        assert_eq!(buf.space_remaining(), 16);
    }

    #[test]
    fn test_report_counts_and_queues() {
        let log = FlightLog::new();
        log.report(Instant::from_ticks(7), FlightEvent::DecodeFailed(DecodeError::Malformed));
        log.report(
            Instant::from_ticks(8),
            FlightEvent::PacketLost {
                sequence: 1,
                error: RadioError::NoAck,
            },
        );
        let counts = log.counts();
        assert_eq!(counts.decode_errors, 1);
        assert_eq!(counts.packets_lost, 1);
        assert_eq!(log.backlog(), 2);
        assert!(matches!(
            log.try_next(),
            Some(LogEntry::Event(7, FlightEvent::DecodeFailed(_)))
        ));
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let log = FlightLog::new();
        for i in 0..(LOG_CHANNEL_DEPTH as u64 + 3) {
            log.record(LogEntry::Snapshot(i, TelemetrySnapshot::new()));
        }
        assert_eq!(log.backlog(), LOG_CHANNEL_DEPTH);
        assert_eq!(log.dropped(), 3);
    }
}
