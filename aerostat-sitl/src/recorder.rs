use std::io::Write;

use aerostat_core::Blackboard;
use aerostat_core::log::{LogBuffer, LogEntry, MAX_LOG_LINE_LEN};
use aerostat_core::scheduler::{Cadence, Task, TaskSpec, TaskStatus};
use aerostat_core::SchedulerFatal;
use embassy_time::{Duration, Instant};

const BUFFER_LEN: usize = 4096;

/// Drains the flight log into a CSV sink.
///
/// Rows are staged in a RAM buffer and written out when it fills up or the
/// flush interval has passed. A failing sink never stops the flight; the
/// recorder just stops writing.
pub struct FlightRecorder<'a, W: Write> {
    board: &'a Blackboard,
    out: W,
    buffer: LogBuffer<BUFFER_LEN>,
    period: Duration,
    flush_interval: Duration,
    last_flush: Instant,
    rows: u64,
    sink_ok: bool,
}

impl<'a, W: Write> FlightRecorder<'a, W> {
    /// Writes the schema header straight away.
    pub fn new(board: &'a Blackboard, out: W, period: Duration, flush_interval: Duration) -> Self {
        let mut recorder = Self {
            board,
            out,
            buffer: LogBuffer::new(),
            period,
            flush_interval,
            last_flush: Instant::from_ticks(0),
            rows: 0,
            sink_ok: true,
        };
        LogEntry::write_schema(&mut recorder.buffer).ok();
        recorder.flush();
        recorder
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn is_healthy(&self) -> bool {
        self.sink_ok
    }

    /// Moves every queued entry into the buffer, flushing when it runs low.
    fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(entry) = self.board.log.try_next() {
            if self.buffer.space_remaining() < MAX_LOG_LINE_LEN {
                self.flush();
            }
            if self.buffer.write_entry(&entry).is_ok() {
                self.rows += 1;
            } else {
                log::warn!("recorder: row too long, skipped");
            }
            drained += 1;
        }
        drained
    }

    fn flush(&mut self) {
        if self.buffer.pos == 0 {
            return;
        }
        if self.sink_ok {
            let written = self
                .out
                .write_all(self.buffer.get_active_buffer())
                .and_then(|()| self.out.flush());
            if let Err(e) = written {
                log::error!("recorder: write failed, recording stopped: {}", e);
                self.sink_ok = false;
            }
        }
        self.buffer.reset();
    }
}

impl<W: Write> Task for FlightRecorder<'_, W> {
    fn spec(&self) -> TaskSpec {
        TaskSpec {
            name: "recorder",
            cadence: Cadence::Periodic(self.period),
            budget: None,
        }
    }

    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal> {
        let drained = self.drain();
        if now.saturating_duration_since(self.last_flush) >= self.flush_interval {
            self.flush();
            self.last_flush = now;
        }
        Ok(if drained > 0 {
            TaskStatus::Worked
        } else {
            TaskStatus::Idle
        })
    }

    /// Last chance to get the tail of the log out.
    fn safe(&mut self) {
        self.drain();
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerostat_core::log::FlightEvent;
    use aerostat_core::{DecodeError, TelemetrySnapshot};

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("card removed"))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_schema_then_rows() {
        let board = Blackboard::new();
        let mut recorder = FlightRecorder::new(
            &board,
            Vec::new(),
            Duration::from_millis(250),
            Duration::from_secs(1),
        );
        board.log.record(LogEntry::Snapshot(5, TelemetrySnapshot::new()));
        board.log.report(
            Instant::from_ticks(6),
            FlightEvent::DecodeFailed(DecodeError::Malformed),
        );
        recorder.tick(Instant::from_secs(2)).unwrap();

        let text = String::from_utf8(recorder.out.clone()).unwrap();
        assert!(text.starts_with("# SCHEMA DEFINITION\n"));
        assert!(text.contains("\nS,5,0,"));
        assert!(text.contains("\nE,6,W,decode_failed,uplink discarded: malformed payload\n"));
        assert_eq!(recorder.rows(), 2);
    }

    #[test]
    fn test_safe_flushes_the_tail() {
        let board = Blackboard::new();
        let mut recorder = FlightRecorder::new(
            &board,
            Vec::new(),
            Duration::from_millis(250),
            Duration::from_secs(60),
        );
        board.log.record(LogEntry::Snapshot(5, TelemetrySnapshot::new()));
        recorder.tick(Instant::from_secs(1)).unwrap();
        let before = recorder.out.len();
        recorder.safe();
        assert!(recorder.out.len() > before);
    }

    #[test]
    fn test_broken_sink_does_not_stop_the_flight() {
        let board = Blackboard::new();
        let mut recorder = FlightRecorder::new(
            &board,
            BrokenSink,
            Duration::from_millis(250),
            Duration::from_millis(1),
        );
        assert!(!recorder.is_healthy());
        board.log.record(LogEntry::Snapshot(5, TelemetrySnapshot::new()));
        assert_eq!(recorder.tick(Instant::from_secs(1)), Ok(TaskStatus::Worked));
    }
}
