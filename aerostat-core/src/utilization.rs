use embassy_time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub usize);

pub const MAX_TASKS: usize = 16;

/// Runtime accounting for one scheduled task, in clock ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStats {
    /// Ticks offered to the task.
    pub runs: u32,
    /// Ticks that reported real work.
    pub worked: u32,
    pub busy_ticks: u64,
    /// Longest single tick.
    pub max_ticks: u64,
    /// Avg tick duration, EMA with alpha = 0.1.
    pub avg_ticks: u64,
    pub budget_overruns: u32,
    /// Times the task was resynchronised after falling a period behind.
    pub late_starts: u32,
    pub last_run: Option<Instant>,
}

impl TaskStats {
    pub const fn new() -> Self {
        Self {
            runs: 0,
            worked: 0,
            busy_ticks: 0,
            max_ticks: 0,
            avg_ticks: 0,
            budget_overruns: 0,
            late_starts: 0,
            last_run: None,
        }
    }

    /// Account for one tick that started at `started` and took `took`.
    /// Returns true if the tick ran over `budget`.
    pub fn record(
        &mut self,
        started: Instant,
        took: Duration,
        worked: bool,
        budget: Option<Duration>,
    ) -> bool {
        let ticks = took.as_ticks();
        self.runs = self.runs.saturating_add(1);
        if worked {
            self.worked = self.worked.saturating_add(1);
        }
        self.busy_ticks = self.busy_ticks.saturating_add(ticks);
        self.max_ticks = self.max_ticks.max(ticks);
        // avg_new = (value + 9 * avg_old) / 10
        self.avg_ticks = if self.runs == 1 {
            ticks
        } else {
            (ticks + 9 * self.avg_ticks) / 10
        };
        self.last_run = Some(started);

        let over = budget.is_some_and(|b| took > b);
        if over {
            self.budget_overruns = self.budget_overruns.saturating_add(1);
        }
        over
    }

    pub fn record_late_start(&mut self) {
        self.late_starts = self.late_starts.saturating_add(1);
    }

    /// Share of `window` spent inside this task, in tenths of a percent.
    pub fn utilization_permille(&self, window: Duration) -> u32 {
        let window = window.as_ticks();
        if window == 0 {
            return 0;
        }
        (self.busy_ticks.saturating_mul(1000) / window).min(1000) as u32
    }
}
