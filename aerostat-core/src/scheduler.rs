//! Cooperative round-robin scheduler.
//!
//! Every task is offered one tick per round, in spawn order. Periodic tasks
//! only run once their deadline has passed; best-effort tasks are offered
//! every round and say whether they had work. A round in which nothing
//! worked ends with the clock idling until the next deadline.
//!
//! A task returning `Err(SchedulerFatal)` stops the loop: the fault is
//! reported, `Task::safe` runs on every task, and the error is returned.
//! Panics are not caught; the profiles abort on panic.

use core::cell::Cell;
use core::convert::Infallible;

use embassy_time::{Duration, Instant};

use crate::error::SchedulerFatal;
use crate::log::{FlightEvent, FlightLog};
use crate::utilization::{MAX_TASKS, TaskId, TaskStats};

/// Time source for the scheduler. Tasks receive `now` from the scheduler and
/// never read a clock themselves.
pub trait Clock {
    fn now(&self) -> Instant;
    /// Give up the processor until `deadline`. May return early.
    fn idle_until(&self, deadline: Instant);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn idle_until(&self, deadline: Instant) {
        (**self).idle_until(deadline)
    }
}

/// Virtual time. Idling jumps straight to the deadline.
pub struct ManualClock {
    ticks: Cell<u64>,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self {
            ticks: Cell::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.ticks.set(self.ticks.get().saturating_add(by.as_ticks()));
    }

    pub fn set(&self, at: Instant) {
        self.ticks.set(at.as_ticks());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.get())
    }

    fn idle_until(&self, deadline: Instant) {
        if deadline.as_ticks() > self.ticks.get() {
            self.ticks.set(deadline.as_ticks());
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cadence {
    Periodic(Duration),
    BestEffort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskSpec {
    pub name: &'static str,
    pub cadence: Cadence,
    /// Longest acceptable tick. Longer ticks are counted and reported.
    pub budget: Option<Duration>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskStatus {
    Worked,
    Idle,
}

pub trait Task {
    fn spec(&self) -> TaskSpec;

    /// Do one unit of work and return. Must not wait on anything.
    fn tick(&mut self, now: Instant) -> Result<TaskStatus, SchedulerFatal>;

    /// Put owned hardware in its safe state. Called on fatal faults and on
    /// shutdown.
    fn safe(&mut self) {}
}

struct Slot<'t> {
    task: &'t mut (dyn Task + 't),
    spec: TaskSpec,
    next_due: Instant,
    stats: TaskStats,
}

pub struct Scheduler<'t, C: Clock, const N: usize = MAX_TASKS> {
    clock: C,
    log: &'t FlightLog,
    idle_backoff: Duration,
    slots: heapless::Vec<Slot<'t>, N>,
}

impl<'t, C: Clock, const N: usize> Scheduler<'t, C, N> {
    pub fn new(clock: C, log: &'t FlightLog, idle_backoff: Duration) -> Self {
        Self {
            clock,
            log,
            idle_backoff,
            slots: heapless::Vec::new(),
        }
    }

    /// Register a task. Its first tick is due immediately.
    pub fn spawn(&mut self, task: &'t mut (dyn Task + 't)) -> Result<TaskId, SchedulerFatal> {
        let spec = task.spec();
        let slot = Slot {
            task,
            spec,
            next_due: self.clock.now(),
            stats: TaskStats::new(),
        };
        self.slots
            .push(slot)
            .map_err(|_| SchedulerFatal::TaskTableFull)?;
        log::debug!("spawned task {} ({:?})", spec.name, spec.cadence);
        Ok(TaskId(self.slots.len() - 1))
    }

    /// Run one round. Returns whether any task did work.
    pub fn step(&mut self) -> Result<bool, SchedulerFatal> {
        let mut any_worked = false;
        for i in 0..self.slots.len() {
            let now = self.clock.now();
            let slot = &mut self.slots[i];

            if let Cadence::Periodic(period) = slot.spec.cadence {
                if now < slot.next_due {
                    continue;
                }
                let late_by = now.saturating_duration_since(slot.next_due);
                if late_by > period {
                    slot.stats.record_late_start();
                    slot.next_due = now + period;
                    self.log.report(
                        now,
                        FlightEvent::Overrun {
                            task: slot.spec.name,
                            late_by_us: late_by.as_micros(),
                        },
                    );
                } else {
                    slot.next_due += period;
                }
            }

            let result = slot.task.tick(now);
            let took = self.clock.now().saturating_duration_since(now);
            let status = match result {
                Ok(status) => status,
                Err(fatal) => return Err(self.fail(fatal)),
            };

            let worked = status == TaskStatus::Worked;
            any_worked |= worked;
            if slot.stats.record(now, took, worked, slot.spec.budget) {
                self.log.report(
                    now,
                    FlightEvent::BudgetExceeded {
                        task: slot.spec.name,
                        took_us: took.as_micros(),
                    },
                );
            }
        }
        Ok(any_worked)
    }

    /// Run forever. Only a fatal fault returns.
    pub fn run(&mut self) -> Result<Infallible, SchedulerFatal> {
        loop {
            self.round()?;
        }
    }

    /// Run until `stop` says so, then put every task in its safe state.
    pub fn run_until(
        &mut self,
        mut stop: impl FnMut(Instant) -> bool,
    ) -> Result<(), SchedulerFatal> {
        while !stop(self.clock.now()) {
            self.round()?;
        }
        log::info!("scheduler stopped");
        self.make_safe();
        Ok(())
    }

    pub fn stats(&self, id: TaskId) -> Option<&TaskStats> {
        self.slots.get(id.0).map(|slot| &slot.stats)
    }

    pub fn task_stats(&self) -> impl Iterator<Item = (&'static str, &TaskStats)> + '_ {
        self.slots.iter().map(|slot| (slot.spec.name, &slot.stats))
    }

    fn round(&mut self) -> Result<(), SchedulerFatal> {
        if !self.step()? {
            self.idle();
        }
        Ok(())
    }

    fn idle(&self) {
        let now = self.clock.now();
        let backoff = now + self.idle_backoff;
        let mut deadline: Option<Instant> = None;
        let mut has_best_effort = false;
        for slot in &self.slots {
            match slot.spec.cadence {
                Cadence::Periodic(_) => {
                    deadline = Some(deadline.map_or(slot.next_due, |d| d.min(slot.next_due)));
                }
                Cadence::BestEffort => has_best_effort = true,
            }
        }
        // Best-effort tasks are polled again after the back-off at the latest.
        let deadline = match deadline {
            Some(d) if has_best_effort => d.min(backoff),
            Some(d) => d,
            None => backoff,
        };
        if deadline > now {
            self.clock.idle_until(deadline);
        }
    }

    fn fail(&mut self, fatal: SchedulerFatal) -> SchedulerFatal {
        self.log.report(self.clock.now(), FlightEvent::Fatal(fatal));
        self.make_safe();
        fatal
    }

    fn make_safe(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.task.safe();
        }
    }
}

/// Spawn `tasks` in order and run them forever.
pub fn run<C: Clock>(
    clock: C,
    log: &FlightLog,
    idle_backoff: Duration,
    tasks: &mut [&mut dyn Task],
) -> Result<Infallible, SchedulerFatal> {
    let mut scheduler: Scheduler<'_, C> = Scheduler::new(clock, log, idle_backoff);
    for task in tasks.iter_mut() {
        scheduler.spawn(&mut **task)?;
    }
    scheduler.run()
}
