use aerostat_core::scheduler::{Clock, ManualClock};
use embassy_time::Instant;

/// Real time from the embassy std driver. Idling sleeps the thread.
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn idle_until(&self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.as_ticks() > 0 {
            std::thread::sleep(std::time::Duration::from_micros(remaining.as_micros()));
        }
    }
}

/// Either real time or virtual time, picked on the command line.
pub enum SimClock {
    Wall(WallClock),
    Virtual(ManualClock),
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        match self {
            SimClock::Wall(clock) => clock.now(),
            SimClock::Virtual(clock) => clock.now(),
        }
    }

    fn idle_until(&self, deadline: Instant) {
        match self {
            SimClock::Wall(clock) => clock.idle_until(deadline),
            SimClock::Virtual(clock) => clock.idle_until(deadline),
        }
    }
}
