use core::cell::Cell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

/// A value together with the publish that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stamped<T: Copy> {
    pub value: T,
    /// Number of updates so far. `0` is the initial value.
    pub version: u32,
    pub updated_at: Option<Instant>,
}

/// A generic thread-safe container for Blackboard-style data sharing.
///
/// One writer replaces the whole value; any number of readers copy it out.
/// Value, version and timestamp change under the same critical section, so
/// a reader can never see half of an update.
pub struct DataCell<T: Copy> {
    storage: Mutex<CriticalSectionRawMutex, Cell<Stamped<T>>>,
}

impl<T: Copy> DataCell<T> {
    /// Create a new cell with an initial value.
    pub const fn new(init: T) -> Self {
        Self {
            storage: Mutex::new(Cell::new(Stamped {
                value: init,
                version: 0,
                updated_at: None,
            })),
        }
    }

    /// Publish a new value (The "Write").
    pub fn update(&self, data: T, at: Instant) {
        self.storage.lock(|cell| {
            let previous = cell.get();
            cell.set(Stamped {
                value: data,
                version: previous.version.wrapping_add(1),
                updated_at: Some(at),
            });
        });
    }

    /// Fetch the latest data from the cell (The "Read").
    pub fn read(&self) -> T {
        self.storage.lock(|cell| cell.get().value)
    }

    /// Fetch the latest data along with its version and publish time.
    pub fn read_stamped(&self) -> Stamped<T> {
        self.storage.lock(|cell| cell.get())
    }

    pub fn version(&self) -> u32 {
        self.storage.lock(|cell| cell.get().version)
    }

    /// When the current value was published, `None` before the first update.
    pub fn last_updated(&self) -> Option<Instant> {
        self.storage.lock(|cell| cell.get().updated_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datacell_init() {
        let cell = DataCell::new(42);
        assert_eq!(cell.read(), 42);
        assert_eq!(cell.version(), 0);
        assert_eq!(cell.last_updated(), None);
    }

    #[test]
    fn test_datacell_update() {
        let cell = DataCell::new(0);
        cell.update(100, Instant::from_millis(5));
        assert_eq!(cell.read(), 100);
        assert_eq!(cell.version(), 1);
        assert_eq!(cell.last_updated(), Some(Instant::from_millis(5)));
    }

    #[test]
    fn test_datacell_stamped_read_is_consistent() {
        #[derive(Copy, Clone, Default, PartialEq, Debug)]
        struct MyData {
            a: i32,
            b: f32,
        }
        let cell = DataCell::new(MyData::default());
        for i in 1..=3 {
            cell.update(
                MyData {
                    a: i,
                    b: i as f32 * 0.5,
                },
                Instant::from_millis(i as u64 * 10),
            );
        }
        let stamped = cell.read_stamped();
        assert_eq!(stamped.value, MyData { a: 3, b: 1.5 });
        assert_eq!(stamped.version, 3);
        assert_eq!(stamped.updated_at, Some(Instant::from_millis(30)));
    }
}
