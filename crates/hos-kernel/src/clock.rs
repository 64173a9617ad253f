//! Logical clock
//!
//! Guest-visible time is host time minus the time spent suspended, so
//! timers freeze while emulation is paused and resume without a jump.

use std::sync::{Arc, Mutex};

use hos_hal::HAL;

use crate::lock;

/// Frequency of the guest system tick counter.
pub const TICK_FREQUENCY: u64 = 19_200_000;

const NANOS_PER_SECOND: u128 = 1_000_000_000;

#[derive(Debug, Default)]
struct ClockState {
    /// Host time when suspension started.
    suspended_at: Option<u64>,
    /// Total host nanoseconds spent suspended.
    suspended_total: u64,
}

/// Suspendable monotonic tick source.
pub struct TickSource {
    hal: Arc<dyn HAL>,
    epoch: u64,
    state: Mutex<ClockState>,
}

impl TickSource {
    pub fn new(hal: Arc<dyn HAL>) -> Self {
        let epoch = hal.now_nanos();
        Self {
            hal,
            epoch,
            state: Mutex::new(ClockState::default()),
        }
    }

    /// Guest nanoseconds since the clock was created.
    pub fn elapsed_nanos(&self) -> u64 {
        let state = lock(&self.state);
        let now = state.suspended_at.unwrap_or_else(|| self.hal.now_nanos());
        now.saturating_sub(self.epoch)
            .saturating_sub(state.suspended_total)
    }

    /// Guest ticks at [`TICK_FREQUENCY`].
    pub fn ticks(&self) -> u64 {
        let nanos = self.elapsed_nanos() as u128;
        (nanos * TICK_FREQUENCY as u128 / NANOS_PER_SECOND) as u64
    }

    /// Freeze guest time. Nested calls are ignored.
    pub fn suspend(&self) {
        let mut state = lock(&self.state);
        if state.suspended_at.is_none() {
            state.suspended_at = Some(self.hal.now_nanos());
        }
    }

    /// Unfreeze guest time.
    pub fn resume(&self) {
        let mut state = lock(&self.state);
        if let Some(at) = state.suspended_at.take() {
            state.suspended_total += self.hal.now_nanos().saturating_sub(at);
        }
    }

    pub fn is_suspended(&self) -> bool {
        lock(&self.state).suspended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use hos_hal::HalError;

    struct ManualClock(AtomicU64);

    impl HAL for ManualClock {
        fn memory_size(&self) -> u64 {
            0
        }
        fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<(), HalError> {
            Err(HalError::OutOfRange {
                address,
                len: buf.len() as u64,
            })
        }
        fn write_memory(&self, address: u64, data: &[u8]) -> Result<(), HalError> {
            Err(HalError::OutOfRange {
                address,
                len: data.len() as u64,
            })
        }
        fn now_nanos(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
        fn debug_write(&self, _msg: &str) {}
    }

    fn clock() -> (Arc<ManualClock>, TickSource) {
        let hal = Arc::new(ManualClock(AtomicU64::new(1_000)));
        let source = TickSource::new(hal.clone());
        (hal, source)
    }

    #[test]
    fn test_ticks_follow_host_time() {
        let (hal, source) = clock();
        hal.0.fetch_add(1_000_000_000, Ordering::SeqCst);
        assert_eq!(source.ticks(), TICK_FREQUENCY);
    }

    #[test]
    fn test_suspended_time_is_excluded() {
        let (hal, source) = clock();
        hal.0.fetch_add(500, Ordering::SeqCst);
        source.suspend();
        hal.0.fetch_add(10_000, Ordering::SeqCst);
        assert_eq!(source.elapsed_nanos(), 500);
        source.resume();
        hal.0.fetch_add(100, Ordering::SeqCst);
        assert_eq!(source.elapsed_nanos(), 600);
        assert!(!source.is_suspended());
    }

    #[test]
    fn test_nested_suspend_keeps_first_instant() {
        let (hal, source) = clock();
        source.suspend();
        hal.0.fetch_add(50, Ordering::SeqCst);
        source.suspend();
        hal.0.fetch_add(50, Ordering::SeqCst);
        source.resume();
        assert_eq!(source.elapsed_nanos(), 0);
    }
}
