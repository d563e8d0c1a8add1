//! Bounded admission gate for propagation actions
//!
//! At most `capacity` actions run inside a region at once. The capacity can
//! be changed while actions are running: growing it admits waiters right
//! away, shrinking it only delays new admissions until enough running
//! actions have finished. Running actions are never interrupted.

use ferrosync_types::{Error, Result};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tracing::{debug, trace};

#[derive(Debug)]
struct RegionState {
    capacity: usize,
    in_flight: usize,
    peak: usize,
    /// Permits owed after a shrink; paid back by releases instead of
    /// returning them to the semaphore
    debt: usize,
}

/// Counting gate limiting how many actions run at once
#[derive(Debug)]
pub struct ActionRegion {
    permits: Semaphore,
    state: Mutex<RegionState>,
}

impl ActionRegion {
    /// Create a region admitting up to `capacity` actions (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Semaphore::new(capacity),
            state: Mutex::new(RegionState {
                capacity,
                in_flight: 0,
                peak: 0,
                debt: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current capacity
    pub fn capacity(&self) -> usize {
        self.state().capacity
    }

    /// Number of actions currently admitted
    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }

    /// Highest number of actions admitted at once since the last reset
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak
    }

    /// Forget the recorded peak
    pub fn reset_peak(&self) {
        let mut state = self.state();
        state.peak = state.in_flight;
    }

    /// Change the capacity; running actions are unaffected
    pub fn resize(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let mut state = self.state();
        if state.capacity == capacity {
            return;
        }
        debug!(
            "Resizing action region from {} to {} ({} in flight)",
            state.capacity, capacity, state.in_flight
        );

        if capacity > state.capacity {
            let grow = capacity - state.capacity;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            self.permits.add_permits(grow - repaid);
        } else {
            // Take idle permits now; whatever is held by running actions
            // becomes debt collected as they finish
            for _ in 0..state.capacity - capacity {
                match self.permits.try_acquire() {
                    Ok(permit) => permit.forget(),
                    Err(_) => state.debt += 1,
                }
            }
        }
        state.capacity = capacity;
    }

    fn release(&self) {
        let mut state = self.state();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.debt > 0 {
            state.debt -= 1;
        } else {
            self.permits.add_permits(1);
        }
    }

    /// Wait until a slot is free and take it
    pub async fn admit(&self) -> Result<RegionPermit<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::fatal(format!("Failed to acquire action slot: {}", e)))?;
        // Slots are accounted in `state`; `release` hands the permit back
        permit.forget();

        let mut state = self.state();
        state.in_flight += 1;
        state.peak = state.peak.max(state.in_flight);
        trace!("Admitted action ({} in flight)", state.in_flight);
        Ok(RegionPermit { region: self })
    }

    /// Run `task` inside the region, releasing the slot however it ends
    pub async fn run<F: Future>(&self, task: F) -> Result<F::Output> {
        let _permit = self.admit().await?;
        Ok(task.await)
    }
}

/// Slot held inside an [`ActionRegion`]; released on drop
#[derive(Debug)]
pub struct RegionPermit<'a> {
    region: &'a ActionRegion,
}

impl Drop for RegionPermit<'_> {
    fn drop(&mut self) {
        self.region.release();
    }
}
