use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use crossbeam_utils::CachePadded;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateError {
    #[error("Event channel torn down")]
    Closed,
}

struct GateState {
    pending: bool,
    closed: bool,
}

/// The wake primitive behind one device's event channel.
///
/// Pending state is a single coalescing flag, not a queue: any number of
/// signals delivered before a wait collapse into one unblock. The flag is
/// checked and cleared under the same mutex a waiter registers under, so a
/// signal that lands strictly before a wait begins still unblocks that wait
/// immediately.
pub struct EventGate {
    state: Mutex<GateState>,
    cond: Condvar,
    delivered: CachePadded<AtomicU32>,
}

impl EventGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                pending: false,
                closed: false,
            }),
            cond: Condvar::new(),
            delivered: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Marks an event delivered and wakes waiters.
    ///
    /// Called from the dispatch context: takes the gate mutex briefly and
    /// never allocates. Signals against a closed gate are dropped.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.pending = true;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Blocks until an event has been (or already was) delivered.
    ///
    /// Returns the positive delivery counter as an opaque token; given the
    /// coalescing flag it is not a per-occurrence tally.
    ///
    /// # Errors
    /// Returns `GateError::Closed` without blocking once the channel is torn
    /// down, including for waiters already parked when close happens.
    pub fn wait(&self) -> Result<u32, GateError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.pending {
                state.pending = false;
                return Ok(self.delivered.load(Ordering::Relaxed).max(1));
            }
            if state.closed {
                return Err(GateError::Closed);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Tears the channel down, unblocking every parked waiter with an error.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Total signals accepted so far.
    pub fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Default for EventGate {
    fn default() -> Self {
        Self::new()
    }
}
