use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Reusable open/closed gate that any number of threads can wait on.
///
/// Used for the pause gate (closed while paused) and the configuration gate
/// (opened once the host reports configuration is done).
#[derive(Debug)]
pub struct Gate {
    open: Mutex<bool>,
    cvar: Condvar,
}

impl Gate {
    pub fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            cvar: Condvar::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    /// Open the gate, releasing every waiter. Returns the previous state.
    pub fn open(&self) -> bool {
        let mut open = self.open.lock();
        let was_open = std::mem::replace(&mut *open, true);
        self.cvar.notify_all();
        was_open
    }

    /// Close the gate. Returns the previous state.
    pub fn close(&self) -> bool {
        std::mem::replace(&mut *self.open.lock(), false)
    }

    /// Block until the gate opens or `abandon` returns true.
    ///
    /// `abandon` is polled every `poll` interval; returns `true` if the gate
    /// was open when the wait ended.
    pub fn wait_open(&self, poll: Duration, abandon: impl Fn() -> bool) -> bool {
        let mut open = self.open.lock();
        while !*open {
            if abandon() {
                return false;
            }
            self.cvar.wait_for(&mut open, poll);
        }
        true
    }
}
