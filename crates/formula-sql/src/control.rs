use crate::coordinator::ExecutionCoordinator;
use crate::epoch::EpochClock;
use crate::gate::Gate;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Interrupt and pause/resume for all in-flight work.
pub struct Controller {
    clock: Arc<EpochClock>,
    coordinator: Arc<ExecutionCoordinator>,
    /// Open while running, closed while paused.
    run_gate: Gate,
    /// Epoch established by the most recent pause.
    pause_epoch: AtomicU64,
}

impl Controller {
    pub fn new(clock: Arc<EpochClock>, coordinator: Arc<ExecutionCoordinator>) -> Self {
        Self {
            clock,
            coordinator,
            run_gate: Gate::new(true),
            pause_epoch: AtomicU64::new(0),
        }
    }

    /// Invalidate everything dispatched so far and abort the running statement.
    ///
    /// Work waiting on the engine lock sees the new epoch once it gets the
    /// lock and bails out; the running statement gets the engine's own abort.
    pub fn interrupt(&self) -> u64 {
        let epoch = self.clock.advance();
        self.coordinator.interrupt_current();
        log::debug!("interrupted in-flight work; epoch is now {epoch}");
        epoch
    }

    pub fn is_paused(&self) -> bool {
        !self.run_gate.is_open()
    }

    /// Pausing closes the gate and records its epoch before interrupting, so
    /// anything aborted by the interrupt can tell it was the pause.
    pub fn set_paused(&self, paused: bool) {
        if paused {
            if self.run_gate.close() {
                let epoch = self.clock.advance();
                self.pause_epoch.fetch_max(epoch, Ordering::SeqCst);
                self.coordinator.interrupt_current();
                log::debug!("execution paused; epoch is now {epoch}");
            }
        } else if !self.run_gate.open() {
            log::debug!("execution resumed");
        }
    }

    /// Whether work dispatched at `epoch` was invalidated by a pause.
    ///
    /// Reads the recorded pause epoch rather than the live flag, so a resume
    /// that races ahead of the cancelled worker does not turn the pause into
    /// a failure.
    pub fn cancelled_by_pause(&self, epoch: u64) -> bool {
        self.is_paused() || self.pause_epoch.load(Ordering::SeqCst) > epoch
    }

    /// Block while paused; gives up once `abandon` returns true.
    pub fn wait_unpaused(&self, poll: Duration, abandon: impl Fn() -> bool) -> bool {
        self.run_gate.wait_open(poll, abandon)
    }
}
