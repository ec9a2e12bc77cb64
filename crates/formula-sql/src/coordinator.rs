//! Serialized access to the single SQL engine.
//!
//! The engine runs one statement at a time, so every statement goes through
//! one lock. Callers pick an acquisition policy by class:
//!
//! | caller                          | wait      | on contention |
//! |---------------------------------|-----------|---------------|
//! | background (topic workers)      | unbounded | waits         |
//! | interactive (host-thread reads) | bounded   | `Busy`        |
//! | administrative                  | unbounded | waits         |
//!
//! Background and interactive callers check their cancel token both before
//! and after taking the lock, so work queued behind an interrupt never runs.

use crate::engine::{Interrupter, SqlEngine};
use crate::epoch::CancelToken;
use crate::error::{EngineError, Result, SqlGraphError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct ExecutionCoordinator {
    engine: Mutex<Box<dyn SqlEngine>>,
    interrupter: Arc<dyn Interrupter>,
    interactive_timeout: Duration,
    next_relation: AtomicU64,
}

impl ExecutionCoordinator {
    pub fn new(engine: Box<dyn SqlEngine>, interactive_timeout: Duration) -> Self {
        let interrupter = engine.interrupter();
        Self {
            engine: Mutex::new(engine),
            interrupter,
            interactive_timeout,
            next_relation: AtomicU64::new(1),
        }
    }

    /// Fresh temp relation name; never reused within the process.
    pub fn next_relation_name(&self) -> String {
        format!("__fsql_t{}", self.next_relation.fetch_add(1, Ordering::Relaxed))
    }

    pub fn run_background<T>(
        &self,
        token: &CancelToken,
        op: impl FnOnce(&mut dyn SqlEngine) -> std::result::Result<T, EngineError>,
    ) -> Result<T> {
        token.check()?;
        let mut engine = self.engine.lock();
        token.check()?;
        op(&mut **engine).map_err(SqlGraphError::from)
    }

    pub fn run_interactive<T>(
        &self,
        token: &CancelToken,
        op: impl FnOnce(&mut dyn SqlEngine) -> std::result::Result<T, EngineError>,
    ) -> Result<T> {
        token.check()?;
        let Some(mut engine) = self.engine.try_lock_for(self.interactive_timeout) else {
            log::debug!(
                "interactive caller timed out after {:?} waiting for the engine",
                self.interactive_timeout
            );
            return Err(SqlGraphError::Busy);
        };
        token.check()?;
        op(&mut **engine).map_err(SqlGraphError::from)
    }

    /// Unbounded, uncancellable access for statements that must not be
    /// dropped (startup configuration, relation cleanup).
    pub fn run_admin<T>(
        &self,
        op: impl FnOnce(&mut dyn SqlEngine) -> std::result::Result<T, EngineError>,
    ) -> std::result::Result<T, EngineError> {
        let mut engine = self.engine.lock();
        op(&mut **engine)
    }

    /// Best-effort abort of whatever statement is running right now.
    pub fn interrupt_current(&self) {
        self.interrupter.interrupt_current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::EpochClock;
    use crate::sqlite::SqliteEngine;
    use std::sync::mpsc;
    use std::thread;

    fn coordinator(timeout_ms: u64) -> Arc<ExecutionCoordinator> {
        let engine = SqliteEngine::open_in_memory().expect("open sqlite");
        Arc::new(ExecutionCoordinator::new(
            Box::new(engine),
            Duration::from_millis(timeout_ms),
        ))
    }

    #[test]
    fn interactive_callers_get_busy_while_the_engine_is_held() {
        let coordinator = coordinator(100);
        let clock = EpochClock::new();
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let coordinator = Arc::clone(&coordinator);
            let token = clock.token();
            thread::spawn(move || {
                coordinator.run_background(&token, |_engine| {
                    held_tx.send(()).expect("signal held");
                    release_rx.recv().expect("wait for release");
                    Ok(())
                })
            })
        };

        held_rx.recv().expect("engine held");
        let busy = coordinator.run_interactive(&clock.token(), |e| e.execute("SELECT 1"));
        assert_eq!(busy.expect_err("engine is held"), SqlGraphError::Busy);

        release_tx.send(()).expect("release holder");
        holder.join().expect("holder thread").expect("holder op");
        assert!(coordinator
            .run_interactive(&clock.token(), |e| e.execute("SELECT 1"))
            .is_ok());
    }

    #[test]
    fn stale_tokens_never_reach_the_engine() {
        let coordinator = coordinator(100);
        let clock = EpochClock::new();
        let token = clock.token();
        clock.advance();

        let mut ran = false;
        let result = coordinator.run_background(&token, |_| {
            ran = true;
            Ok(())
        });
        assert_eq!(result, Err(SqlGraphError::Cancelled));
        assert!(!ran);
    }

    #[test]
    fn waiter_that_acquires_after_an_interrupt_aborts() {
        let coordinator = coordinator(100);
        let clock = EpochClock::new();
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let holder = {
            let coordinator = Arc::clone(&coordinator);
            let token = clock.token();
            thread::spawn(move || {
                coordinator.run_background(&token, |_| {
                    held_tx.send(()).expect("signal held");
                    release_rx.recv().expect("wait for release");
                    Ok(())
                })
            })
        };
        held_rx.recv().expect("engine held");

        // Queue a waiter under the current epoch, then interrupt.
        let waiter = {
            let coordinator = Arc::clone(&coordinator);
            let token = clock.token();
            thread::spawn(move || coordinator.run_background(&token, |e| e.execute("SELECT 1")))
        };
        thread::sleep(Duration::from_millis(20));
        clock.advance();
        release_tx.send(()).expect("release holder");

        let _ = holder.join().expect("holder thread");
        assert_eq!(
            waiter.join().expect("waiter thread"),
            Err(SqlGraphError::Cancelled)
        );
    }

    #[test]
    fn relation_names_are_unique() {
        let coordinator = coordinator(100);
        let a = coordinator.next_relation_name();
        let b = coordinator.next_relation_name();
        assert_ne!(a, b);
        assert!(a.starts_with("__fsql_t"));
    }
}
