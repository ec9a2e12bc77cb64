use crate::error::{Result, SqlGraphError};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide interrupt counter.
///
/// Work captures the epoch when it is dispatched; an interrupt advances it,
/// which invalidates everything captured earlier. The counter sits behind a
/// read/write lock so [`EpochClock::commit_if_current`] can check and publish
/// in one step that no interrupt can split.
#[derive(Debug, Default)]
pub struct EpochClock {
    epoch: RwLock<u64>,
}

impl EpochClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> u64 {
        *self.epoch.read()
    }

    /// Establish a new epoch and return it.
    pub fn advance(&self) -> u64 {
        let mut epoch = self.epoch.write();
        *epoch += 1;
        *epoch
    }

    pub fn token(self: &Arc<Self>) -> CancelToken {
        CancelToken {
            epoch: self.current(),
            clock: Arc::clone(self),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run `publish` only if `token` is still live, with interrupts held off
    /// for the duration. `publish` must not touch the clock.
    pub fn commit_if_current<R>(&self, token: &CancelToken, publish: impl FnOnce() -> R) -> Result<R> {
        let epoch = self.epoch.read();
        if *epoch != token.epoch || token.cancelled.load(Ordering::SeqCst) {
            return Err(SqlGraphError::Cancelled);
        }
        Ok(publish())
    }
}

/// Captured epoch plus a per-owner cancel flag.
///
/// Clones share the cancel flag; [`CancelToken::refresh`] re-captures the
/// epoch without losing it.
#[derive(Debug, Clone)]
pub struct CancelToken {
    epoch: u64,
    clock: Arc<EpochClock>,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.clock.current() != self.epoch
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SqlGraphError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Adopt the current epoch, e.g. after waking from the pause gate.
    pub fn refresh(&mut self) {
        self.epoch = self.clock.current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_advance_strictly_increases_the_epoch() {
        let clock = EpochClock::new();
        let mut last = clock.current();
        for _ in 0..10 {
            let next = clock.advance();
            assert!(next > last);
            assert_eq!(clock.current(), next);
            last = next;
        }
    }

    #[test]
    fn tokens_go_stale_after_an_interrupt() {
        let clock = EpochClock::new();
        let mut token = clock.token();
        assert!(token.check().is_ok());
        clock.advance();
        assert_eq!(token.check(), Err(SqlGraphError::Cancelled));
        assert_eq!(clock.commit_if_current(&token, || ()), Err(SqlGraphError::Cancelled));

        token.refresh();
        assert!(token.check().is_ok());
        assert_eq!(clock.commit_if_current(&token, || 7), Ok(7));
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let clock = EpochClock::new();
        let token = clock.token();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(clock.commit_if_current(&token, || ()).is_err());
    }
}
