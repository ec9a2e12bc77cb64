use crate::coordinator::ExecutionCoordinator;
use crate::store::Evicted;
use std::io;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

enum Job {
    Evicted(Evicted),
    Relation(String),
    Flush(Sender<()>),
}

/// Background worker for release actions.
///
/// Eviction happens on whatever thread drops the last reference (often the
/// host's unsubscribe call, or a worker still holding the engine lock), so
/// the engine-side cleanup is queued here instead of run inline. Enqueueing
/// never blocks.
#[derive(Clone)]
pub struct ReleaseQueue {
    tx: Sender<Job>,
}

impl ReleaseQueue {
    pub fn spawn(coordinator: Arc<ExecutionCoordinator>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("formula-sql-release".to_string())
            .spawn(move || {
                for job in rx {
                    match job {
                        Job::Evicted(Evicted::Table(result)) => {
                            drop_relation(&coordinator, &result.relation)
                        }
                        Job::Evicted(Evicted::Fragment(_)) | Job::Evicted(Evicted::Plot(_)) => {}
                        Job::Relation(name) => drop_relation(&coordinator, &name),
                        Job::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })?;
        Ok(Self { tx })
    }

    pub fn release(&self, evicted: Evicted) {
        self.send(Job::Evicted(evicted));
    }

    /// Drop a relation that never made it into a store (cancelled or
    /// disconnected before registration).
    pub fn release_relation(&self, name: String) {
        self.send(Job::Relation(name));
    }

    /// Block until every job queued before this call has run.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.send(Job::Flush(ack_tx));
        let _ = ack_rx.recv();
    }

    fn send(&self, job: Job) {
        if self.tx.send(job).is_err() {
            log::warn!("release worker has exited; dropping release job");
        }
    }
}

fn drop_relation(coordinator: &ExecutionCoordinator, name: &str) {
    let mut result = coordinator.run_admin(|engine| engine.drop_temp_relation(name));
    // An interrupt aimed at other work can land on the DROP; the relation
    // would otherwise leak for the rest of the session.
    if result.as_ref().is_err_and(|err| err.is_interrupted()) {
        log::debug!("drop of temp relation {name} was interrupted; retrying");
        result = coordinator.run_admin(|engine| engine.drop_temp_relation(name));
    }
    match result {
        Ok(()) => log::debug!("dropped temp relation {name}"),
        Err(err) => log::warn!("failed to drop temp relation {name}: {err}"),
    }
}
