use crate::config::SqlGraphConfig;
use crate::control::Controller;
use crate::coordinator::ExecutionCoordinator;
use crate::descriptor::{Arg, RequestDescriptor};
use crate::engine::{QueryRows, SqlEngine};
use crate::epoch::EpochClock;
use crate::error::{Result, SqlGraphError};
use crate::gate::Gate;
use crate::handle::{Handle, HandleKind};
use crate::release::ReleaseQueue;
use crate::resolve::Resolver;
use crate::status::Status;
use crate::store::{StoredFragment, StoredPlot, StoredResult, Stores};
use crate::topic::{run_topic, SubscriptionId, TopicCell, TopicState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;

/// Receiver for values that arrive after `subscribe` has returned.
pub trait Host: Send + Sync {
    fn push_update(&self, subscription_id: SubscriptionId, value: String);
}

impl<F> Host for F
where
    F: Fn(SubscriptionId, String) + Send + Sync,
{
    fn push_update(&self, subscription_id: SubscriptionId, value: String) {
        self(subscription_id, value)
    }
}

/// State shared by the service and every topic worker.
pub(crate) struct Shared {
    pub(crate) config: SqlGraphConfig,
    pub(crate) stores: Arc<Stores>,
    pub(crate) clock: Arc<EpochClock>,
    pub(crate) coordinator: Arc<ExecutionCoordinator>,
    pub(crate) control: Controller,
    pub(crate) config_gate: Gate,
    pub(crate) releases: ReleaseQueue,
    pub(crate) host: Arc<dyn Host>,
}

impl Shared {
    pub(crate) fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.stores), Some(self.releases.clone()))
    }
}

/// The SQL handle graph service.
///
/// Owns the stores, the epoch clock, the engine coordinator and the topic
/// table; construct one per process and pass it to the host bridge.
pub struct SqlGraph {
    shared: Arc<Shared>,
    topics: Mutex<HashMap<SubscriptionId, Arc<TopicCell>>>,
}

impl SqlGraph {
    pub fn new(
        engine: Box<dyn SqlEngine>,
        host: Arc<dyn Host>,
        config: SqlGraphConfig,
    ) -> io::Result<Self> {
        let config = config.normalized();
        let clock = EpochClock::new();
        let coordinator = Arc::new(ExecutionCoordinator::new(
            engine,
            config.interactive_lock_timeout(),
        ));
        let releases = ReleaseQueue::spawn(Arc::clone(&coordinator))?;
        let control = Controller::new(Arc::clone(&clock), Arc::clone(&coordinator));
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                stores: Arc::new(Stores::new()),
                clock,
                coordinator,
                control,
                config_gate: Gate::new(false),
                releases,
                host,
            }),
            topics: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SqlGraphConfig {
        &self.shared.config
    }

    /// Start (or restart) a subscription and return its initial value.
    ///
    /// If the request finishes within the latency budget the initial value is
    /// the final one. Otherwise a `#BLOCKED!` placeholder is returned and the
    /// final value is delivered once through [`Host::push_update`].
    pub fn subscribe(&self, id: SubscriptionId, descriptor: RequestDescriptor) -> String {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let cell = Arc::new(TopicCell::new(
            id,
            descriptor,
            self.shared.clock.token(),
            reply_tx,
        ));

        if let Some(previous) = self.topics.lock().insert(id, Arc::clone(&cell)) {
            log::warn!("subscription {id} reused; replacing live topic");
            self.release_topic(&previous);
        }

        let spawned = {
            let shared = Arc::clone(&self.shared);
            let cell = Arc::clone(&cell);
            thread::Builder::new()
                .name(format!("formula-sql-topic-{id}"))
                .spawn(move || run_topic(shared, cell))
        };
        if let Err(err) = spawned {
            log::error!("subscription {id}: failed to spawn topic worker: {err}");
            self.unsubscribe(id);
            return Status::error("engine", format!("failed to start worker: {err}")).to_string();
        }

        match reply_rx.recv_timeout(self.shared.config.latency_budget()) {
            Ok(value) => value,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                cell.detach(|| reply_rx.try_recv().ok())
            }
        }
    }

    /// Tear down a subscription. Never blocks on engine cleanup.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some(cell) = self.topics.lock().remove(&id) else {
            log::debug!("unsubscribe for unknown subscription {id}");
            return;
        };
        self.release_topic(&cell);
    }

    fn release_topic(&self, cell: &TopicCell) {
        if let Some(handle) = cell.disconnect() {
            if let Some(evicted) = self.shared.stores.decrement(&handle) {
                log::debug!("last reference to {handle} dropped");
                self.shared.releases.release(evicted);
            }
        }
    }

    pub fn topic_state(&self, id: SubscriptionId) -> Option<TopicState> {
        let cell = self.topics.lock().get(&id).cloned()?;
        Some(cell.state())
    }

    pub fn topic_handle(&self, id: SubscriptionId) -> Option<Handle> {
        let cell = self.topics.lock().get(&id).cloned()?;
        cell.handle()
    }

    /// Epoch the topic last dispatched under.
    pub fn topic_epoch(&self, id: SubscriptionId) -> Option<u64> {
        let cell = self.topics.lock().get(&id).cloned()?;
        Some(cell.epoch())
    }

    pub fn interrupt(&self) -> u64 {
        self.shared.control.interrupt()
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.control.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.control.is_paused()
    }

    pub fn epoch(&self) -> u64 {
        self.shared.clock.current()
    }

    /// Release every request waiting on configuration.
    pub fn mark_configured(&self) {
        if !self.shared.config_gate.open() {
            log::debug!("configuration ready");
        }
    }

    pub fn is_configured(&self) -> bool {
        self.shared.config_gate.is_open()
    }

    /// Run an administrative statement (e.g. startup configuration). Waits
    /// for the engine however long it takes.
    pub fn execute_admin(&self, sql: &str) -> Result<QueryRows> {
        self.shared
            .coordinator
            .run_admin(|engine| engine.execute(sql))
            .map_err(SqlGraphError::from)
    }

    /// First rows of a table or fragment (plots preview their data).
    /// Interactive: reports [`SqlGraphError::Busy`] instead of waiting long.
    pub fn preview(&self, raw: &str) -> Result<QueryRows> {
        let Some(mut handle) = Handle::parse(raw) else {
            return Err(SqlGraphError::ArgumentMismatch(format!(
                "{raw:?} is not a handle"
            )));
        };
        if handle.kind == HandleKind::Plot {
            let plot = self
                .shared
                .stores
                .plots
                .get(&handle)
                .ok_or_else(|| SqlGraphError::NotFound(handle.to_string()))?;
            handle = plot.data;
        }

        let limit = self.shared.config.preview_row_limit as i64;
        let resolved = self.shared.resolver().resolve(
            "SELECT * FROM ? LIMIT ?",
            &[Arg::Ref(handle.to_string()), Arg::from(limit)],
        )?;
        let token = self.shared.clock.token();
        self.shared
            .coordinator
            .run_interactive(&token, |engine| engine.execute(&resolved.sql))
    }

    /// Fully resolved SQL for display. Table pins are released immediately.
    pub fn resolve(&self, sql: &str, args: &[Arg]) -> Result<String> {
        let resolved = self.shared.resolver().resolve(sql, args)?;
        Ok(resolved.sql.clone())
    }

    pub fn table(&self, raw: &str) -> Option<Arc<StoredResult>> {
        self.shared.stores.tables.get_str(raw)
    }

    pub fn fragment(&self, raw: &str) -> Option<Arc<StoredFragment>> {
        self.shared.stores.fragments.get_str(raw)
    }

    pub fn plot(&self, raw: &str) -> Option<Arc<StoredPlot>> {
        self.shared.stores.plots.get_str(raw)
    }

    pub fn refcount(&self, raw: &str) -> Option<usize> {
        Handle::parse(raw).and_then(|handle| self.shared.stores.refcount(&handle))
    }

    /// Block until all queued release actions have run.
    pub fn flush_releases(&self) {
        self.shared.releases.flush();
    }
}
