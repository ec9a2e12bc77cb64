//! Per-subscription lifecycle.
//!
//! ```text
//! Created -> { AwaitingConfig | AwaitingUnpause | Running }
//!         -> Completed(Ok | Err | Cancelled) | Skipped
//!         -> Disconnected            (host unsubscribe, from any state)
//! ```
//!
//! A topic is the only thing that holds a refcount on a handle on behalf of
//! its subscription: one increment on successful registration, one
//! decrement on disconnect.

use crate::descriptor::{Request, RequestDescriptor};
use crate::epoch::CancelToken;
use crate::error::{Result, SqlGraphError};
use crate::graph::Shared;
use crate::handle::{Handle, HandleKind};
use crate::status::{is_error_or_blocked, Status};
use crate::store::{StoredFragment, StoredPlot, StoredResult, Stores};
use parking_lot::{Mutex, MutexGuard};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

pub type SubscriptionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ok,
    Err,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    Created,
    AwaitingConfig,
    AwaitingUnpause,
    Running,
    Completed(Completion),
    /// Deferred work dropped by the stale-dependency guard.
    Skipped,
    Disconnected,
}

struct Topic {
    state: TopicState,
    handle: Option<Handle>,
    /// Epoch captured at the last dispatch.
    epoch: u64,
    token: CancelToken,
    /// Present until `subscribe` has returned; afterwards results are pushed.
    sync_reply: Option<SyncSender<String>>,
}

pub(crate) struct TopicCell {
    id: SubscriptionId,
    descriptor: RequestDescriptor,
    topic: Mutex<Topic>,
}

impl TopicCell {
    pub(crate) fn new(
        id: SubscriptionId,
        descriptor: RequestDescriptor,
        token: CancelToken,
        sync_reply: SyncSender<String>,
    ) -> Self {
        Self {
            id,
            descriptor,
            topic: Mutex::new(Topic {
                state: TopicState::Created,
                handle: None,
                epoch: token.epoch(),
                token,
                sync_reply: Some(sync_reply),
            }),
        }
    }

    pub(crate) fn state(&self) -> TopicState {
        self.topic.lock().state
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.topic.lock().handle
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.topic.lock().epoch
    }

    fn is_disconnected(&self) -> bool {
        self.topic.lock().state == TopicState::Disconnected
    }

    /// Move to a waiting state unless the host already unsubscribed.
    fn wait_in(&self, state: TopicState) -> bool {
        let mut topic = self.topic.lock();
        if topic.state == TopicState::Disconnected {
            return false;
        }
        topic.state = state;
        true
    }

    /// Enter `Running` under a freshly captured epoch.
    fn begin_running(&self) -> Option<CancelToken> {
        let mut topic = self.topic.lock();
        if topic.state == TopicState::Disconnected {
            return None;
        }
        topic.token.refresh();
        topic.epoch = topic.token.epoch();
        topic.state = TopicState::Running;
        Some(topic.token.clone())
    }

    /// Register a result and take this topic's single refcount on it, unless
    /// the topic was disconnected or its epoch went stale meanwhile.
    fn commit(
        &self,
        shared: &Shared,
        token: &CancelToken,
        publish: impl FnOnce(&Stores) -> Handle,
    ) -> Result<Handle> {
        let mut topic = self.topic.lock();
        if topic.state == TopicState::Disconnected {
            return Err(SqlGraphError::Cancelled);
        }
        let handle = shared.clock.commit_if_current(token, || {
            let handle = publish(&shared.stores);
            shared.stores.increment(&handle);
            handle
        })?;
        topic.handle = Some(handle);
        Ok(handle)
    }

    fn finish(&self, shared: &Shared, result: Result<String>) {
        let (completion, value) = match result {
            Ok(value) => (Completion::Ok, value),
            Err(err) => {
                let completion = if err == SqlGraphError::Cancelled {
                    Completion::Cancelled
                } else {
                    Completion::Err
                };
                (completion, Status::from(&err).to_string())
            }
        };

        let mut topic = self.topic.lock();
        if topic.state == TopicState::Disconnected {
            return;
        }
        topic.state = TopicState::Completed(completion);
        match topic.sync_reply.take() {
            // Capacity 1 and a single send, so this never blocks.
            Some(reply) => {
                let _ = reply.send(value);
            }
            None => {
                MutexGuard::unlocked(&mut topic, || shared.host.push_update(self.id, value));
            }
        }
    }

    fn skip(&self) {
        let mut topic = self.topic.lock();
        if topic.state != TopicState::Disconnected {
            topic.state = TopicState::Skipped;
            topic.sync_reply = None;
        }
    }

    /// Called by `subscribe` once the latency budget ran out: switch to push
    /// delivery and return the placeholder to show. `landed` checks for a
    /// result that arrived just before the switch.
    pub(crate) fn detach(&self, landed: impl FnOnce() -> Option<String>) -> String {
        let mut topic = self.topic.lock();
        if let Some(value) = landed() {
            return value;
        }
        topic.sync_reply = None;
        let placeholder = match topic.state {
            TopicState::AwaitingConfig => Status::awaiting_config(),
            TopicState::AwaitingUnpause => Status::paused(),
            _ => Status::pending(),
        };
        placeholder.to_string()
    }

    /// Tear down for the host's unsubscribe. Returns the handle this topic
    /// held a refcount on, if any.
    pub(crate) fn disconnect(&self) -> Option<Handle> {
        let mut topic = self.topic.lock();
        topic.state = TopicState::Disconnected;
        topic.token.cancel();
        topic.sync_reply = None;
        topic.handle.take()
    }
}

/// Worker body: one thread per subscription.
pub(crate) fn run_topic(shared: Arc<Shared>, cell: Arc<TopicCell>) {
    let poll = shared.config.gate_poll_interval();
    let abandoned = || cell.is_disconnected();

    if cell.descriptor.needs_config() && !shared.config_gate.is_open() {
        if !cell.wait_in(TopicState::AwaitingConfig) {
            return;
        }
        if !shared.config_gate.wait_open(poll, abandoned) {
            return;
        }
    }

    let mut deferred = false;
    loop {
        if deferred || shared.control.is_paused() {
            if !cell.wait_in(TopicState::AwaitingUnpause) {
                return;
            }
            if !shared.control.wait_unpaused(poll, abandoned) {
                return;
            }
            if cell.descriptor.depends_on_blocked() {
                log::debug!(
                    "subscription {}: skipping deferred request with blocked inputs",
                    cell.id
                );
                cell.skip();
                return;
            }
            deferred = false;
        }

        let Some(token) = cell.begin_running() else {
            return;
        };
        // A pause that landed before the epoch capture would not invalidate
        // this token, so look again now that it is captured.
        if shared.control.is_paused() {
            deferred = true;
            continue;
        }

        match execute(&shared, &cell, &token) {
            Err(SqlGraphError::Cancelled)
                if shared.control.cancelled_by_pause(token.epoch()) && !cell.is_disconnected() =>
            {
                log::debug!("subscription {}: cancelled by pause; deferring", cell.id);
                deferred = true;
            }
            result => {
                cell.finish(&shared, result);
                return;
            }
        }
    }
}

fn execute(shared: &Shared, cell: &TopicCell, token: &CancelToken) -> Result<String> {
    match &cell.descriptor.request {
        Request::Query { sql, args } => {
            let resolved = shared.resolver().resolve(sql, args)?;
            let relation = shared.coordinator.next_relation_name();
            let created = shared
                .coordinator
                .run_background(token, |engine| engine.create_temp_relation(&relation, &resolved.sql));
            let info = match created {
                Ok(info) => info,
                Err(err) => {
                    if matches!(err, SqlGraphError::Cancelled | SqlGraphError::Engine(_)) {
                        shared.releases.release_relation(relation);
                    }
                    return Err(err);
                }
            };

            let cols = info.columns.len();
            let rows = info.row_count;
            let stored = StoredResult {
                relation: relation.clone(),
                columns: info.columns,
                row_count: info.row_count,
            };
            match cell.commit(shared, token, |stores| stores.tables.store(stored)) {
                Ok(handle) => Ok(handle.display_with_dims(rows, cols)),
                Err(err) => {
                    shared.releases.release_relation(relation);
                    Err(err)
                }
            }
        }
        Request::Fragment { sql, args } => {
            {
                let resolved = shared.resolver().resolve(sql, args)?;
                shared
                    .coordinator
                    .run_background(token, |engine| engine.explain(&resolved.sql))?;
            }
            let fragment = StoredFragment {
                sql: sql.clone(),
                args: args.clone(),
            };
            let handle = cell.commit(shared, token, |stores| stores.fragments.store(fragment))?;
            Ok(handle.to_string())
        }
        Request::Plot {
            data,
            template,
            overrides,
        } => {
            if is_error_or_blocked(data) {
                return Err(SqlGraphError::ArgumentMismatch(format!(
                    "plot data is unavailable: {data}"
                )));
            }
            let Some(data_handle) = Handle::parse(data) else {
                return Err(SqlGraphError::ArgumentMismatch(format!(
                    "plot data must be a table or fragment handle, got {data:?}"
                )));
            };
            if data_handle.kind == HandleKind::Plot {
                return Err(SqlGraphError::ArgumentMismatch(format!(
                    "plot data cannot be another plot ({data_handle})"
                )));
            }
            if !shared.stores.contains(&data_handle) {
                return Err(SqlGraphError::NotFound(data_handle.to_string()));
            }
            let plot = StoredPlot {
                data: data_handle,
                template: template.clone(),
                overrides: overrides.clone(),
            };
            let handle = cell.commit(shared, token, |stores| stores.plots.store(plot))?;
            Ok(handle.to_string())
        }
    }
}
