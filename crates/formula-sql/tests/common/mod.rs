#![allow(dead_code)]

use formula_sql::{
    EngineError, Host, Interrupter, QueryRows, RelationInfo, RequestDescriptor, SqlEngine, SqlGraph,
    SqlGraphConfig, SqliteEngine, SubscriptionId,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(10);

type Hook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct ProbeState {
    statements: Vec<String>,
    drops: Vec<String>,
    stall_marker: Option<String>,
    stalled: usize,
    interrupted: bool,
    interrupts_held: bool,
    hook: Option<Hook>,
}

/// Records what reaches the engine and can stall marked statements until
/// they are released or interrupted.
#[derive(Default)]
pub struct Probe {
    state: Mutex<ProbeState>,
    cvar: Condvar,
}

impl Probe {
    /// Statements containing `marker` block until `release` or an interrupt.
    pub fn stall_on(&self, marker: &str) {
        self.state.lock().stall_marker = Some(marker.to_string());
    }

    pub fn release(&self) {
        self.state.lock().stall_marker = None;
        self.cvar.notify_all();
    }

    /// Stalled statements ignore interrupts until `deliver_interrupts`.
    pub fn hold_interrupts(&self) {
        self.state.lock().interrupts_held = true;
    }

    pub fn deliver_interrupts(&self) {
        self.state.lock().interrupts_held = false;
        self.cvar.notify_all();
    }

    pub fn set_hook(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.state.lock().hook = Some(Arc::new(hook));
    }

    pub fn wait_until_stalled(&self) -> bool {
        let deadline = Instant::now() + WAIT;
        let mut state = self.state.lock();
        while state.stalled == 0 {
            if self.cvar.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    /// Every statement that reached the engine, as `"<op>: <sql>"` where op
    /// is `execute`, `explain` or `create`.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    pub fn drops(&self) -> Vec<String> {
        self.state.lock().drops.clone()
    }

    fn interrupt(&self) {
        self.state.lock().interrupted = true;
        self.cvar.notify_all();
    }

    fn before(&self, op: &str, sql: &str) -> Result<(), EngineError> {
        let hook = {
            let mut state = self.state.lock();
            state.statements.push(format!("{op}: {sql}"));
            // Like SQLite, an interrupt only hits a statement that is running.
            state.interrupted = false;
            state.hook.clone()
        };
        if let Some(hook) = hook {
            hook(sql);
        }

        let mut state = self.state.lock();
        let stalls = state
            .stall_marker
            .as_deref()
            .is_some_and(|marker| sql.contains(marker));
        if !stalls {
            return Ok(());
        }
        state.stalled += 1;
        self.cvar.notify_all();
        loop {
            if state.interrupted && !state.interrupts_held {
                state.stalled -= 1;
                return Err(EngineError::interrupted());
            }
            if !state
                .stall_marker
                .as_deref()
                .is_some_and(|marker| sql.contains(marker))
            {
                state.stalled -= 1;
                return Ok(());
            }
            self.cvar.wait(&mut state);
        }
    }
}

pub struct ProbeEngine {
    inner: SqliteEngine,
    probe: Arc<Probe>,
    interrupter: Arc<ProbeInterrupter>,
}

struct ProbeInterrupter {
    probe: Arc<Probe>,
    inner: Arc<dyn Interrupter>,
}

impl Interrupter for ProbeInterrupter {
    fn interrupt_current(&self) {
        self.probe.interrupt();
        self.inner.interrupt_current();
    }
}

impl ProbeEngine {
    pub fn new(probe: Arc<Probe>) -> Self {
        let inner = SqliteEngine::open_in_memory().expect("open sqlite");
        let interrupter = Arc::new(ProbeInterrupter {
            probe: Arc::clone(&probe),
            inner: inner.interrupter(),
        });
        Self {
            inner,
            probe,
            interrupter,
        }
    }
}

impl SqlEngine for ProbeEngine {
    fn execute(&mut self, sql: &str) -> Result<QueryRows, EngineError> {
        self.probe.before("execute", sql)?;
        self.inner.execute(sql)
    }

    fn explain(&mut self, sql: &str) -> Result<(), EngineError> {
        self.probe.before("explain", sql)?;
        self.inner.explain(sql)
    }

    fn create_temp_relation(&mut self, name: &str, sql: &str) -> Result<RelationInfo, EngineError> {
        self.probe.before("create", sql)?;
        self.inner.create_temp_relation(name, sql)
    }

    fn drop_temp_relation(&mut self, name: &str) -> Result<(), EngineError> {
        self.probe.state.lock().drops.push(name.to_string());
        self.inner.drop_temp_relation(name)
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        self.interrupter.clone()
    }
}

/// Host that records every pushed value.
#[derive(Default)]
pub struct RecordingHost {
    pushes: Mutex<Vec<(SubscriptionId, String)>>,
    cvar: Condvar,
}

impl Host for RecordingHost {
    fn push_update(&self, subscription_id: SubscriptionId, value: String) {
        self.pushes.lock().push((subscription_id, value));
        self.cvar.notify_all();
    }
}

impl RecordingHost {
    /// First value pushed for `id`, waiting up to [`WAIT`].
    pub fn wait_for_push(&self, id: SubscriptionId) -> Option<String> {
        let deadline = Instant::now() + WAIT;
        let mut pushes = self.pushes.lock();
        loop {
            if let Some((_, value)) = pushes.iter().find(|(sub, _)| *sub == id) {
                return Some(value.clone());
            }
            if self.cvar.wait_until(&mut pushes, deadline).timed_out() {
                return None;
            }
        }
    }

    pub fn pushes_for(&self, id: SubscriptionId) -> Vec<String> {
        self.pushes
            .lock()
            .iter()
            .filter(|(sub, _)| *sub == id)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

pub struct Harness {
    pub graph: SqlGraph,
    pub probe: Arc<Probe>,
    pub host: Arc<RecordingHost>,
}

impl Harness {
    /// Final value of a subscription, whether it came back directly or was
    /// pushed after a placeholder.
    pub fn subscribe_settled(&self, id: SubscriptionId, descriptor: RequestDescriptor) -> String {
        let initial = self.graph.subscribe(id, descriptor);
        if initial.starts_with("#BLOCKED!") {
            self.host.wait_for_push(id).expect("pushed value")
        } else {
            initial
        }
    }
}

/// Results within this budget come back from `subscribe` directly.
pub fn sync_config() -> SqlGraphConfig {
    SqlGraphConfig {
        latency_budget_ms: 5_000,
        gate_poll_interval_ms: 5,
        ..SqlGraphConfig::default()
    }
}

/// Short budget so anything that waits is delivered by push.
pub fn async_config() -> SqlGraphConfig {
    SqlGraphConfig {
        latency_budget_ms: 50,
        gate_poll_interval_ms: 5,
        ..SqlGraphConfig::default()
    }
}

/// Graph over a probed in-memory SQLite with `src(x, y)` holding 3 rows.
pub fn harness(config: SqlGraphConfig) -> Harness {
    let probe = Arc::new(Probe::default());
    let host = Arc::new(RecordingHost::default());
    let graph = SqlGraph::new(
        Box::new(ProbeEngine::new(Arc::clone(&probe))),
        host.clone(),
        config,
    )
    .expect("create graph");
    graph
        .execute_admin("CREATE TABLE src (x INTEGER, y TEXT)")
        .expect("create src");
    graph
        .execute_admin("INSERT INTO src VALUES (1, 'a'), (3, 'b'), (7, 'c')")
        .expect("seed src");
    Harness { graph, probe, host }
}

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
