use serde::Deserialize;
use std::time::Duration;

const MIN_INTERACTIVE_WAIT_MS: u64 = 100;
const MAX_INTERACTIVE_WAIT_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqlGraphConfig {
    /// Results that arrive within this window are returned from `subscribe`
    /// directly; slower ones are pushed later (default: 200ms).
    pub latency_budget_ms: u64,
    /// Bounded lock wait for interactive reads before reporting busy
    /// (default: 250ms, clamped to 100..=500).
    pub interactive_lock_timeout_ms: u64,
    /// How often config/pause waiters wake to notice an unsubscribe (default: 50ms).
    pub gate_poll_interval_ms: u64,
    /// Row cap for `preview` (default: 1000).
    pub preview_row_limit: usize,
}

impl Default for SqlGraphConfig {
    fn default() -> Self {
        Self {
            latency_budget_ms: 200,
            interactive_lock_timeout_ms: 250,
            gate_poll_interval_ms: 50,
            preview_row_limit: 1000,
        }
    }
}

impl SqlGraphConfig {
    /// Defaults overlaid with `FORMULA_SQL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        env_override("FORMULA_SQL_LATENCY_BUDGET_MS", &mut config.latency_budget_ms);
        env_override(
            "FORMULA_SQL_INTERACTIVE_LOCK_TIMEOUT_MS",
            &mut config.interactive_lock_timeout_ms,
        );
        env_override("FORMULA_SQL_GATE_POLL_INTERVAL_MS", &mut config.gate_poll_interval_ms);
        env_override("FORMULA_SQL_PREVIEW_ROW_LIMIT", &mut config.preview_row_limit);
        config.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.interactive_lock_timeout_ms = self
            .interactive_lock_timeout_ms
            .clamp(MIN_INTERACTIVE_WAIT_MS, MAX_INTERACTIVE_WAIT_MS);
        self.gate_poll_interval_ms = self.gate_poll_interval_ms.max(1);
        self.preview_row_limit = self.preview_row_limit.max(1);
        self
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }

    pub fn interactive_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.interactive_lock_timeout_ms)
    }

    pub fn gate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate_poll_interval_ms)
    }
}

fn env_override<T: std::str::FromStr>(name: &str, slot: &mut T) {
    let Ok(raw) = std::env::var(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => log::warn!("ignoring unparseable {name}={raw:?}"),
    }
}
