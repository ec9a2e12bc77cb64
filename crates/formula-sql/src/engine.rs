use crate::error::EngineError;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Shape of a freshly created temp relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationInfo {
    pub columns: Vec<String>,
    pub row_count: u64,
}

/// Out-of-band abort for whatever statement the engine is running.
///
/// Must be callable from any thread while another thread is inside the engine.
pub trait Interrupter: Send + Sync {
    fn interrupt_current(&self);
}

/// The single embedded SQL engine. Only the execution coordinator calls it.
pub trait SqlEngine: Send {
    fn execute(&mut self, sql: &str) -> Result<QueryRows, EngineError>;

    /// Type-check a statement against the engine without running it.
    fn explain(&mut self, sql: &str) -> Result<(), EngineError>;

    fn create_temp_relation(&mut self, name: &str, sql: &str) -> Result<RelationInfo, EngineError>;

    /// Must succeed (as a no-op) when the relation does not exist.
    fn drop_temp_relation(&mut self, name: &str) -> Result<(), EngineError>;

    fn interrupter(&self) -> Arc<dyn Interrupter>;
}

/// Quote an identifier for use in generated SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
