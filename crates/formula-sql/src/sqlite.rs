use crate::engine::{quote_ident, Interrupter, QueryRows, RelationInfo, SqlEngine};
use crate::error::EngineError;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// [`SqlEngine`] over a single SQLite connection.
///
/// Temp relations live in the connection's `temp` schema, so they disappear
/// with the connection and never touch the main database file.
pub struct SqliteEngine {
    conn: Connection,
    interrupter: Arc<SqliteInterrupter>,
}

struct SqliteInterrupter(InterruptHandle);

impl Interrupter for SqliteInterrupter {
    fn interrupt_current(&self) {
        self.0.interrupt();
    }
}

impl SqliteEngine {
    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, EngineError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let interrupter = Arc::new(SqliteInterrupter(conn.get_interrupt_handle()));
        Ok(Self { conn, interrupter })
    }
}

fn strip_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn cell_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            JsonValue::String(bytes.iter().map(|b| format!("{b:02x}")).collect())
        }
    }
}

impl SqlEngine for SqliteEngine {
    fn execute(&mut self, sql: &str) -> Result<QueryRows, EngineError> {
        let mut stmt = self.conn.prepare(strip_statement(sql))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut out = Vec::with_capacity(width);
            for idx in 0..width {
                out.push(cell_to_json(row.get_ref(idx)?));
            }
            rows.push(out);
        }
        Ok(QueryRows { columns, rows })
    }

    fn explain(&mut self, sql: &str) -> Result<(), EngineError> {
        // Preparing compiles the statement (resolving tables and columns)
        // without stepping it.
        self.conn.prepare(strip_statement(sql))?;
        Ok(())
    }

    fn create_temp_relation(&mut self, name: &str, sql: &str) -> Result<RelationInfo, EngineError> {
        let ident = quote_ident(name);
        self.conn.execute(
            &format!("CREATE TEMP TABLE {ident} AS {}", strip_statement(sql)),
            [],
        )?;

        let columns = {
            let stmt = self.conn.prepare(&format!("SELECT * FROM temp.{ident} LIMIT 0"))?;
            stmt.column_names().into_iter().map(String::from).collect()
        };
        let row_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM temp.{ident}"),
            [],
            |r| r.get(0),
        )?;
        Ok(RelationInfo {
            columns,
            row_count: row_count.max(0) as u64,
        })
    }

    fn drop_temp_relation(&mut self, name: &str) -> Result<(), EngineError> {
        self.conn
            .execute(&format!("DROP TABLE IF EXISTS temp.{}", quote_ident(name)), [])?;
        Ok(())
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        self.interrupter.clone()
    }
}
