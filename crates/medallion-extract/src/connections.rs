//! Concrete connection adapter (spec §4.4, SPEC_FULL §4.5.7): a `rusqlite`-
//! backed [`medallion_core::connections::DbConnection`] standing in for the
//! mssql/postgres/mysql/db2 drivers the spec names only by capability.
//! Grounded on the teacher's `config_db.rs`, which opens a single
//! `rusqlite::Connection` guarded by a mutex for concurrent access from
//! background tasks.

use medallion_core::connections::DbConnection;
use medallion_core::error::{ErrorContext, PipelineError};
use medallion_core::record::{Record, Value};
use rusqlite::types::ValueRef;
use std::sync::Mutex;

pub struct SqliteConnection {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteConnection {
    pub fn open(path: &str) -> Result<Self, PipelineError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| PipelineError::Connection {
            message: format!("failed to open sqlite database at `{path}`: {e}"),
            ctx: ErrorContext::new().detail("host", path),
        })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, PipelineError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(|e| PipelineError::Connection {
            message: format!("failed to open in-memory sqlite database: {e}"),
            ctx: ErrorContext::new(),
        })?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn value_from_ref(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Str(format!("<blob:{} bytes>", b.len())),
    }
}

impl DbConnection for SqliteConnection {
    fn query_rows(&self, sql: &str) -> Result<Vec<Record>, PipelineError> {
        let conn = self.conn.lock().expect("sqlite connection mutex poisoned");
        let mut stmt = conn.prepare(sql).map_err(|e| PipelineError::Connection {
            message: format!("preparing query failed: {e}"),
            ctx: ErrorContext::new().detail("sql", sql),
        })?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map([], |row| {
                let mut record = Record::new();
                for (idx, name) in column_names.iter().enumerate() {
                    let value = value_from_ref(row.get_ref(idx)?);
                    record.insert(name.clone(), value);
                }
                Ok(record)
            })
            .map_err(|e| PipelineError::Connection {
                message: format!("executing query failed: {e}"),
                ctx: ErrorContext::new().detail("sql", sql),
            })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| PipelineError::Connection {
                message: format!("reading row failed: {e}"),
                ctx: ErrorContext::new(),
            })?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_rows_materializes_typed_columns() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE t(id INTEGER, name TEXT, amount REAL, note TEXT);
                 INSERT INTO t VALUES (1, 'alice', 1.5, NULL);
                 INSERT INTO t VALUES (2, 'bob', 2.25, 'hi');",
            )
            .unwrap();

        let rows = conn.query_rows("SELECT * FROM t ORDER BY id").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("name"), Some(&Value::Str("alice".into())));
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
        assert_eq!(rows[1].get("amount"), Some(&Value::Float(2.25)));
    }
}
