use super::{Backend, BackendError, Params, Statement};
use crate::catalog::types::Value;
use crate::dsn::{ConnectionString, Credentials};
use crate::error::{RelmapError, Result};
use compact_str::CompactString;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use tracing::debug;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::Boolean(v) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*v))),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::Text(CompactString::from(String::from_utf8_lossy(bytes))),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        Self {
            code: err.sqlite_error_code().map(|code| format!("{code:?}")),
            message: err.to_string(),
        }
    }
}

/// SQLite connection through `rusqlite`.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn open(dsn: &ConnectionString, credentials: &Credentials) -> Result<Self> {
        let conn = if dsn.is_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&dsn.dbname)
        }
        .map_err(|e| RelmapError::Connection(e.to_string()))?;
        debug!(
            dbname = %dsn.dbname,
            username = %credentials.username,
            "sqlite connection opened"
        );
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| RelmapError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Backend for SqliteBackend {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    fn server_version(&self) -> String {
        self.conn
            .query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
            .unwrap_or_else(|_| self.client_version())
    }

    fn client_version(&self) -> String {
        rusqlite::version().to_string()
    }

    fn run(&mut self, sql: &str, params: &Params) -> Result<Statement, BackendError> {
        let mut stmt = self.conn.prepare(sql.trim())?;
        let column_count = stmt.column_count();
        if column_count == 0 {
            let changed = match params {
                Params::Positional(values) => {
                    stmt.execute(rusqlite::params_from_iter(values.iter()))?
                }
                Params::Named(pairs) => {
                    let keys = named_keys(pairs);
                    stmt.execute(bind_named(&keys, pairs).as_slice())?
                }
            };
            return Ok(Statement::affected(changed as u64));
        }

        let names: Vec<CompactString> = stmt
            .column_names()
            .into_iter()
            .map(CompactString::from)
            .collect();
        let mut rows = match params {
            Params::Positional(values) => stmt.query(rusqlite::params_from_iter(values.iter()))?,
            Params::Named(pairs) => {
                let keys = named_keys(pairs);
                stmt.query(bind_named(&keys, pairs).as_slice())?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(value_from_ref(row.get_ref(i)?));
            }
            out.push(values);
        }
        let row_count = out.len() as u64;
        Ok(Statement::new(names, out, row_count))
    }

    fn last_insert_id(&self) -> Option<i64> {
        match self.conn.last_insert_rowid() {
            0 => None,
            id => Some(id),
        }
    }

    fn begin(&mut self) -> Result<(), BackendError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

/// Parameter names in the `:name` form SQLite expects.
fn named_keys(pairs: &[(String, Value)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(name, _)| {
            if name.starts_with([':', '@', '$']) {
                name.clone()
            } else {
                format!(":{name}")
            }
        })
        .collect()
}

fn bind_named<'a>(keys: &'a [String], pairs: &'a [(String, Value)]) -> Vec<(&'a str, &'a dyn ToSql)> {
    keys.iter()
        .map(String::as_str)
        .zip(pairs.iter().map(|(_, value)| value as &dyn ToSql))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::SqliteBackend;
    use crate::catalog::types::Value;
    use crate::driver::{Backend, Params};

    fn backend() -> SqliteBackend {
        let mut db = SqliteBackend::open_in_memory().expect("open");
        db.run(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, flag INTEGER)",
            &Params::default(),
        )
        .expect("create");
        db
    }

    #[test]
    fn insert_reports_changes_and_rowid() {
        let mut db = backend();
        let stmt = db
            .run(
                "INSERT INTO t (name, flag) VALUES (?, ?)",
                &Params::Positional(vec![Value::from("a"), Value::Boolean(true)]),
            )
            .expect("insert");
        assert_eq!(stmt.row_count(), 1);
        assert_eq!(stmt.column_count(), 0);
        assert_eq!(db.last_insert_id(), Some(1));
    }

    #[test]
    fn select_materialises_rows_with_named_params() {
        let mut db = backend();
        db.run("INSERT INTO t (name, flag) VALUES ('a', 1), ('b', 0)", &Params::default())
            .expect("insert");
        let mut stmt = db
            .run(
                "SELECT id, name FROM t WHERE flag = :flag",
                &Params::Named(vec![("flag".into(), Value::Integer(0))]),
            )
            .expect("select");
        assert_eq!(stmt.row_count(), 1);
        let record = stmt.fetch_record().expect("row");
        assert_eq!(record.get("name"), Some(&Value::from("b")));
    }

    #[test]
    fn errors_carry_sqlite_code() {
        let mut db = backend();
        let err = db
            .run("SELECT * FROM missing", &Params::default())
            .expect_err("no table");
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn transaction_state_follows_autocommit() {
        let mut db = backend();
        assert!(!db.in_transaction());
        db.begin().expect("begin");
        assert!(db.in_transaction());
        db.rollback().expect("rollback");
        assert!(!db.in_transaction());
    }
}
