//! Low-level driver seam: one live backend connection per session.

pub mod sqlite;

use crate::catalog::types::{Record, Value};
use crate::dsn::{ConnectionString, Credentials};
use crate::error::{RelmapError, Result};
use compact_str::CompactString;
use serde::Serialize;
use thiserror::Error;

/// Failure reported by a backend, before the executor attaches query context.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    pub code: Option<String>,
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// Statement parameters, bound positionally or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Default for Params {
    fn default() -> Self {
        Params::Positional(Vec::new())
    }
}

impl Params {
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(pairs) => pairs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: CompactString,
    pub index: usize,
    /// Kind of the first non-null value in the column, if any row had one.
    pub value_kind: Option<&'static str>,
}

/// A fully materialised statement result.
///
/// Rows are read through an internal cursor so single-row extractions see
/// the same "next row" semantics a streaming driver offers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Statement {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
    row_count: u64,
    #[serde(skip)]
    cursor: usize,
}

impl Statement {
    pub fn new(columns: Vec<CompactString>, rows: Vec<Vec<Value>>, row_count: u64) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(index, name)| ColumnMeta {
                value_kind: rows
                    .iter()
                    .filter_map(|row| row.get(index))
                    .find(|v| !v.is_null())
                    .map(Value::kind),
                name,
                index,
            })
            .collect();
        Self {
            columns,
            rows,
            row_count,
            cursor: 0,
        }
    }

    /// Result of a statement that returns no result set.
    pub fn affected(row_count: u64) -> Self {
        Self::new(Vec::new(), Vec::new(), row_count)
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<CompactString> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn fetch_next(&mut self) -> Option<&[Value]> {
        let row = self.rows.get(self.cursor)?;
        self.cursor += 1;
        Some(row)
    }

    pub fn fetch_record(&mut self) -> Option<Record> {
        let names = self.column_names();
        self.fetch_next()
            .map(|values| Record::new(names, values.to_vec()))
    }

    /// Drains every unread row.
    pub fn fetch_all(&mut self) -> Vec<Vec<Value>> {
        let rest = self.rows.get(self.cursor..).unwrap_or_default().to_vec();
        self.cursor = self.rows.len();
        rest
    }

    pub fn fetch_all_records(&mut self) -> Vec<Record> {
        let names = self.column_names();
        self.fetch_all()
            .into_iter()
            .map(|values| Record::new(names.clone(), values))
            .collect()
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// One live backend connection.
pub trait Backend: Send {
    fn driver_name(&self) -> &str;
    fn server_version(&self) -> String;
    fn client_version(&self) -> String;
    fn run(&mut self, sql: &str, params: &Params) -> Result<Statement, BackendError>;
    fn last_insert_id(&self) -> Option<i64>;
    fn begin(&mut self) -> Result<(), BackendError>;
    fn commit(&mut self) -> Result<(), BackendError>;
    fn rollback(&mut self) -> Result<(), BackendError>;
    fn in_transaction(&self) -> bool;
}

pub const SUPPORTED_DRIVERS: &[&str] = &["sqlite"];

/// Opens the backend named by the connection string's scheme.
pub fn open(dsn: &ConnectionString, credentials: &Credentials) -> Result<Box<dyn Backend>> {
    match dsn.driver.as_str() {
        "sqlite" => Ok(Box::new(sqlite::SqliteBackend::open(dsn, credentials)?)),
        other => Err(RelmapError::UnsupportedDriver(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::{Params, Statement};
    use crate::catalog::types::Value;

    fn two_rows() -> Statement {
        Statement::new(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Integer(1), Value::Null],
                vec![Value::Integer(2), Value::from("b")],
            ],
            2,
        )
    }

    #[test]
    fn cursor_advances_and_drains() {
        let mut stmt = two_rows();
        assert_eq!(stmt.fetch_next().map(<[Value]>::len), Some(2));
        let rest = stmt.fetch_all_records();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].get("name"), Some(&Value::from("b")));
        assert!(stmt.fetch_next().is_none());
        stmt.rewind();
        assert!(stmt.fetch_record().is_some());
    }

    #[test]
    fn column_kind_skips_nulls() {
        let stmt = two_rows();
        assert_eq!(stmt.columns()[0].value_kind, Some("Integer"));
        assert_eq!(stmt.columns()[1].value_kind, Some("Text"));
        assert_eq!(stmt.column_position("name"), Some(1));
    }

    #[test]
    fn params_len_counts_both_forms() {
        assert!(Params::default().is_empty());
        let named = Params::Named(vec![("a".into(), Value::from(1))]);
        assert_eq!(named.len(), 1);
    }
}
