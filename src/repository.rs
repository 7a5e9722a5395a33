use crate::Session;
use crate::cache::{Retrieval, RowHandle};
use crate::catalog::types::{Record, Value};
use crate::error::RelmapError;
use crate::query::descriptor::QueryDescriptor;
use crate::query::output::Strategy;

/// Typed decoding of one result row.
pub trait TryFromRecord: Sized {
    fn try_from_record(record: &Record) -> Result<Self, RowDecodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowDecodeError {
    #[error("missing column '{column}'")]
    MissingColumn { column: String },
    #[error("column '{column}' type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{message}")]
    Custom { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Relmap(#[from] RelmapError),
    #[error(transparent)]
    Decode(#[from] RowDecodeError),
}

/// Typed access to one table through a session.
pub struct Repository<'a> {
    session: &'a mut Session,
    table: String,
}

impl<'a> Repository<'a> {
    pub fn new(session: &'a mut Session, table: impl Into<String>) -> Self {
        Self {
            session,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Row `key` through the cache, decoded.
    pub fn find<T: TryFromRecord>(&mut self, key: i64) -> Result<Option<T>, RepositoryError> {
        match self.session.get(&self.table, key)? {
            Some(handle) => Ok(Some(decode_handle(&handle)?)),
            None => Ok(None),
        }
    }

    pub fn find_many<T: TryFromRecord>(&mut self, keys: &[i64]) -> Result<Vec<T>, RepositoryError> {
        self.fetch(Retrieval::Plain, keys)
    }

    pub fn fetch<T: TryFromRecord>(
        &mut self,
        retrieval: Retrieval,
        keys: &[i64],
    ) -> Result<Vec<T>, RepositoryError> {
        let handles = self.session.retrieve(&self.table, retrieval, keys)?;
        handles
            .iter()
            .map(|handle| decode_handle(handle).map_err(RepositoryError::from))
            .collect()
    }

    /// Every row of the table, read past the cache.
    pub fn list<T: TryFromRecord>(&mut self) -> Result<Vec<T>, RepositoryError> {
        let records = self
            .session
            .execute(QueryDescriptor::select_all(&self.table), Strategy::Assocs)?
            .try_into_records()?;
        Ok(decode_records(&records)?)
    }

    pub fn query<T: TryFromRecord>(
        &mut self,
        descriptor: QueryDescriptor,
    ) -> Result<Vec<T>, RepositoryError> {
        let records = self
            .session
            .execute(descriptor.with_table(self.table.clone()), Strategy::Assocs)?
            .try_into_records()?;
        Ok(decode_records(&records)?)
    }

    pub fn insert(&mut self, values: Record) -> Result<RowHandle, RepositoryError> {
        Ok(self.session.insert_row(&self.table, values)?)
    }

    pub fn update(&mut self, key: i64, values: Record) -> Result<u64, RepositoryError> {
        Ok(self.session.update_row(&self.table, key, values)?)
    }

    pub fn delete(&mut self, key: i64) -> Result<u64, RepositoryError> {
        Ok(self.session.delete_row(&self.table, key)?)
    }
}

pub fn decode_records<T: TryFromRecord>(records: &[Record]) -> Result<Vec<T>, RowDecodeError> {
    records.iter().map(T::try_from_record).collect()
}

pub fn decode_handle<T: TryFromRecord>(handle: &RowHandle) -> Result<T, RowDecodeError> {
    T::try_from_record(&handle.record())
}

fn cell<'a>(record: &'a Record, column: &str) -> Result<&'a Value, RowDecodeError> {
    record.get(column).ok_or_else(|| RowDecodeError::MissingColumn {
        column: column.to_string(),
    })
}

fn mismatch(column: &str, expected: &'static str, actual: &Value) -> RowDecodeError {
    RowDecodeError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: actual.kind(),
    }
}

pub fn text_at<'a>(record: &'a Record, column: &str) -> Result<&'a str, RowDecodeError> {
    match cell(record, column)? {
        Value::Text(v) => Ok(v.as_str()),
        other => Err(mismatch(column, "Text", other)),
    }
}

pub fn i64_at(record: &Record, column: &str) -> Result<i64, RowDecodeError> {
    match cell(record, column)? {
        Value::Integer(v) => Ok(*v),
        other => Err(mismatch(column, "Integer", other)),
    }
}

pub fn f64_at(record: &Record, column: &str) -> Result<f64, RowDecodeError> {
    match cell(record, column)? {
        Value::Float(v) => Ok(*v),
        Value::Integer(v) => Ok(*v as f64),
        other => Err(mismatch(column, "Float", other)),
    }
}

/// Booleans stored as 0/1 integers decode too.
pub fn bool_at(record: &Record, column: &str) -> Result<bool, RowDecodeError> {
    match cell(record, column)? {
        Value::Boolean(v) => Ok(*v),
        Value::Integer(0) => Ok(false),
        Value::Integer(1) => Ok(true),
        other => Err(mismatch(column, "Boolean", other)),
    }
}

pub fn blob_at<'a>(record: &'a Record, column: &str) -> Result<&'a [u8], RowDecodeError> {
    match cell(record, column)? {
        Value::Blob(v) => Ok(v.as_slice()),
        other => Err(mismatch(column, "Blob", other)),
    }
}

pub fn optional_text_at(record: &Record, column: &str) -> Result<Option<String>, RowDecodeError> {
    match cell(record, column)? {
        Value::Null => Ok(None),
        Value::Text(v) => Ok(Some(v.to_string())),
        other => Err(mismatch(column, "Text", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::{RowDecodeError, bool_at, f64_at, i64_at, optional_text_at, text_at};
    use crate::catalog::types::{Record, Value};

    fn record() -> Record {
        Record::from_pairs([
            ("id", Value::from(3)),
            ("name", Value::from("ada")),
            ("active", Value::from(1)),
            ("note", Value::Null),
        ])
    }

    #[test]
    fn accessors_read_by_column_name() {
        let r = record();
        assert_eq!(i64_at(&r, "id"), Ok(3));
        assert_eq!(text_at(&r, "name"), Ok("ada"));
        assert_eq!(bool_at(&r, "active"), Ok(true));
        assert_eq!(f64_at(&r, "id"), Ok(3.0));
        assert_eq!(optional_text_at(&r, "note"), Ok(None));
    }

    #[test]
    fn accessors_report_missing_and_mismatched_columns() {
        let r = record();
        assert_eq!(
            i64_at(&r, "missing"),
            Err(RowDecodeError::MissingColumn {
                column: "missing".into()
            })
        );
        assert_eq!(
            text_at(&r, "id"),
            Err(RowDecodeError::TypeMismatch {
                column: "id".into(),
                expected: "Text",
                actual: "Integer",
            })
        );
    }
}
