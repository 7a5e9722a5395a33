use crate::catalog::types::{Record, Value};
use crate::driver::{ColumnMeta, Params};
use crate::error::{RelmapError, Result};
use crate::query::emulate::{emulate, quote_ident};
use crate::query::kind::QueryKind;
use crate::rollback::Rollback;
use serde::Serialize;

/// Metadata captured from a statement right after it ran.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatementMeta {
    pub row_count: u64,
    pub column_count: usize,
    pub insert_id: Option<i64>,
    pub columns: Vec<ColumnMeta>,
}

/// One database operation, built per call and consumed by the executor.
///
/// `keys` is the list of primary-key values the operation targets, when the
/// builder knows it. A single entry makes the descriptor rollback eligible;
/// an explicit empty list means "no rows", which row outputs answer without
/// touching the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    pub kind: QueryKind,
    pub table: Option<String>,
    pub sql: String,
    pub params: Params,
    pub limit: Option<u64>,
    pub keys: Option<Vec<i64>>,
    /// Column values written by an insert or update.
    pub values: Option<Record>,
    /// Read used for before/after snapshots of a write.
    pub select: Option<Box<QueryDescriptor>>,
    pub rollback: Option<Box<Rollback>>,
    pub post: Option<StatementMeta>,
}

impl QueryDescriptor {
    pub fn raw(kind: QueryKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            table: None,
            sql: sql.into(),
            params: Params::default(),
            limit: None,
            keys: None,
            values: None,
            select: None,
            rollback: None,
            post: None,
        }
    }

    pub fn select(sql: impl Into<String>) -> Self {
        Self::raw(QueryKind::Select, sql)
    }

    pub fn select_all(table: &str) -> Self {
        Self::select(format!("SELECT * FROM {}", quote_ident(table))).with_table(table)
    }

    /// `SELECT *` restricted to the given primary-key values.
    pub fn select_keys(table: &str, primary: &str, keys: &[i64]) -> Self {
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT * FROM {} WHERE {} IN ({placeholders})",
            quote_ident(table),
            quote_ident(primary)
        );
        Self::select(sql)
            .with_table(table)
            .with_params(keys.iter().copied().map(Value::Integer).collect::<Vec<_>>())
            .with_keys(keys.to_vec())
    }

    pub fn select_key(table: &str, primary: &str, key: i64) -> Self {
        Self::select_keys(table, primary, &[key])
    }

    /// Insert of `values`; an empty record inserts a row of defaults.
    pub fn insert(table: &str, values: Record) -> Self {
        let sql = if values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table))
        } else {
            let columns = values
                .columns()
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = vec!["?"; values.len()].join(", ");
            format!(
                "INSERT INTO {} ({columns}) VALUES ({placeholders})",
                quote_ident(table)
            )
        };
        let params = values.values().to_vec();
        let mut descriptor = Self::raw(QueryKind::Insert, sql)
            .with_table(table)
            .with_params(params);
        descriptor.values = Some(values);
        descriptor
    }

    /// Insert that carries its primary key explicitly.
    pub fn insert_with_key(table: &str, primary: &str, key: i64, values: Record) -> Self {
        let mut pairs = values.into_pairs();
        pairs.retain(|(column, _)| column != primary);
        pairs.insert(0, (primary.into(), Value::Integer(key)));
        Self::insert(table, Record::from_pairs(pairs))
            .with_keys(vec![key])
            .with_snapshot(Self::select_key(table, primary, key))
    }

    pub fn update_by_key(table: &str, primary: &str, values: Record, key: i64) -> Self {
        let assignments = values
            .columns()
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE {} = ?",
            quote_ident(table),
            quote_ident(primary)
        );
        let mut params = values.values().to_vec();
        params.push(Value::Integer(key));
        let mut descriptor = Self::raw(QueryKind::Update, sql)
            .with_table(table)
            .with_params(params)
            .with_keys(vec![key])
            .with_snapshot(Self::select_key(table, primary, key));
        descriptor.values = Some(values);
        descriptor
    }

    pub fn delete_by_key(table: &str, primary: &str, key: i64) -> Self {
        Self::delete_keys(table, primary, &[key])
    }

    pub fn delete_keys(table: &str, primary: &str, keys: &[i64]) -> Self {
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({placeholders})",
            quote_ident(table),
            quote_ident(primary)
        );
        Self::raw(QueryKind::Delete, sql)
            .with_table(table)
            .with_params(keys.iter().copied().map(Value::Integer).collect::<Vec<_>>())
            .with_keys(keys.to_vec())
            .with_snapshot(Self::select_keys(table, primary, keys))
    }

    /// Empties a table. Issued as an unqualified `DELETE`, which every
    /// supported backend accepts.
    pub fn truncate(table: &str) -> Self {
        Self::raw(
            QueryKind::Truncate,
            format!("DELETE FROM {}", quote_ident(table)),
        )
        .with_table(table)
    }

    pub fn drop_table(table: &str) -> Self {
        Self::raw(QueryKind::Drop, format!("DROP TABLE {}", quote_ident(table))).with_table(table)
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_params(mut self, params: impl Into<Params>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let pair = (name.into(), value.into());
        match &mut self.params {
            Params::Named(pairs) => pairs.push(pair),
            Params::Positional(values) if values.is_empty() => {
                self.params = Params::Named(vec![pair]);
            }
            Params::Positional(_) => {}
        }
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_keys(mut self, keys: Vec<i64>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_snapshot(mut self, select: QueryDescriptor) -> Self {
        self.select = Some(Box::new(select));
        self
    }

    /// The single primary key this descriptor targets, if it has exactly one.
    pub fn single_key(&self) -> Option<i64> {
        match self.keys.as_deref() {
            Some([key]) => Some(*key),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sql.trim().is_empty() {
            return Err(RelmapError::Validation(format!(
                "{} descriptor has no sql",
                self.kind
            )));
        }
        if self.kind.requires_table() && self.table.as_deref().is_none_or(str::is_empty) {
            return Err(RelmapError::Validation(format!(
                "{} descriptor requires a table",
                self.kind
            )));
        }
        Ok(())
    }

    /// True when the sql already limits its result set.
    pub fn has_limit(&self) -> bool {
        self.limit.is_some() || contains_keyword(&self.sql, "limit")
    }

    /// The sql actually sent to the backend.
    pub fn effective_sql(&self) -> String {
        match self.limit {
            Some(limit) if !contains_keyword(&self.sql, "limit") => {
                format!("{} LIMIT {limit}", self.sql.trim_end().trim_end_matches(';'))
            }
            _ => self.sql.clone(),
        }
    }

    pub fn emulated(&self) -> String {
        emulate(&self.effective_sql(), &self.params)
    }
}

/// Case-insensitive whole-word search outside quoted regions.
fn contains_keyword(sql: &str, keyword: &str) -> bool {
    let mut quote_char: Option<char> = None;
    let mut word = String::new();
    for c in sql.chars().chain(std::iter::once(' ')) {
        if let Some(q) = quote_char {
            if c == q {
                quote_char = None;
            }
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        if word.eq_ignore_ascii_case(keyword) {
            return true;
        }
        word.clear();
        if matches!(c, '\'' | '"' | '`') {
            quote_char = Some(c);
        }
    }
    false
}
