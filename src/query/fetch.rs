use crate::cache::RowHandle;
use crate::catalog::types::{Record, Value};
use crate::driver::{ColumnMeta, Params, Statement};
use crate::error::{RelmapError, Result};
use crate::query::descriptor::QueryDescriptor;
use crate::query::kind::QueryKind;
use crate::query::output::{ColumnRef, Extraction, FetchMode, FetchPlan, Strategy};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ordered map keyed by a cell value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyed<T> {
    entries: Vec<(Value, T)>,
    index: BTreeMap<Value, usize>,
}

impl<T> Default for Keyed<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: BTreeMap::new(),
        }
    }
}

impl<T> Keyed<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites in place, keeping the first position.
    pub fn insert(&mut self, key: Value, value: T) -> Option<T> {
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Inserts, failing when the key is already present.
    pub fn try_insert(&mut self, key: Value, value: T) -> Result<()> {
        if self.index.contains_key(&key) {
            return Err(RelmapError::KeyCollision {
                key: key.to_string(),
            });
        }
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &Value) -> Option<&T> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &Value) -> Option<&mut T> {
        self.index.get(key).map(|&i| &mut self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &T)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn into_vec(self) -> Vec<(Value, T)> {
        self.entries
    }
}

impl<T: Serialize> Serialize for Keyed<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(&key.to_string(), value)?;
        }
        map.end()
    }
}

/// Diagnostics for the `info` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementInfo {
    pub kind: QueryKind,
    pub table: Option<String>,
    pub sql: String,
    pub row_count: Option<u64>,
    pub insert_id: Option<i64>,
    pub column_count: Option<usize>,
    pub cells: Option<u64>,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Record>,
}

/// What would run, returned instead of running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugInfo {
    pub kind: QueryKind,
    pub table: Option<String>,
    pub sql: String,
    pub params: Params,
    pub emulated: String,
}

impl DebugInfo {
    pub fn of(descriptor: &QueryDescriptor) -> Self {
        Self {
            kind: descriptor.kind,
            table: descriptor.table.clone(),
            sql: descriptor.effective_sql(),
            params: descriptor.params.clone(),
            emulated: descriptor.emulated(),
        }
    }
}

/// Typed result of an executed descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Empty,
    Record(Record),
    Records(Vec<Record>),
    KeyedRecords(Keyed<Record>),
    Values(Vec<Value>),
    ValueRows(Vec<Vec<Value>>),
    KeyedValueRows(Keyed<Vec<Value>>),
    Scalar(Value),
    Pair(Value, Value),
    Pairs(Keyed<Value>),
    Grouped(Keyed<Vec<Value>>),
    Text(String),
    Texts(Keyed<String>),
    Count(u64),
    InsertId(Option<i64>),
    ColumnMeta(Vec<ColumnMeta>),
    Info(Box<StatementInfo>),
    Debug(Box<DebugInfo>),
    Statement(Statement),
    Row(Option<RowHandle>),
    Rows(Vec<RowHandle>),
    BeforeAfter {
        before: Option<Box<Output>>,
        query: Box<Output>,
        after: Option<Box<Output>>,
    },
}

impl Output {
    pub fn is_empty(&self) -> bool {
        match self {
            Output::Empty | Output::Row(None) => true,
            Output::Records(v) => v.is_empty(),
            Output::Rows(v) => v.is_empty(),
            Output::Values(v) => v.is_empty(),
            Output::ValueRows(v) => v.is_empty(),
            _ => false,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Output::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn insert_id(&self) -> Option<i64> {
        match self {
            Output::InsertId(id) => *id,
            _ => None,
        }
    }

    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Output::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Record> {
        match self {
            Output::Record(record) => Some(record),
            Output::Row(Some(handle)) => Some(handle.record()),
            _ => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Record>> {
        match self {
            Output::Records(records) => Some(records),
            Output::Rows(handles) => Some(handles.iter().map(RowHandle::record).collect()),
            Output::Empty => Some(Vec::new()),
            _ => None,
        }
    }

    /// Like [`Output::into_records`], but a non record-set shape is an error.
    pub fn try_into_records(self) -> Result<Vec<Record>> {
        let shape = self.shape();
        self.into_records()
            .ok_or_else(|| RelmapError::Validation(format!("expected a record set, got {shape}")))
    }

    pub fn try_into_values(self) -> Result<Vec<Value>> {
        let shape = self.shape();
        self.into_values()
            .ok_or_else(|| RelmapError::Validation(format!("expected a value list, got {shape}")))
    }

    /// Copies row handles out into plain records, so later writes through
    /// the identity map do not show through.
    pub fn detached(self) -> Output {
        match self {
            Output::Row(Some(handle)) => Output::Record(handle.record()),
            Output::Row(None) => Output::Empty,
            Output::Rows(handles) => Output::Records(handles.iter().map(RowHandle::record).collect()),
            other => other,
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            Output::Empty => "empty",
            Output::Record(_) => "record",
            Output::Records(_) => "records",
            Output::KeyedRecords(_) => "keyed records",
            Output::Values(_) => "values",
            Output::ValueRows(_) => "value rows",
            Output::KeyedValueRows(_) => "keyed value rows",
            Output::Scalar(_) => "scalar",
            Output::Pair(..) => "pair",
            Output::Pairs(_) => "pairs",
            Output::Grouped(_) => "grouped values",
            Output::Text(_) => "text",
            Output::Texts(_) => "texts",
            Output::Count(_) => "count",
            Output::InsertId(_) => "insert id",
            Output::ColumnMeta(_) => "column meta",
            Output::Info(_) => "info",
            Output::Debug(_) => "debug",
            Output::Statement(_) => "statement",
            Output::Row(_) => "row",
            Output::Rows(_) => "rows",
            Output::BeforeAfter { .. } => "before/after",
        }
    }

    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            Output::Values(values) => Some(values),
            Output::Empty => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn into_row(self) -> Option<RowHandle> {
        match self {
            Output::Row(handle) => handle,
            _ => None,
        }
    }

    pub fn into_rows(self) -> Option<Vec<RowHandle>> {
        match self {
            Output::Rows(handles) => Some(handles),
            _ => None,
        }
    }

    pub fn into_statement(self) -> Option<Statement> {
        match self {
            Output::Statement(statement) => Some(statement),
            _ => None,
        }
    }
}

fn column_index(statement: &Statement, column: &ColumnRef) -> Result<usize> {
    let index = match column {
        ColumnRef::Index(i) => (*i < statement.column_count()).then_some(*i),
        ColumnRef::Name(name) => statement.column_position(name),
    };
    index.ok_or_else(|| {
        RelmapError::Validation(format!(
            "column {column} not found in a {}-column result",
            statement.column_count()
        ))
    })
}

fn cell(row: &[Value], index: usize) -> Value {
    row.get(index).cloned().unwrap_or(Value::Null)
}

/// Replaces every `[column]` with the row's value for that column.
pub fn fill_template(template: &str, record: &Record) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open + 1..].find(']') else {
            break;
        };
        let name = &rest[open + 1..open + 1 + close];
        out.push_str(&rest[..open]);
        match record.get(name) {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &rest[open + close + 2..];
    }
    out.push_str(rest);
    out
}

/// Shapes `statement` according to `plan`.
///
/// `descriptor` must carry its post-execution metadata. Row-handle plans are
/// served by the executor's cache path and are rejected here.
pub fn extract(
    plan: &FetchPlan,
    descriptor: &QueryDescriptor,
    mut statement: Statement,
) -> Result<Output> {
    let post = descriptor.post.clone().unwrap_or_default();
    let output = match plan.strategy {
        Strategy::Statement => Output::Statement(statement),
        Strategy::Debug => Output::Debug(Box::new(DebugInfo::of(descriptor))),
        Strategy::RowCount => Output::Count(post.row_count),
        Strategy::ColumnCount => Output::Count(statement.column_count() as u64),
        Strategy::InsertId => Output::InsertId(post.insert_id),
        Strategy::ColumnMeta => Output::ColumnMeta(statement.columns().to_vec()),
        Strategy::Info => Output::Info(Box::new(info(descriptor, &mut statement))),
        Strategy::Row(_) | Strategy::Rows(_) => {
            return Err(RelmapError::Validation(format!(
                "output '{}' is served through the row cache",
                plan.strategy
            )));
        }
        _ => match plan.fetch_mode {
            FetchMode::Assoc => assoc(plan, &mut statement)?,
            FetchMode::Num => num(plan, &mut statement)?,
            FetchMode::Unique => unique(&mut statement),
            FetchMode::KeyPair => key_pair(plan, &mut statement)?,
            FetchMode::Segment => segment(plan, &mut statement)?,
            FetchMode::Column => column(plan, &mut statement)?,
            FetchMode::ColumnGroup => column_group(plan, &mut statement)?,
            FetchMode::Handle(_) | FetchMode::None => Output::Statement(statement),
        },
    };
    Ok(output)
}

fn info(descriptor: &QueryDescriptor, statement: &mut Statement) -> StatementInfo {
    let kind = descriptor.kind;
    let post = descriptor.post.clone().unwrap_or_default();
    let row_count = Strategy::RowCount.accepts(kind).then_some(post.row_count);
    let reads = kind.is_read();
    let column_count = reads.then(|| statement.column_count());
    StatementInfo {
        kind,
        table: descriptor.table.clone(),
        sql: descriptor.emulated(),
        row_count,
        insert_id: if kind == QueryKind::Insert {
            post.insert_id
        } else {
            None
        },
        column_count,
        cells: column_count.map(|c| post.row_count * c as u64),
        columns: if reads {
            statement.columns().to_vec()
        } else {
            Vec::new()
        },
        rows: if reads {
            statement.fetch_all_records()
        } else {
            Vec::new()
        },
    }
}

fn assoc(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    if plan.extraction == Extraction::Single {
        return Ok(statement
            .fetch_record()
            .map_or(Output::Empty, Output::Record));
    }
    match &plan.key_remap {
        None => Ok(Output::Records(statement.fetch_all_records())),
        Some(key) => {
            let index = column_index(statement, key)?;
            let mut keyed = Keyed::new();
            for record in statement.fetch_all_records() {
                let k = record.get_index(index).cloned().unwrap_or(Value::Null);
                keyed.insert(k, record);
            }
            Ok(Output::KeyedRecords(keyed))
        }
    }
}

fn num(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    if plan.extraction == Extraction::Single {
        return Ok(statement
            .fetch_next()
            .map_or(Output::Empty, |row| Output::Values(row.to_vec())));
    }
    match &plan.key_remap {
        None => Ok(Output::ValueRows(statement.fetch_all())),
        Some(key) => {
            let index = column_index(statement, key)?;
            let mut keyed = Keyed::new();
            for row in statement.fetch_all() {
                keyed.insert(cell(&row, index), row);
            }
            Ok(Output::KeyedValueRows(keyed))
        }
    }
}

fn unique(statement: &mut Statement) -> Output {
    let mut keyed = Keyed::new();
    for mut record in statement.fetch_all_records() {
        let key = record.remove_index(0).unwrap_or(Value::Null);
        keyed.insert(key, record);
    }
    Output::KeyedRecords(keyed)
}

fn pair_indexes(plan: &FetchPlan, statement: &Statement) -> Result<(usize, usize)> {
    let key = plan.args.first().cloned().unwrap_or(ColumnRef::Index(0));
    let value = plan.args.get(1).cloned().unwrap_or(ColumnRef::Index(1));
    Ok((
        column_index(statement, &key)?,
        column_index(statement, &value)?,
    ))
}

fn key_pair(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    if statement.column_count() < 2 {
        return Ok(Output::Empty);
    }
    let (k, v) = pair_indexes(plan, statement)?;
    if plan.extraction == Extraction::Single {
        return Ok(statement
            .fetch_next()
            .map_or(Output::Empty, |row| Output::Pair(cell(row, k), cell(row, v))));
    }
    let mut pairs = Keyed::new();
    for row in statement.fetch_all() {
        pairs.insert(cell(&row, k), cell(&row, v));
    }
    Ok(Output::Pairs(pairs))
}

fn segment(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    let template = plan.template.as_deref().unwrap_or_default();
    if plan.extraction == Extraction::Single {
        return Ok(statement.fetch_record().map_or(Output::Empty, |record| {
            Output::Text(fill_template(template, &record))
        }));
    }
    let mut texts = Keyed::new();
    for record in statement.fetch_all_records() {
        let key = record.get_index(0).cloned().unwrap_or(Value::Null);
        if key.is_null() {
            return Err(RelmapError::KeyCollision {
                key: "NULL".into(),
            });
        }
        texts.try_insert(key, fill_template(template, &record))?;
    }
    Ok(Output::Texts(texts))
}

fn column(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    let target = plan.args.first().cloned().unwrap_or(ColumnRef::Index(0));
    if statement.column_count() == 0 {
        return Ok(Output::Empty);
    }
    let index = column_index(statement, &target)?;
    if plan.extraction == Extraction::Scalar {
        return Ok(statement
            .fetch_next()
            .map_or(Output::Empty, |row| Output::Scalar(cell(row, index))));
    }
    Ok(Output::Values(
        statement
            .fetch_all()
            .iter()
            .map(|row| cell(row, index))
            .collect(),
    ))
}

fn column_group(plan: &FetchPlan, statement: &mut Statement) -> Result<Output> {
    if statement.column_count() < 2 {
        return Ok(Output::Grouped(Keyed::new()));
    }
    let (k, v) = pair_indexes(plan, statement)?;
    let mut grouped: Keyed<Vec<Value>> = Keyed::new();
    for row in statement.fetch_all() {
        let key = cell(&row, k);
        match grouped.get_mut(&key) {
            Some(values) => values.push(cell(&row, v)),
            None => {
                grouped.insert(key, vec![cell(&row, v)]);
            }
        }
    }
    Ok(Output::Grouped(grouped))
}
