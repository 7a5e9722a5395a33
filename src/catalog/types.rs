use compact_str::CompactString;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scalar cell value exchanged with the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(CompactString),
    Blob(Vec<u8>),
}

impl Value {
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Blob(_) => 5,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Boolean(_) => "Boolean",
            Value::Text(_) => "Text",
            Value::Blob(_) => "Blob",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view used for primary keys. Text holding a base-10 integer
    /// qualifies, since several drivers stringify numeric columns.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(v) => Some(i64::from(*v)),
            Value::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{}", i64::from(*v)),
            Value::Text(v) => f.write_str(v),
            Value::Blob(v) => f.write_str(&hex::encode(v)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Blob(a), Value::Blob(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value.into())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// One fetched row with its column names, in result order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    columns: Vec<CompactString>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Vec<CompactString>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<CompactString>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[CompactString] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|i| &self.values[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.as_str() == column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(CompactString::as_str)
            .zip(self.values.iter())
    }

    /// Removes the column at `index`, returning its value.
    pub fn remove_index(&mut self, index: usize) -> Option<Value> {
        if index >= self.values.len() {
            return None;
        }
        self.columns.remove(index);
        Some(self.values.remove(index))
    }

    pub fn into_pairs(self) -> Vec<(CompactString, Value)> {
        self.columns.into_iter().zip(self.values).collect()
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, Value};
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("finite float only", |v| v.is_finite())
                .prop_map(Value::Float),
            "\\PC{0,32}".prop_map(|s| Value::Text(s.into())),
            prop::collection::vec(any::<u8>(), 0..64).prop_map(Value::Blob),
            Just(Value::Null),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in arb_value(), b in arb_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        #[test]
        fn equality_matches_ordering(a in arb_value()) {
            let copy = a.clone();
            prop_assert_eq!(a, copy);
        }
    }

    #[test]
    fn integer_keys_accept_numeric_text() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from(" 7 ").as_i64(), Some(7));
        assert_eq!(Value::from("x").as_i64(), None);
        assert_eq!(Value::Float(1.0).as_i64(), None);
    }

    #[test]
    fn record_serializes_as_ordered_map() {
        let record = Record::from_pairs([("id", Value::from(1)), ("name", Value::from("a"))]);
        let json = serde_json::to_string(&record).expect("serialize");
        assert_eq!(json, r#"{"id":1,"name":"a"}"#);
    }

    #[test]
    fn record_lookup_by_name_and_index() {
        let mut record = Record::from_pairs([("id", 3), ("qty", 9)]);
        assert_eq!(record.get("qty"), Some(&Value::Integer(9)));
        assert_eq!(record.get_index(0), Some(&Value::Integer(3)));
        assert_eq!(record.get("missing"), None);
        assert_eq!(record.remove_index(0), Some(Value::Integer(3)));
        assert_eq!(record.columns(), &["qty"]);
    }
}
