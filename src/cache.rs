//! Per-table identity map of fetched rows.

use crate::catalog::types::{Record, Value};
use parking_lot::RwLock;
use serde::ser::Serializer;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// How a keyed retrieval treats the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Retrieval {
    /// Cached handle when linked, otherwise fetch and link.
    Plain,
    /// Always fetch; create or update the handle.
    Refresh,
    /// Cached handle only, never fetches.
    In,
    /// Fetch only keys that are already linked.
    InRefresh,
    /// Fetch only keys that are not linked; linked keys yield nothing.
    Out,
}

impl Retrieval {
    pub const ALL: [Retrieval; 5] = [
        Retrieval::Plain,
        Retrieval::Refresh,
        Retrieval::In,
        Retrieval::InRefresh,
        Retrieval::Out,
    ];

    pub fn queries_backend(self, linked: bool) -> bool {
        match self {
            Retrieval::Plain | Retrieval::Out => !linked,
            Retrieval::Refresh => true,
            Retrieval::In => false,
            Retrieval::InRefresh => linked,
        }
    }

    /// Whether a linked key that is not re-fetched is part of the result.
    pub fn returns_cached(self) -> bool {
        matches!(self, Retrieval::Plain | Retrieval::In)
    }

    /// Token suffix after `row`/`rows`.
    pub fn suffix(self) -> &'static str {
        match self {
            Retrieval::Plain => "",
            Retrieval::Refresh => "Refresh",
            Retrieval::In => "In",
            Retrieval::InRefresh => "InRefresh",
            Retrieval::Out => "Out",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.suffix() == suffix)
    }
}

/// Shared handle to the single in-memory copy of one row.
///
/// Clones share the same record; a refresh through the cache is visible to
/// every clone.
#[derive(Clone)]
pub struct RowHandle {
    table: Arc<str>,
    key: i64,
    record: Arc<RwLock<Record>>,
}

impl RowHandle {
    fn new(table: Arc<str>, key: i64, record: Record) -> Self {
        Self {
            table,
            key,
            record: Arc::new(RwLock::new(record)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Copy of the current row contents.
    pub fn record(&self) -> Record {
        self.record.read().clone()
    }

    pub fn get(&self, column: &str) -> Option<Value> {
        self.record.read().get(column).cloned()
    }

    /// `table-key` string accepted by [`crate::Session::from_pointer`].
    pub fn pointer(&self) -> String {
        format!("{}-{}", self.table, self.key)
    }

    /// True when both handles are the same cached row.
    pub fn ptr_eq(&self, other: &RowHandle) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    fn replace(&self, record: Record) {
        *self.record.write() = record;
    }
}

impl PartialEq for RowHandle {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table
            && self.key == other.key
            && (self.ptr_eq(other) || *self.record.read() == *other.record.read())
    }
}

impl Eq for RowHandle {}

impl fmt::Debug for RowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowHandle")
            .field("table", &self.table)
            .field("key", &self.key)
            .field("record", &*self.record.read())
            .finish()
    }
}

impl Serialize for RowHandle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.record.read().serialize(serializer)
    }
}

/// Keys a retrieval must fetch, decided against the cache before any query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalPlan {
    pub retrieval: Retrieval,
    /// Requested keys, deduplicated, in request order.
    pub order: Vec<i64>,
    pub fetch: Vec<i64>,
}

impl RetrievalPlan {
    pub fn needs_backend(&self) -> bool {
        !self.fetch.is_empty()
    }
}

/// Identity map for one table: at most one handle per primary key.
#[derive(Debug)]
pub struct RowCache {
    table: Arc<str>,
    rows: HashMap<i64, RowHandle>,
}

impl RowCache {
    pub fn new(table: &str) -> Self {
        Self {
            table: Arc::from(table),
            rows: HashMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_linked(&self, key: i64) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn peek(&self, key: i64) -> Option<RowHandle> {
        self.rows.get(&key).cloned()
    }

    pub fn keys(&self) -> Vec<i64> {
        let mut keys: Vec<i64> = self.rows.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Links `record` under `key`, updating an existing handle in place.
    pub fn link(&mut self, key: i64, record: Record) -> RowHandle {
        if let Some(existing) = self.rows.get(&key) {
            existing.replace(record);
            return existing.clone();
        }
        let handle = RowHandle::new(Arc::clone(&self.table), key, record);
        self.rows.insert(key, handle.clone());
        handle
    }

    pub fn unlink(&mut self, key: i64) -> Option<RowHandle> {
        self.rows.remove(&key)
    }

    pub fn unlink_all(&mut self) -> usize {
        let count = self.rows.len();
        self.rows.clear();
        count
    }

    pub fn plan(&self, retrieval: Retrieval, keys: &[i64]) -> RetrievalPlan {
        let mut seen = HashSet::with_capacity(keys.len());
        let order: Vec<i64> = keys.iter().copied().filter(|k| seen.insert(*k)).collect();
        let fetch: Vec<i64> = order
            .iter()
            .copied()
            .filter(|k| retrieval.queries_backend(self.is_linked(*k)))
            .collect();
        trace!(
            table = %self.table,
            retrieval = ?retrieval,
            requested = order.len(),
            fetch = fetch.len(),
            "row cache plan"
        );
        RetrievalPlan {
            retrieval,
            order,
            fetch,
        }
    }

    /// Applies fetched rows to the cache and assembles the ordered result.
    ///
    /// A key that was fetched but came back missing no longer exists in the
    /// backend and is unlinked.
    pub fn settle(&mut self, plan: RetrievalPlan, fetched: Vec<(i64, Record)>) -> Vec<RowHandle> {
        let fetch: HashSet<i64> = plan.fetch.iter().copied().collect();
        let mut found = HashSet::with_capacity(fetched.len());
        for (key, record) in fetched {
            if fetch.contains(&key) {
                self.link(key, record);
                found.insert(key);
            }
        }
        for key in &plan.fetch {
            if !found.contains(key) && self.unlink(*key).is_some() {
                trace!(table = %self.table, key, "row vanished from backend, unlinked");
            }
        }

        plan.order
            .iter()
            .filter_map(|key| {
                if fetch.contains(key) {
                    found.contains(key).then(|| self.rows.get(key).cloned()).flatten()
                } else if plan.retrieval.returns_cached() {
                    self.rows.get(key).cloned()
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Retrieval, RowCache};
    use crate::catalog::types::{Record, Value};
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn rec(key: i64, name: &str) -> Record {
        Record::from_pairs([("id", Value::from(key)), ("name", Value::from(name))])
    }

    #[test]
    fn backend_decision_matches_variant_table() {
        use Retrieval::*;
        let expected = [
            (Plain, false, true),
            (Plain, true, false),
            (Refresh, false, true),
            (Refresh, true, true),
            (In, false, false),
            (In, true, false),
            (InRefresh, false, false),
            (InRefresh, true, true),
            (Out, false, true),
            (Out, true, false),
        ];
        for (retrieval, linked, queries) in expected {
            assert_eq!(retrieval.queries_backend(linked), queries, "{retrieval:?} {linked}");
        }
    }

    #[test]
    fn link_updates_existing_handle_in_place() {
        let mut cache = RowCache::new("t");
        let first = cache.link(1, rec(1, "a"));
        let second = cache.link(1, rec(1, "b"));
        assert!(first.ptr_eq(&second));
        assert_eq!(first.get("name"), Some(Value::from("b")));
        assert_eq!(cache.len(), 1);
        assert_eq!(first.pointer(), "t-1");
    }

    #[test]
    fn plan_dedupes_and_splits_cached_keys() {
        let mut cache = RowCache::new("t");
        cache.link(1, rec(1, "a"));
        let plan = cache.plan(Retrieval::Plain, &[2, 1, 2, 3]);
        assert_eq!(plan.order, vec![2, 1, 3]);
        assert_eq!(plan.fetch, vec![2, 3]);

        let handles = cache.settle(plan, vec![(2, rec(2, "b"))]);
        let keys: Vec<i64> = handles.iter().map(|h| h.key()).collect();
        assert_eq!(keys, vec![2, 1]);
        assert!(!cache.is_linked(3));
    }

    #[test]
    fn out_skips_linked_and_in_refresh_skips_absent() {
        let mut cache = RowCache::new("t");
        cache.link(1, rec(1, "a"));
        let out = cache.plan(Retrieval::Out, &[1]);
        assert!(!out.needs_backend());
        assert!(cache.settle(out, Vec::new()).is_empty());
        assert!(cache.is_linked(1));

        let in_refresh = cache.plan(Retrieval::InRefresh, &[5]);
        assert!(!in_refresh.needs_backend());
        assert!(cache.settle(in_refresh, Vec::new()).is_empty());
    }

    #[test]
    fn refresh_of_deleted_row_unlinks() {
        let mut cache = RowCache::new("t");
        let stale = cache.link(4, rec(4, "a"));
        let plan = cache.plan(Retrieval::Refresh, &[4]);
        assert!(cache.settle(plan, Vec::new()).is_empty());
        assert!(!cache.is_linked(4));
        assert_eq!(stale.get("name"), Some(Value::from("a")));
    }

    proptest! {
        #[test]
        fn one_handle_per_key(ops in prop::collection::vec((0i64..6, any::<bool>()), 0..64)) {
            let mut cache = RowCache::new("t");
            let mut model = BTreeSet::new();
            for (key, link) in ops {
                if link {
                    let before = cache.peek(key);
                    let handle = cache.link(key, rec(key, "x"));
                    if let Some(before) = before {
                        prop_assert!(before.ptr_eq(&handle));
                    }
                    model.insert(key);
                } else {
                    cache.unlink(key);
                    model.remove(&key);
                }
                prop_assert_eq!(cache.keys(), model.iter().copied().collect::<Vec<_>>());
            }
        }
    }
}
