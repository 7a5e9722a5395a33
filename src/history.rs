use crate::query::descriptor::{QueryDescriptor, StatementMeta};
use crate::query::kind::QueryKind;
use crate::rollback::Rollback;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub sequence: u64,
    pub kind: QueryKind,
    pub descriptor: QueryDescriptor,
    pub meta: StatementMeta,
    /// Statement text with parameters substituted.
    pub emulated: String,
}

impl HistoryEntry {
    pub fn rollback(&self) -> Option<&Rollback> {
        self.descriptor.rollback.as_deref()
    }
}

/// Append-only record of executed statements, in issue order.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    next_sequence: u64,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, descriptor: QueryDescriptor, meta: StatementMeta) -> &HistoryEntry {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let emulated = descriptor.emulated();
        self.entries.push(HistoryEntry {
            sequence,
            kind: descriptor.kind,
            descriptor,
            meta,
            emulated,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn of_kind(&self, kind: QueryKind) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Entry at `index` among entries of `kind`; negative indexes count back
    /// from the most recent one (`-1` is the latest).
    pub fn type_index(&self, kind: QueryKind, index: isize) -> Option<&HistoryEntry> {
        if index >= 0 {
            return self.of_kind(kind).nth(index.unsigned_abs());
        }
        let back = index.unsigned_abs() - 1;
        self.entries
            .iter()
            .rev()
            .filter(|e| e.kind == kind)
            .nth(back)
    }

    /// Entry count per kind. Kinds with no entries are omitted.
    pub fn counts(&self) -> BTreeMap<QueryKind, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Distinct emulated statements, first occurrence order.
    pub fn statements(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .map(|e| e.emulated.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::HistoryLog;
    use crate::query::descriptor::{QueryDescriptor, StatementMeta};
    use crate::query::kind::QueryKind;

    fn log_with(kinds: &[(QueryKind, &str)]) -> HistoryLog {
        let mut log = HistoryLog::new();
        for (kind, sql) in kinds {
            let d = QueryDescriptor::raw(*kind, *sql).with_table("t");
            log.add(d, StatementMeta::default());
        }
        log
    }

    #[test]
    fn negative_indexes_count_from_latest_of_kind() {
        let log = log_with(&[
            (QueryKind::Update, "u1"),
            (QueryKind::Select, "s1"),
            (QueryKind::Update, "u2"),
            (QueryKind::Update, "u3"),
        ]);
        let sql = |i| log.type_index(QueryKind::Update, i).map(|e| e.descriptor.sql.as_str());
        assert_eq!(sql(-1), Some("u3"));
        assert_eq!(sql(-2), Some("u2"));
        assert_eq!(sql(0), Some("u1"));
        assert_eq!(sql(2), Some("u3"));
        assert_eq!(sql(3), None);
        assert_eq!(sql(-4), None);
        assert!(log.type_index(QueryKind::Drop, -1).is_none());
    }

    #[test]
    fn sequences_are_strictly_increasing() {
        let log = log_with(&[(QueryKind::Select, "a"), (QueryKind::Select, "b")]);
        let seqs: Vec<u64> = log.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1]);
    }

    #[test]
    fn counts_and_distinct_statements() {
        let log = log_with(&[
            (QueryKind::Select, "SELECT 1"),
            (QueryKind::Select, "SELECT 1"),
            (QueryKind::Insert, "INSERT"),
        ]);
        assert_eq!(log.counts().get(&QueryKind::Select), Some(&2));
        assert_eq!(log.counts().get(&QueryKind::Delete), None);
        assert_eq!(log.total(), 3);
        assert_eq!(log.statements(), vec!["SELECT 1", "INSERT"]);
    }
}
