use crate::catalog::types::Record;
use crate::query::descriptor::QueryDescriptor;
use crate::query::kind::QueryKind;
use serde::Serialize;

/// Inverse of an executed write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rollback {
    pub descriptor: QueryDescriptor,
    /// Row as read before an update or delete.
    pub snapshot: Option<Record>,
}

/// Table and key of a descriptor that can get a synthesized inverse.
///
/// Single-row inserts qualify without an explicit key since the generated
/// id is known after execution. Raw insert sql may write many rows and never
/// qualifies without a key.
pub fn target(descriptor: &QueryDescriptor) -> Option<(&str, Option<i64>)> {
    let table = descriptor.table.as_deref().filter(|t| !t.is_empty())?;
    match descriptor.kind {
        QueryKind::Insert => match descriptor.keys.as_deref() {
            None if descriptor.values.is_some() => Some((table, None)),
            Some([key]) => Some((table, Some(*key))),
            _ => None,
        },
        QueryKind::Update | QueryKind::Delete => {
            descriptor.single_key().map(|key| (table, Some(key)))
        }
        _ => None,
    }
}

/// Whether a pre-mutation snapshot read is needed before `descriptor` runs.
pub fn needs_snapshot(descriptor: &QueryDescriptor) -> bool {
    matches!(descriptor.kind, QueryKind::Update | QueryKind::Delete)
        && target(descriptor).is_some()
}

/// Builds the inverse descriptor.
///
/// Returns `None` when the target cannot be pinned to one key, or when an
/// update or delete had no snapshot row to restore.
pub fn synthesize(
    descriptor: &QueryDescriptor,
    primary: &str,
    snapshot: Option<Record>,
    insert_id: Option<i64>,
) -> Option<Rollback> {
    let (table, key) = target(descriptor)?;
    match descriptor.kind {
        QueryKind::Insert => {
            let key = key
                .or_else(|| {
                    descriptor
                        .values
                        .as_ref()
                        .and_then(|values| values.get(primary))
                        .and_then(|v| v.as_i64())
                })
                .or(insert_id)?;
            Some(Rollback {
                descriptor: QueryDescriptor::delete_by_key(table, primary, key),
                snapshot: None,
            })
        }
        QueryKind::Update => {
            let key = key?;
            let snapshot = snapshot?;
            let mut restore = snapshot.clone();
            if let Some(index) = restore.position(primary) {
                restore.remove_index(index);
            }
            Some(Rollback {
                descriptor: QueryDescriptor::update_by_key(table, primary, restore, key),
                snapshot: Some(snapshot),
            })
        }
        QueryKind::Delete => {
            let key = key?;
            let snapshot = snapshot?;
            Some(Rollback {
                descriptor: QueryDescriptor::insert_with_key(table, primary, key, snapshot.clone()),
                snapshot: Some(snapshot),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{needs_snapshot, synthesize, target};
    use crate::catalog::types::{Record, Value};
    use crate::query::descriptor::QueryDescriptor;
    use crate::query::kind::QueryKind;

    fn row() -> Record {
        Record::from_pairs([("id", Value::from(3)), ("x", Value::from(10))])
    }

    #[test]
    fn insert_rollback_prefers_explicit_key() {
        let d = QueryDescriptor::insert_with_key("t", "id", 4, Record::from_pairs([("x", 1)]));
        let rb = synthesize(&d, "id", None, Some(99)).expect("rollback");
        assert_eq!(rb.descriptor.kind, QueryKind::Delete);
        assert_eq!(rb.descriptor.single_key(), Some(4));
        assert!(rb.snapshot.is_none());
    }

    #[test]
    fn insert_rollback_falls_back_to_insert_id() {
        let d = QueryDescriptor::insert("t", Record::from_pairs([("x", 1)]));
        assert!(!needs_snapshot(&d));
        let rb = synthesize(&d, "id", None, Some(12)).expect("rollback");
        assert_eq!(rb.descriptor.single_key(), Some(12));
        assert!(synthesize(&d, "id", None, None).is_none());
    }

    #[test]
    fn update_rollback_restores_snapshot_without_primary() {
        let d = QueryDescriptor::update_by_key("t", "id", Record::from_pairs([("x", 1)]), 3);
        assert!(needs_snapshot(&d));
        let rb = synthesize(&d, "id", Some(row()), None).expect("rollback");
        assert_eq!(rb.descriptor.emulated(), r#"UPDATE "t" SET "x" = 10 WHERE "id" = 3"#);
        assert_eq!(rb.snapshot, Some(row()));
    }

    #[test]
    fn delete_rollback_reinserts_snapshot() {
        let d = QueryDescriptor::delete_by_key("t", "id", 3);
        let rb = synthesize(&d, "id", Some(row()), None).expect("rollback");
        assert_eq!(
            rb.descriptor.emulated(),
            r#"INSERT INTO "t" ("id", "x") VALUES (3, 10)"#
        );
    }

    #[test]
    fn ineligible_targets_are_skipped() {
        let multi = QueryDescriptor::delete_keys("t", "id", &[1, 2]);
        assert!(target(&multi).is_none());
        assert!(synthesize(&multi, "id", Some(row()), None).is_none());

        let missing_row = QueryDescriptor::delete_by_key("t", "id", 3);
        assert!(synthesize(&missing_row, "id", None, None).is_none());

        let raw = QueryDescriptor::raw(QueryKind::Update, "UPDATE t SET x = 1").with_table("t");
        assert!(target(&raw).is_none());
        assert!(!needs_snapshot(&raw));

        let raw_insert =
            QueryDescriptor::raw(QueryKind::Insert, "INSERT INTO t SELECT * FROM u").with_table("t");
        assert!(target(&raw_insert).is_none());
        assert!(synthesize(&raw_insert, "id", None, Some(5)).is_none());
    }
}
