use crate::error::{RelmapError, Result};
use crate::query::kind::QueryKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statement permissions of one connection.
///
/// Semantics are intentionally one-directional:
/// - The root set grants or denies each [`QueryKind`] for the whole connection.
/// - A table override can only narrow: effective = root AND override.
/// - A table without an override for a kind inherits the root value.
///
/// The effective value is always computed on lookup; no merged table is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    root: [bool; 9],
    #[serde(default)]
    tables: BTreeMap<String, BTreeMap<QueryKind, bool>>,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl PermissionSet {
    pub fn allow_all() -> Self {
        Self {
            root: [true; 9],
            tables: BTreeMap::new(),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            root: [false; 9],
            tables: BTreeMap::new(),
        }
    }

    /// Root set granting only the given kinds.
    pub fn only(kinds: &[QueryKind]) -> Self {
        let mut set = Self::deny_all();
        for kind in kinds {
            set.root[kind.index()] = true;
        }
        set
    }

    pub fn root(&self, kind: QueryKind) -> bool {
        self.root[kind.index()]
    }

    pub fn set_root(&mut self, kind: QueryKind, allowed: bool) {
        self.root[kind.index()] = allowed;
    }

    pub fn with_root(mut self, kind: QueryKind, allowed: bool) -> Self {
        self.set_root(kind, allowed);
        self
    }

    /// Explicit table-level value, `None` when the table inherits the root.
    pub fn table_override(&self, table: &str, kind: QueryKind) -> Option<bool> {
        self.tables.get(table).and_then(|m| m.get(&kind)).copied()
    }

    pub fn set_table(&mut self, table: impl Into<String>, kind: QueryKind, allowed: bool) {
        self.tables
            .entry(table.into())
            .or_default()
            .insert(kind, allowed);
    }

    pub fn with_table(mut self, table: impl Into<String>, kind: QueryKind, allowed: bool) -> Self {
        self.set_table(table, kind, allowed);
        self
    }

    pub fn clear_table(&mut self, table: &str) {
        self.tables.remove(table);
    }

    pub fn check(&self, kind: QueryKind, table: Option<&str>) -> bool {
        let table_allows = table
            .and_then(|t| self.table_override(t, kind))
            .unwrap_or(true);
        self.root(kind) && table_allows
    }

    pub fn check_permission(&self, kind: QueryKind, table: Option<&str>) -> Result<()> {
        if self.check(kind, table) {
            Ok(())
        } else {
            Err(RelmapError::PermissionDenied {
                kind,
                table: table.map(str::to_string),
            })
        }
    }

    /// Root values keyed by kind name, for diagnostics.
    pub fn root_map(&self) -> BTreeMap<QueryKind, bool> {
        QueryKind::ALL
            .into_iter()
            .map(|kind| (kind, self.root(kind)))
            .collect()
    }
}
