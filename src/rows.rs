//! Keyed row retrieval through the session's identity maps, plus the
//! single-row write helpers built on top of it.

use crate::Session;
use crate::cache::{Retrieval, RowCache, RowHandle};
use crate::catalog::types::{Record, Value};
use crate::error::{RelmapError, Result};
use crate::lib_helpers::{check_bulk_rows, parse_pointer};
use crate::query::descriptor::QueryDescriptor;
use crate::query::executor::RunOptions;
use crate::query::kind::QueryKind;
use crate::query::output::{OutputSpec, Strategy};
use tracing::debug;

impl Session {
    /// Handles for `keys` in request order, following `retrieval`'s cache
    /// rules. Keys the backend no longer has are left out.
    pub fn retrieve(
        &mut self,
        table: &str,
        retrieval: Retrieval,
        keys: &[i64],
    ) -> Result<Vec<RowHandle>> {
        self.check_ready()?;
        let plan = self
            .caches
            .entry(table.to_string())
            .or_insert_with(|| RowCache::new(table))
            .plan(retrieval, keys);

        let mut fetched = Vec::with_capacity(plan.fetch.len());
        if plan.needs_backend() {
            if self.config.check_permissions {
                self.config
                    .permissions
                    .check_permission(QueryKind::Select, Some(table))?;
            }
            let primary = self.config.primary.clone();
            let read = QueryDescriptor::select_keys(table, &primary, &plan.fetch);
            let records = self
                .run(read, &OutputSpec::Strategy(Strategy::Assocs), RunOptions::internal())?
                .try_into_records()?;
            for record in records {
                if let Some(key) = record.get(&primary).and_then(Value::as_i64) {
                    fetched.push((key, record));
                }
            }
        }

        let cache = self
            .caches
            .entry(table.to_string())
            .or_insert_with(|| RowCache::new(table));
        Ok(cache.settle(plan, fetched))
    }

    fn retrieve_one(&mut self, table: &str, retrieval: Retrieval, key: i64) -> Result<Option<RowHandle>> {
        Ok(self.retrieve(table, retrieval, &[key])?.into_iter().next())
    }

    pub fn get(&mut self, table: &str, key: i64) -> Result<Option<RowHandle>> {
        self.retrieve_one(table, Retrieval::Plain, key)
    }

    pub fn get_refresh(&mut self, table: &str, key: i64) -> Result<Option<RowHandle>> {
        self.retrieve_one(table, Retrieval::Refresh, key)
    }

    /// Cached handle only; never touches the backend.
    pub fn get_in(&mut self, table: &str, key: i64) -> Result<Option<RowHandle>> {
        self.retrieve_one(table, Retrieval::In, key)
    }

    pub fn get_in_refresh(&mut self, table: &str, key: i64) -> Result<Option<RowHandle>> {
        self.retrieve_one(table, Retrieval::InRefresh, key)
    }

    pub fn get_out(&mut self, table: &str, key: i64) -> Result<Option<RowHandle>> {
        self.retrieve_one(table, Retrieval::Out, key)
    }

    pub fn rows(&mut self, table: &str, keys: &[i64]) -> Result<Vec<RowHandle>> {
        self.retrieve(table, Retrieval::Plain, keys)
    }

    pub fn rows_refresh(&mut self, table: &str, keys: &[i64]) -> Result<Vec<RowHandle>> {
        self.retrieve(table, Retrieval::Refresh, keys)
    }

    pub fn rows_in(&mut self, table: &str, keys: &[i64]) -> Result<Vec<RowHandle>> {
        self.retrieve(table, Retrieval::In, keys)
    }

    pub fn rows_in_refresh(&mut self, table: &str, keys: &[i64]) -> Result<Vec<RowHandle>> {
        self.retrieve(table, Retrieval::InRefresh, keys)
    }

    pub fn rows_out(&mut self, table: &str, keys: &[i64]) -> Result<Vec<RowHandle>> {
        self.retrieve(table, Retrieval::Out, keys)
    }

    pub fn is_linked(&self, table: &str, key: i64) -> bool {
        self.caches.get(table).is_some_and(|c| c.is_linked(key))
    }

    pub fn unlink(&mut self, table: &str, key: i64) -> Option<RowHandle> {
        self.caches.get_mut(table).and_then(|c| c.unlink(key))
    }

    pub fn unlink_all(&mut self, table: &str) -> usize {
        self.caches.get_mut(table).map_or(0, RowCache::unlink_all)
    }

    pub fn cache(&self, table: &str) -> Option<&RowCache> {
        self.caches.get(table)
    }

    /// Resolves a `table-key` pointer. Malformed pointers and tables outside
    /// `valid_tables` yield `None`.
    pub fn from_pointer(
        &mut self,
        pointer: &str,
        valid_tables: Option<&[&str]>,
    ) -> Result<Option<RowHandle>> {
        let Some((table, key)) = parse_pointer(pointer) else {
            return Ok(None);
        };
        if valid_tables.is_some_and(|valid| !valid.contains(&table)) {
            return Ok(None);
        }
        self.get(table, key)
    }

    /// Inserts one row and returns its linked handle.
    pub fn insert_row(&mut self, table: &str, values: Record) -> Result<RowHandle> {
        let explicit = values
            .get(&self.config.primary)
            .and_then(Value::as_i64);
        let output = self.execute(QueryDescriptor::insert(table, values), OutputSpec::Default)?;
        let key = explicit.or(output.insert_id()).ok_or_else(|| {
            RelmapError::MissingTarget {
                output: Strategy::InsertId.token().to_string(),
                reason: format!("insert into '{table}' produced no key"),
            }
        })?;
        self.get_refresh(table, key)?
            .ok_or_else(|| RelmapError::MissingTarget {
                output: Strategy::Row(Retrieval::Refresh).token().to_string(),
                reason: format!("row {key} of '{table}' not found after insert"),
            })
    }

    /// Updates one row by key. A linked handle is refreshed in place.
    pub fn update_row(&mut self, table: &str, key: i64, values: Record) -> Result<u64> {
        let primary = self.config.primary.clone();
        let output = self.execute(
            QueryDescriptor::update_by_key(table, &primary, values, key),
            OutputSpec::Default,
        )?;
        if self.is_linked(table, key) {
            self.retrieve(table, Retrieval::InRefresh, &[key])?;
        }
        Ok(output.count().unwrap_or(0))
    }

    pub fn delete_row(&mut self, table: &str, key: i64) -> Result<u64> {
        let primary = self.config.primary.clone();
        let output = self.execute(
            QueryDescriptor::delete_by_key(table, &primary, key),
            OutputSpec::Default,
        )?;
        Ok(output.count().unwrap_or(0))
    }

    /// Inserts every row of `rows`, each covering exactly `fields`. Returns
    /// the generated keys in row order.
    pub fn inserts(
        &mut self,
        table: &str,
        fields: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<Vec<Option<i64>>> {
        check_bulk_rows(fields, rows)?;
        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            let record = Record::from_pairs(fields.iter().copied().zip(row.iter().cloned()));
            let output = self.execute(QueryDescriptor::insert(table, record), Strategy::InsertId)?;
            keys.push(output.insert_id());
        }
        Ok(keys)
    }

    /// Claims the next primary key of `table` by inserting a row of defaults
    /// and deleting it again. The delete bypasses the permission gate.
    pub fn reserve_primary(&mut self, table: &str) -> Result<Option<i64>> {
        let output = self.execute(
            QueryDescriptor::insert(table, Record::default()),
            Strategy::InsertId,
        )?;
        let Some(key) = output.insert_id() else {
            return Ok(None);
        };
        let primary = self.config.primary.clone();
        let options = RunOptions {
            check_gate: false,
            ..RunOptions::default()
        };
        let deleted = self
            .run(
                QueryDescriptor::delete_by_key(table, &primary, key),
                &OutputSpec::Default,
                options,
            )?
            .count()
            .unwrap_or(0);
        debug!(table, key, deleted, "reserved primary key");
        Ok((deleted == 1).then_some(key))
    }
}
