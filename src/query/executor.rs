use crate::Session;
use crate::cache::Retrieval;
use crate::catalog::types::Record;
use crate::driver::Statement;
use crate::error::{RelmapError, Result};
use crate::query::descriptor::{QueryDescriptor, StatementMeta};
use crate::query::fetch::{DebugInfo, Output, extract};
use crate::query::kind::QueryKind;
use crate::query::output::{FetchMode, OutputSpec, Strategy, resolve};
use crate::rollback;
use tracing::{debug, warn};

/// Per-call switches for internal statements.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunOptions {
    pub synthesize_rollback: bool,
    pub check_gate: bool,
    /// Caller statements stop at the debug toggle; the session's own cache
    /// and snapshot reads always run.
    pub honour_debug: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            synthesize_rollback: true,
            check_gate: true,
            honour_debug: true,
        }
    }
}

impl RunOptions {
    /// Reads the session issues on its own behalf.
    pub(crate) fn internal() -> Self {
        Self {
            synthesize_rollback: false,
            check_gate: false,
            honour_debug: false,
        }
    }
}

impl Session {
    /// Runs `descriptor` and shapes its result according to `spec`.
    pub fn execute(
        &mut self,
        descriptor: QueryDescriptor,
        spec: impl Into<OutputSpec>,
    ) -> Result<Output> {
        self.run(descriptor, &spec.into(), RunOptions::default())
    }

    /// Runs `descriptor` and hands back the raw statement handle.
    pub fn statement(&mut self, descriptor: QueryDescriptor) -> Result<Statement> {
        let output = self.execute(descriptor, Strategy::Statement)?;
        output
            .into_statement()
            .ok_or_else(|| RelmapError::Validation("statement output expected".into()))
    }

    pub(crate) fn run(
        &mut self,
        mut descriptor: QueryDescriptor,
        spec: &OutputSpec,
        options: RunOptions,
    ) -> Result<Output> {
        self.check_ready()?;
        descriptor.validate()?;
        let kind = descriptor.kind;

        if spec.strategy() == Some(Strategy::Debug) || (options.honour_debug && self.config.debug) {
            return Ok(Output::Debug(Box::new(DebugInfo::of(&descriptor))));
        }

        let before_after = spec
            .before_after_spec()
            .filter(|_| kind.is_mutating())
            .cloned();
        let main_spec = if before_after.is_some() {
            OutputSpec::Default
        } else {
            spec.clone()
        };
        let plan = resolve(kind, &main_spec)?;
        if let FetchMode::Handle(retrieval) = plan.fetch_mode {
            return self.run_row_output(descriptor, plan.strategy, retrieval);
        }

        if options.check_gate && self.config.check_permissions {
            self.config
                .permissions
                .check_permission(kind, descriptor.table.as_deref())?;
        }
        if kind == QueryKind::Select && !descriptor.has_limit() {
            descriptor.limit = plan.select_limit;
        }

        let synthesize = options.synthesize_rollback
            && self.config.rollback
            && rollback::target(&descriptor).is_some();
        let needs_snapshot = synthesize && rollback::needs_snapshot(&descriptor);
        let snapshot = if needs_snapshot {
            self.read_snapshot(&descriptor)?
        } else {
            None
        };

        let snapshot_read = descriptor.select.as_deref().cloned();
        let before = match (&before_after, &snapshot_read) {
            (Some(shape), Some(read)) => Some(Box::new(self.snapshot_output(read.clone(), shape)?)),
            _ => None,
        };

        let sql = descriptor.effective_sql();
        let result = self.backend_mut()?.run(&sql, &descriptor.params);
        self.statements_issued += 1;
        let statement = match result {
            Ok(statement) => statement,
            Err(err) => {
                let query = descriptor.emulated();
                warn!(
                    kind = %kind,
                    table = descriptor.table.as_deref().unwrap_or(""),
                    code = err.code.as_deref().unwrap_or(""),
                    error = %err.message,
                    "statement failed"
                );
                return Err(RelmapError::Statement {
                    query,
                    message: err.message,
                });
            }
        };

        let insert_id = if kind == QueryKind::Insert {
            self.backend_mut()?.last_insert_id()
        } else {
            None
        };
        descriptor.post = Some(StatementMeta {
            row_count: statement.row_count(),
            column_count: statement.column_count(),
            insert_id,
            columns: statement.columns().to_vec(),
        });
        if self.config.log {
            debug!(
                kind = %kind,
                table = descriptor.table.as_deref().unwrap_or(""),
                rows = statement.row_count(),
                insert_id = ?insert_id,
                sql = %descriptor.emulated(),
                "statement executed"
            );
        }

        if synthesize {
            match rollback::synthesize(&descriptor, &self.config.primary, snapshot, insert_id) {
                Some(inverse) => descriptor.rollback = Some(Box::new(inverse)),
                None if needs_snapshot => warn!(
                    kind = %kind,
                    table = descriptor.table.as_deref().unwrap_or(""),
                    "no snapshot row, rollback not recorded"
                ),
                None => {}
            }
        }

        self.sync_cache(&descriptor);
        let output = extract(&plan, &descriptor, statement);
        if self.config.history {
            let meta = descriptor.post.clone().unwrap_or_default();
            self.history.add(descriptor, meta);
        }
        let output = output?;

        match before_after {
            Some(shape) => {
                let after = match snapshot_read {
                    Some(read) => Some(Box::new(self.snapshot_output(read, &shape)?)),
                    None => None,
                };
                Ok(Output::BeforeAfter {
                    before,
                    query: Box::new(output),
                    after,
                })
            }
            None => Ok(output),
        }
    }

    /// A `beforeAfter` read. Row shapes are re-read from the backend and
    /// detached from the identity map so before and after stay distinct.
    fn snapshot_output(&mut self, read: QueryDescriptor, shape: &OutputSpec) -> Result<Output> {
        let shape = shape.clone().refreshing();
        Ok(self.run(read, &shape, RunOptions::default())?.detached())
    }

    /// Current contents of the single row an update or delete targets.
    fn read_snapshot(&mut self, descriptor: &QueryDescriptor) -> Result<Option<Record>> {
        let Some((table, Some(key))) = rollback::target(descriptor) else {
            return Ok(None);
        };
        let read = QueryDescriptor::select_key(table, &self.config.primary, key);
        let output = self.run(read, &Strategy::Assoc.into(), RunOptions::internal())?;
        Ok(output.into_record())
    }

    fn run_row_output(
        &mut self,
        descriptor: QueryDescriptor,
        strategy: Strategy,
        retrieval: Retrieval,
    ) -> Result<Output> {
        let Some(table) = descriptor.table.clone().filter(|t| !t.is_empty()) else {
            return Err(RelmapError::MissingTarget {
                output: strategy.token().to_string(),
                reason: "row outputs need a table".into(),
            });
        };
        let single = matches!(strategy, Strategy::Row(_));

        let keys = match descriptor.keys.clone() {
            Some(keys) if single && keys.is_empty() => {
                return Err(RelmapError::MissingTarget {
                    output: strategy.token().to_string(),
                    reason: "no key given".into(),
                });
            }
            Some(keys) => keys,
            None => self.row_keys(descriptor, strategy, single)?,
        };

        if single {
            let Some(key) = keys.first().copied() else {
                return Ok(Output::Row(None));
            };
            let handles = self.retrieve(&table, retrieval, &[key])?;
            Ok(Output::Row(handles.into_iter().next()))
        } else {
            Ok(Output::Rows(self.retrieve(&table, retrieval, &keys)?))
        }
    }

    /// Primary keys selected by `descriptor`, read through the primary column.
    fn row_keys(
        &mut self,
        descriptor: QueryDescriptor,
        strategy: Strategy,
        single: bool,
    ) -> Result<Vec<i64>> {
        let primary = self.config.primary.clone();
        let mut shape = OutputSpec::structured(Strategy::Columns).with_columns([primary.as_str()]);
        if single {
            shape = shape.with_select_limit(1);
        }
        let missing = |reason: String| RelmapError::MissingTarget {
            output: strategy.token().to_string(),
            reason,
        };
        let values = match self.run(descriptor, &shape, RunOptions::default()) {
            Ok(output) => output.try_into_values()?,
            Err(RelmapError::Validation(_)) => {
                return Err(missing(format!("result has no '{primary}' column")));
            }
            Err(err) => return Err(err),
        };
        values
            .iter()
            .map(|value| {
                value
                    .as_i64()
                    .ok_or_else(|| missing(format!("'{primary}' value {value} is not a key")))
            })
            .collect()
    }

    /// Drops cached rows a write has removed from the backend.
    fn sync_cache(&mut self, descriptor: &QueryDescriptor) {
        let Some(table) = descriptor.table.as_deref() else {
            return;
        };
        match descriptor.kind {
            QueryKind::Delete => {
                let Some(cache) = self.caches.get_mut(table) else {
                    return;
                };
                match descriptor.keys.as_deref() {
                    Some(keys) => {
                        for key in keys {
                            cache.unlink(*key);
                        }
                    }
                    // Filtered or raw deletes may have removed any linked row.
                    None => {
                        cache.unlink_all();
                    }
                }
            }
            QueryKind::Truncate => {
                if let Some(cache) = self.caches.get_mut(table) {
                    cache.unlink_all();
                }
            }
            QueryKind::Drop => {
                self.caches.remove(table);
            }
            _ => {}
        }
    }

    /// Runs the inverse recorded on the `index`th history entry of `kind`.
    ///
    /// Negative indexes count back from the latest entry. The inverse itself
    /// gets no inverse. Returns `None` when the entry or its inverse is
    /// missing.
    pub fn history_replay_rollback(
        &mut self,
        kind: QueryKind,
        index: isize,
        spec: impl Into<OutputSpec>,
    ) -> Result<Option<Output>> {
        let Some(inverse) = self
            .history
            .type_index(kind, index)
            .and_then(|entry| entry.rollback())
            .map(|rollback| rollback.descriptor.clone())
        else {
            return Ok(None);
        };
        let options = RunOptions {
            synthesize_rollback: false,
            ..RunOptions::default()
        };
        self.run(inverse, &spec.into(), options).map(Some)
    }
}
