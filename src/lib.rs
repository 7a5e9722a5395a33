pub mod cache;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod history;
mod lib_helpers;
pub mod permission;
pub mod query;
pub mod repository;
pub mod rollback;
mod rows;

pub use crate::cache::{Retrieval, RowCache, RowHandle};
pub use crate::catalog::types::{Record, Value};
pub use crate::config::SessionConfig;
pub use crate::driver::{Backend, BackendError, Params, Statement};
pub use crate::dsn::{ConnectionString, Credentials};
pub use crate::error::{ErrorCode, RelmapError, Result};
pub use crate::history::{HistoryEntry, HistoryLog};
pub use crate::permission::PermissionSet;
pub use crate::query::descriptor::QueryDescriptor;
pub use crate::query::emulate::emulate;
pub use crate::query::fetch::Output;
pub use crate::query::kind::QueryKind;
pub use crate::query::output::{OutputSpec, Strategy};

use crate::lib_helpers::validate_config;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Recording toggles suspended by [`Session::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Toggles {
    pub history: bool,
    pub rollback: bool,
    pub log: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableOverview {
    pub linked: usize,
    pub keys: Vec<i64>,
}

/// Diagnostic snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub dsn: String,
    pub driver: String,
    pub username: String,
    pub host: String,
    pub dbname: String,
    pub port: u16,
    pub charset: String,
    pub client_version: String,
    pub server_version: String,
    pub in_transaction: bool,
    pub toggles: Toggles,
    pub statements_issued: u64,
    pub history_counts: BTreeMap<QueryKind, usize>,
    pub history_total: usize,
    pub history_statements: Vec<String>,
    pub table_overview: BTreeMap<String, TableOverview>,
}

/// One live backend connection with its permissions, history and row caches.
///
/// A session is not internally synchronised; callers serialise access.
pub struct Session {
    config: SessionConfig,
    dsn: ConnectionString,
    username: String,
    backend: Option<Box<dyn Backend>>,
    history: HistoryLog,
    caches: BTreeMap<String, RowCache>,
    revert: Vec<Toggles>,
    statements_issued: u64,
}

impl Session {
    pub fn connect(dsn: &str, credentials: Credentials, config: SessionConfig) -> Result<Self> {
        validate_config(&config)?;
        let dsn = ConnectionString::parse(dsn, &config.charset, config.default_port)?;
        let backend = driver::open(&dsn, &credentials)?;
        Ok(Self::assemble(config, dsn, credentials, backend))
    }

    /// Session over an already opened backend.
    pub fn with_backend(
        dsn: &str,
        credentials: Credentials,
        config: SessionConfig,
        backend: Box<dyn Backend>,
    ) -> Result<Self> {
        validate_config(&config)?;
        let dsn = ConnectionString::parse(dsn, &config.charset, config.default_port)?;
        Ok(Self::assemble(config, dsn, credentials, backend))
    }

    fn assemble(
        config: SessionConfig,
        dsn: ConnectionString,
        credentials: Credentials,
        backend: Box<dyn Backend>,
    ) -> Self {
        info!(
            driver = %dsn.driver,
            host = %dsn.host,
            dbname = %dsn.dbname,
            port = dsn.port,
            username = %credentials.username,
            check_permissions = config.check_permissions,
            history = config.history,
            rollback = config.rollback,
            "session connected"
        );
        Self {
            config,
            dsn,
            username: credentials.username.clone(),
            backend: Some(backend),
            history: HistoryLog::new(),
            caches: BTreeMap::new(),
            revert: Vec::new(),
            statements_issued: 0,
        }
    }

    /// Closes the connection and drops every cached row and the history.
    pub fn disconnect(&mut self) -> Result<()> {
        self.check_ready()?;
        self.backend = None;
        self.caches.clear();
        self.history.clear();
        info!(dsn = %self.dsn, "session disconnected");
        Ok(())
    }

    /// Reopens the connection the session was created with.
    pub fn reconnect(&mut self, credentials: Credentials) -> Result<()> {
        if self.is_ready() {
            return Err(RelmapError::AlreadyReady);
        }
        let backend = driver::open(&self.dsn, &credentials)?;
        self.username = credentials.username.clone();
        self.backend = Some(backend);
        info!(dsn = %self.dsn, username = %self.username, "session reconnected");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn check_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(RelmapError::NotReady)
        }
    }

    pub(crate) fn backend_mut(&mut self) -> Result<&mut (dyn Backend + 'static)> {
        self.backend.as_deref_mut().ok_or(RelmapError::NotReady)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn dsn(&self) -> &ConnectionString {
        &self.dsn
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn primary(&self) -> &str {
        &self.config.primary
    }

    /// Backend statements issued since connect, snapshot reads included.
    pub fn statements_issued(&self) -> u64 {
        self.statements_issued
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.config.permissions
    }

    pub fn permissions_mut(&mut self) -> &mut PermissionSet {
        &mut self.config.permissions
    }

    pub fn has_permission(&self, kind: QueryKind, table: Option<&str>) -> bool {
        self.config.permissions.check(kind, table)
    }

    pub fn check_permission(&self, kind: QueryKind, table: Option<&str>) -> Result<&Self> {
        self.config.permissions.check_permission(kind, table)?;
        Ok(self)
    }

    pub fn toggles(&self) -> Toggles {
        Toggles {
            history: self.config.history,
            rollback: self.config.rollback,
            log: self.config.log,
        }
    }

    fn apply_toggles(&mut self, toggles: Toggles) {
        self.config.history = toggles.history;
        self.config.rollback = toggles.rollback;
        self.config.log = toggles.log;
    }

    /// Suspends history, rollback synthesis and statement logging.
    pub fn off(&mut self) -> &mut Self {
        self.revert.push(self.toggles());
        self.apply_toggles(Toggles {
            history: false,
            rollback: false,
            log: false,
        });
        self
    }

    /// Restores the toggles saved by the matching [`Session::off`].
    pub fn on(&mut self) -> &mut Self {
        if let Some(saved) = self.revert.pop() {
            self.apply_toggles(saved);
        }
        self
    }

    pub fn set_history(&mut self, value: Option<bool>) -> &mut Self {
        self.config.history = value.unwrap_or(!self.config.history);
        self
    }

    pub fn set_rollback(&mut self, value: Option<bool>) -> &mut Self {
        self.config.rollback = value.unwrap_or(!self.config.rollback);
        self
    }

    pub fn set_log(&mut self, value: Option<bool>) -> &mut Self {
        self.config.log = value.unwrap_or(!self.config.log);
        self
    }

    pub fn set_debug(&mut self, value: Option<bool>) -> &mut Self {
        self.config.debug = value.unwrap_or(!self.config.debug);
        self
    }

    pub fn set_permission_checks(&mut self, value: Option<bool>) -> &mut Self {
        self.config.check_permissions = value.unwrap_or(!self.config.check_permissions);
        self
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.backend_mut()?
            .begin()
            .map_err(|e| statement_error("BEGIN", e))
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        self.backend_mut()?
            .commit()
            .map_err(|e| statement_error("COMMIT", e))
    }

    pub fn rollback_transaction(&mut self) -> Result<()> {
        self.backend_mut()?
            .rollback()
            .map_err(|e| statement_error("ROLLBACK", e))
    }

    pub fn in_transaction(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.in_transaction())
    }

    pub fn info(&self) -> Result<SessionInfo> {
        let backend = self.backend.as_deref().ok_or(RelmapError::NotReady)?;
        Ok(SessionInfo {
            dsn: self.dsn.dsn.clone(),
            driver: backend.driver_name().to_string(),
            username: self.username.clone(),
            host: self.dsn.host.clone(),
            dbname: self.dsn.dbname.clone(),
            port: self.dsn.port,
            charset: self.dsn.charset.clone(),
            client_version: backend.client_version(),
            server_version: backend.server_version(),
            in_transaction: backend.in_transaction(),
            toggles: self.toggles(),
            statements_issued: self.statements_issued,
            history_counts: self.history.counts(),
            history_total: self.history.total(),
            history_statements: self
                .history
                .statements()
                .into_iter()
                .map(str::to_string)
                .collect(),
            table_overview: self
                .caches
                .iter()
                .map(|(table, cache)| {
                    (
                        table.clone(),
                        TableOverview {
                            linked: cache.len(),
                            keys: cache.keys(),
                        },
                    )
                })
                .collect(),
        })
    }
}

fn statement_error(query: &str, err: BackendError) -> RelmapError {
    RelmapError::Statement {
        query: query.to_string(),
        message: err.message,
    }
}
