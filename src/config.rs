use crate::permission::PermissionSet;
use crate::query::kind::QueryKind;

/// Runtime configuration for a [`crate::Session`].
///
/// Every toggle here is also adjustable on a live session; the config only
/// supplies the starting values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub check_permissions: bool,
    pub history: bool,
    pub rollback: bool,
    pub log: bool,
    /// Return the emulated statement instead of executing it.
    pub debug: bool,
    /// Primary-key column shared by every cached table.
    pub primary: String,
    pub charset: String,
    pub default_port: u16,
    pub permissions: PermissionSet,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_permissions: true,
            history: true,
            rollback: true,
            log: true,
            debug: false,
            primary: "id".into(),
            charset: "utf8mb4".into(),
            default_port: 3306,
            permissions: PermissionSet::allow_all(),
        }
    }
}

impl SessionConfig {
    /// Root permissions limited to select and show.
    pub fn read_only() -> Self {
        Self {
            permissions: PermissionSet::only(&[QueryKind::Select, QueryKind::Show]),
            rollback: false,
            ..Self::default()
        }
    }

    /// No history, no rollback synthesis and no statement logging.
    pub fn unrecorded() -> Self {
        Self {
            history: false,
            rollback: false,
            log: false,
            ..Self::default()
        }
    }

    pub fn with_primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = primary.into();
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::SessionConfig;
    use crate::query::kind::QueryKind;

    #[test]
    fn profiles_override_only_their_fields() {
        let base = SessionConfig::default();
        let quiet = SessionConfig::unrecorded();
        assert!(!quiet.history && !quiet.rollback && !quiet.log);
        assert_eq!(quiet.primary, base.primary);
        assert_eq!(quiet.permissions, base.permissions);

        let ro = SessionConfig::read_only();
        assert!(ro.permissions.check(QueryKind::Show, None));
        assert!(!ro.permissions.check(QueryKind::Insert, None));
        assert!(ro.history);
    }
}
