use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The statement families the executor dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Select,
    Show,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Truncate,
    Drop,
}

impl QueryKind {
    pub const ALL: [QueryKind; 9] = [
        QueryKind::Select,
        QueryKind::Show,
        QueryKind::Insert,
        QueryKind::Update,
        QueryKind::Delete,
        QueryKind::Create,
        QueryKind::Alter,
        QueryKind::Truncate,
        QueryKind::Drop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Select => "select",
            QueryKind::Show => "show",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
            QueryKind::Create => "create",
            QueryKind::Alter => "alter",
            QueryKind::Truncate => "truncate",
            QueryKind::Drop => "drop",
        }
    }

    /// Position in [`QueryKind::ALL`], used for dense per-kind tables.
    pub fn index(self) -> usize {
        match self {
            QueryKind::Select => 0,
            QueryKind::Show => 1,
            QueryKind::Insert => 2,
            QueryKind::Update => 3,
            QueryKind::Delete => 4,
            QueryKind::Create => 5,
            QueryKind::Alter => 6,
            QueryKind::Truncate => 7,
            QueryKind::Drop => 8,
        }
    }

    /// Kinds that produce a result set.
    pub fn is_read(self) -> bool {
        matches!(self, QueryKind::Select | QueryKind::Show)
    }

    /// Row-level writes, the only kinds eligible for rollback synthesis.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            QueryKind::Insert | QueryKind::Update | QueryKind::Delete
        )
    }

    pub fn requires_table(self) -> bool {
        !self.is_read()
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown query kind '{s}'"))
    }
}
