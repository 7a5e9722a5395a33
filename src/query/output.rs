use crate::cache::Retrieval;
use crate::error::{RelmapError, Result};
use crate::query::kind::QueryKind;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Named result shape requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Strategy {
    Row(Retrieval),
    Rows(Retrieval),
    Column,
    Columns,
    ColumnsGroup,
    ColumnCount,
    ColumnMeta,
    RowCount,
    InsertId,
    Assoc,
    Assocs,
    AssocsUnique,
    AssocsKey,
    Num,
    Nums,
    NumsKey,
    KeyPair,
    KeyPairs,
    Segment,
    Segments,
    Statement,
    Info,
    Debug,
}

impl Strategy {
    pub const FIXED: [Strategy; 21] = [
        Strategy::Column,
        Strategy::Columns,
        Strategy::ColumnsGroup,
        Strategy::ColumnCount,
        Strategy::ColumnMeta,
        Strategy::RowCount,
        Strategy::InsertId,
        Strategy::Assoc,
        Strategy::Assocs,
        Strategy::AssocsUnique,
        Strategy::AssocsKey,
        Strategy::Num,
        Strategy::Nums,
        Strategy::NumsKey,
        Strategy::KeyPair,
        Strategy::KeyPairs,
        Strategy::Segment,
        Strategy::Segments,
        Strategy::Statement,
        Strategy::Info,
        Strategy::Debug,
    ];

    /// Every strategy, row variants included.
    pub fn all() -> Vec<Strategy> {
        Retrieval::ALL
            .into_iter()
            .map(Strategy::Row)
            .chain(Retrieval::ALL.into_iter().map(Strategy::Rows))
            .chain(Self::FIXED)
            .collect()
    }

    pub fn token(self) -> &'static str {
        match self {
            Strategy::Row(Retrieval::Plain) => "row",
            Strategy::Row(Retrieval::Refresh) => "rowRefresh",
            Strategy::Row(Retrieval::In) => "rowIn",
            Strategy::Row(Retrieval::InRefresh) => "rowInRefresh",
            Strategy::Row(Retrieval::Out) => "rowOut",
            Strategy::Rows(Retrieval::Plain) => "rows",
            Strategy::Rows(Retrieval::Refresh) => "rowsRefresh",
            Strategy::Rows(Retrieval::In) => "rowsIn",
            Strategy::Rows(Retrieval::InRefresh) => "rowsInRefresh",
            Strategy::Rows(Retrieval::Out) => "rowsOut",
            Strategy::Column => "column",
            Strategy::Columns => "columns",
            Strategy::ColumnsGroup => "columnsGroup",
            Strategy::ColumnCount => "columnCount",
            Strategy::ColumnMeta => "columnMeta",
            Strategy::RowCount => "rowCount",
            Strategy::InsertId => "insertId",
            Strategy::Assoc => "assoc",
            Strategy::Assocs => "assocs",
            Strategy::AssocsUnique => "assocsUnique",
            Strategy::AssocsKey => "assocsKey",
            Strategy::Num => "num",
            Strategy::Nums => "nums",
            Strategy::NumsKey => "numsKey",
            Strategy::KeyPair => "keyPair",
            Strategy::KeyPairs => "keyPairs",
            Strategy::Segment => "segment",
            Strategy::Segments => "segments",
            Strategy::Statement => "statement",
            Strategy::Info => "info",
            Strategy::Debug => "debug",
        }
    }

    pub fn is_row_output(self) -> bool {
        matches!(self, Strategy::Row(_) | Strategy::Rows(_))
    }

    /// Whether `kind` may be paired with this strategy.
    pub fn accepts(self, kind: QueryKind) -> bool {
        match self {
            Strategy::Statement | Strategy::Info | Strategy::Debug => true,
            Strategy::InsertId => kind == QueryKind::Insert,
            Strategy::RowCount => kind.is_read() || kind.is_mutating(),
            Strategy::Row(_) | Strategy::Rows(_) => kind == QueryKind::Select,
            _ => kind.is_read(),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Strategy {
    type Err = RelmapError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(Strategy::Info);
        }
        if let Some(rest) = s.strip_prefix("rows") {
            if let Some(retrieval) = Retrieval::from_suffix(rest) {
                return Ok(Strategy::Rows(retrieval));
            }
        }
        if let Some(rest) = s.strip_prefix("row") {
            if let Some(retrieval) = Retrieval::from_suffix(rest) {
                return Ok(Strategy::Row(retrieval));
            }
        }
        Self::FIXED
            .into_iter()
            .find(|strategy| strategy.token() == s)
            .ok_or_else(|| RelmapError::Validation(format!("unknown output '{s}'")))
    }
}

/// Strategy used when the caller asks for the kind's default.
pub fn default_strategy(kind: QueryKind) -> Strategy {
    match kind {
        QueryKind::Select | QueryKind::Show => Strategy::Assocs,
        QueryKind::Insert => Strategy::InsertId,
        QueryKind::Update | QueryKind::Delete => Strategy::RowCount,
        QueryKind::Create | QueryKind::Alter | QueryKind::Truncate | QueryKind::Drop => {
            Strategy::Statement
        }
    }
}

/// Column addressed by position or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(name: String) -> Self {
        ColumnRef::Name(name)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "#{i}"),
            ColumnRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum OutputArg {
    Columns(Vec<ColumnRef>),
    /// `[column]` placeholders replaced per row.
    Template(String),
}

/// The caller's request for how to shape a result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum OutputSpec {
    /// The kind's default strategy.
    #[default]
    Default,
    Strategy(Strategy),
    Structured {
        strategy: Option<Strategy>,
        arg: Option<OutputArg>,
        key: Option<ColumnRef>,
        select_limit: Option<u64>,
        before_after: Option<Box<OutputSpec>>,
    },
}

impl OutputSpec {
    pub fn token(token: &str) -> Result<Self> {
        token.parse::<Strategy>().map(OutputSpec::Strategy)
    }

    pub fn structured(strategy: Strategy) -> Self {
        OutputSpec::Structured {
            strategy: Some(strategy),
            arg: None,
            key: None,
            select_limit: None,
            before_after: None,
        }
    }

    /// Default result for the write itself, with the snapshot read shaped by
    /// `snapshot` before and after it.
    pub fn before_after(snapshot: OutputSpec) -> Self {
        OutputSpec::Structured {
            strategy: None,
            arg: None,
            key: None,
            select_limit: None,
            before_after: Some(Box::new(snapshot)),
        }
    }

    pub fn with_columns<I, C>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ColumnRef>,
    {
        let refs = columns.into_iter().map(Into::into).collect();
        self.with_arg(OutputArg::Columns(refs))
    }

    pub fn with_template(self, template: impl Into<String>) -> Self {
        self.with_arg(OutputArg::Template(template.into()))
    }

    pub fn with_key(self, key: impl Into<ColumnRef>) -> Self {
        let key = key.into();
        self.map_structured(|s| {
            if let OutputSpec::Structured { key: k, .. } = s {
                *k = Some(key);
            }
        })
    }

    pub fn with_select_limit(self, limit: u64) -> Self {
        self.map_structured(|s| {
            if let OutputSpec::Structured { select_limit, .. } = s {
                *select_limit = Some(limit);
            }
        })
    }

    fn with_arg(self, arg: OutputArg) -> Self {
        self.map_structured(|s| {
            if let OutputSpec::Structured { arg: a, .. } = s {
                *a = Some(arg);
            }
        })
    }

    fn map_structured(self, apply: impl FnOnce(&mut OutputSpec)) -> Self {
        let mut spec = match self {
            OutputSpec::Default => OutputSpec::Structured {
                strategy: None,
                arg: None,
                key: None,
                select_limit: None,
                before_after: None,
            },
            OutputSpec::Strategy(strategy) => OutputSpec::structured(strategy),
            structured => structured,
        };
        apply(&mut spec);
        spec
    }

    /// The explicitly named strategy, `None` for the kind default.
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            OutputSpec::Default => None,
            OutputSpec::Strategy(strategy) => Some(*strategy),
            OutputSpec::Structured { strategy, .. } => *strategy,
        }
    }

    pub fn strategy_for(&self, kind: QueryKind) -> Strategy {
        self.strategy().unwrap_or_else(|| default_strategy(kind))
    }

    /// Same spec with any row strategy forced to re-read the backend.
    pub fn refreshing(self) -> Self {
        let refresh = |strategy: Strategy| match strategy {
            Strategy::Row(_) => Strategy::Row(Retrieval::Refresh),
            Strategy::Rows(_) => Strategy::Rows(Retrieval::Refresh),
            other => other,
        };
        match self {
            OutputSpec::Strategy(strategy) => OutputSpec::Strategy(refresh(strategy)),
            OutputSpec::Structured {
                strategy,
                arg,
                key,
                select_limit,
                before_after,
            } => OutputSpec::Structured {
                strategy: strategy.map(refresh),
                arg,
                key,
                select_limit,
                before_after,
            },
            OutputSpec::Default => OutputSpec::Default,
        }
    }

    pub fn before_after_spec(&self) -> Option<&OutputSpec> {
        match self {
            OutputSpec::Structured { before_after, .. } => before_after.as_deref(),
            _ => None,
        }
    }
}

impl From<Strategy> for OutputSpec {
    fn from(strategy: Strategy) -> Self {
        OutputSpec::Strategy(strategy)
    }
}

impl FromStr for OutputSpec {
    type Err = RelmapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "true" | "default" => Ok(OutputSpec::Default),
            token => OutputSpec::token(token),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    Single,
    Multiple,
    Scalar,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    Assoc,
    Num,
    /// First column becomes the key of the remaining columns.
    Unique,
    KeyPair,
    Segment,
    Column,
    ColumnGroup,
    Handle(Retrieval),
    None,
}

/// Concrete extraction resolved from a kind and an output specifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FetchPlan {
    pub strategy: Strategy,
    pub extraction: Extraction,
    pub fetch_mode: FetchMode,
    pub args: Vec<ColumnRef>,
    pub template: Option<String>,
    pub select_only: bool,
    pub select_limit: Option<u64>,
    pub key_remap: Option<ColumnRef>,
}

impl FetchPlan {
    fn base(strategy: Strategy) -> Self {
        let (extraction, fetch_mode, single) = match strategy {
            Strategy::Row(r) => (Extraction::Single, FetchMode::Handle(r), true),
            Strategy::Rows(r) => (Extraction::Multiple, FetchMode::Handle(r), false),
            Strategy::Assoc => (Extraction::Single, FetchMode::Assoc, true),
            Strategy::Assocs | Strategy::AssocsKey => {
                (Extraction::Multiple, FetchMode::Assoc, false)
            }
            Strategy::AssocsUnique => (Extraction::Multiple, FetchMode::Unique, false),
            Strategy::Num => (Extraction::Single, FetchMode::Num, true),
            Strategy::Nums | Strategy::NumsKey => (Extraction::Multiple, FetchMode::Num, false),
            Strategy::KeyPair => (Extraction::Single, FetchMode::KeyPair, true),
            Strategy::KeyPairs => (Extraction::Multiple, FetchMode::KeyPair, false),
            Strategy::Segment => (Extraction::Single, FetchMode::Segment, true),
            Strategy::Segments => (Extraction::Multiple, FetchMode::Segment, false),
            Strategy::Column => (Extraction::Scalar, FetchMode::Column, true),
            Strategy::Columns => (Extraction::Multiple, FetchMode::Column, false),
            Strategy::ColumnsGroup => (Extraction::Multiple, FetchMode::ColumnGroup, false),
            Strategy::ColumnCount => (Extraction::Metadata, FetchMode::None, true),
            Strategy::ColumnMeta
            | Strategy::RowCount
            | Strategy::InsertId
            | Strategy::Statement
            | Strategy::Info
            | Strategy::Debug => (Extraction::Metadata, FetchMode::None, false),
        };
        let args = match strategy {
            Strategy::Column | Strategy::Columns => vec![ColumnRef::Index(0)],
            Strategy::ColumnsGroup | Strategy::KeyPair | Strategy::KeyPairs => {
                vec![ColumnRef::Index(0), ColumnRef::Index(1)]
            }
            _ => Vec::new(),
        };
        let key_remap = match strategy {
            Strategy::AssocsKey | Strategy::NumsKey => Some(ColumnRef::Index(0)),
            _ => None,
        };
        Self {
            strategy,
            extraction,
            fetch_mode,
            args,
            template: None,
            select_only: strategy.is_row_output(),
            select_limit: single.then_some(1),
            key_remap,
        }
    }
}

pub fn is_output_compatible(kind: QueryKind, spec: &OutputSpec) -> bool {
    spec.strategy_for(kind).accepts(kind)
}

/// Resolves `(kind, spec)` to a [`FetchPlan`]. Pure and deterministic.
///
/// A `before_after` marker is not part of the plan; the executor handles it.
pub fn resolve(kind: QueryKind, spec: &OutputSpec) -> Result<FetchPlan> {
    let strategy = spec.strategy_for(kind);
    if !strategy.accepts(kind) {
        return Err(RelmapError::OutputTypeMismatch {
            kind,
            output: strategy.token().to_string(),
        });
    }
    let mut plan = FetchPlan::base(strategy);

    if let OutputSpec::Structured {
        arg,
        key,
        select_limit,
        ..
    } = spec
    {
        match arg {
            Some(OutputArg::Columns(refs)) if !refs.is_empty() => {
                let expected = match strategy {
                    Strategy::Column | Strategy::Columns => Some(1),
                    Strategy::ColumnsGroup | Strategy::KeyPair | Strategy::KeyPairs => Some(2),
                    _ => None,
                };
                if let Some(expected) = expected {
                    if refs.len() != expected {
                        return Err(RelmapError::Validation(format!(
                            "output '{strategy}' takes {expected} column argument(s), got {}",
                            refs.len()
                        )));
                    }
                    plan.args = refs.clone();
                }
            }
            Some(OutputArg::Template(template)) => {
                if matches!(strategy, Strategy::Segment | Strategy::Segments) {
                    plan.template = Some(template.clone());
                }
            }
            _ => {}
        }
        if let Some(key) = key {
            if plan.extraction == Extraction::Multiple
                && matches!(plan.fetch_mode, FetchMode::Assoc | FetchMode::Num)
            {
                plan.key_remap = Some(key.clone());
            }
        }
        if let Some(limit) = select_limit {
            plan.select_limit = Some(*limit);
        }
    }

    if plan.fetch_mode == FetchMode::Segment && plan.template.as_deref().is_none_or(str::is_empty)
    {
        return Err(RelmapError::Validation(format!(
            "output '{strategy}' requires a template"
        )));
    }
    Ok(plan)
}
