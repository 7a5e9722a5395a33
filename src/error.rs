use crate::query::kind::QueryKind;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotReady,
    AlreadyReady,
    PermissionDenied,
    UnsupportedDriver,
    InvalidConnectionString,
    Connection,
    OutputTypeMismatch,
    MissingTarget,
    Statement,
    KeyCollision,
    Validation,
    Decode,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotReady => "not_ready",
            ErrorCode::AlreadyReady => "already_ready",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::UnsupportedDriver => "unsupported_driver",
            ErrorCode::InvalidConnectionString => "invalid_connection_string",
            ErrorCode::Connection => "connection",
            ErrorCode::OutputTypeMismatch => "output_type_mismatch",
            ErrorCode::MissingTarget => "missing_target",
            ErrorCode::Statement => "statement",
            ErrorCode::KeyCollision => "key_collision",
            ErrorCode::Validation => "validation",
            ErrorCode::Decode => "decode",
        }
    }

    /// Only backend statement failures depend on transient conditions.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::Statement)
    }
}

#[derive(Debug, Error)]
pub enum RelmapError {
    #[error("session is not connected")]
    NotReady,
    #[error("session is already connected")]
    AlreadyReady,
    #[error("permission denied: {kind}{}", on_table(.table))]
    PermissionDenied {
        kind: QueryKind,
        table: Option<String>,
    },
    #[error("unsupported driver '{0}'")]
    UnsupportedDriver(String),
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("output '{output}' is not valid for {kind} queries")]
    OutputTypeMismatch { kind: QueryKind, output: String },
    #[error("output '{output}' has no target: {reason}")]
    MissingTarget { output: String, reason: String },
    #[error("statement failed: {message} [{query}]")]
    Statement { query: String, message: String },
    #[error("duplicate grouping key '{key}'")]
    KeyCollision { key: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RelmapError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelmapError::NotReady => ErrorCode::NotReady,
            RelmapError::AlreadyReady => ErrorCode::AlreadyReady,
            RelmapError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            RelmapError::UnsupportedDriver(_) => ErrorCode::UnsupportedDriver,
            RelmapError::InvalidConnectionString(_) => ErrorCode::InvalidConnectionString,
            RelmapError::Connection(_) => ErrorCode::Connection,
            RelmapError::OutputTypeMismatch { .. } => ErrorCode::OutputTypeMismatch,
            RelmapError::MissingTarget { .. } => ErrorCode::MissingTarget,
            RelmapError::Statement { .. } => ErrorCode::Statement,
            RelmapError::KeyCollision { .. } => ErrorCode::KeyCollision,
            RelmapError::Validation(_) => ErrorCode::Validation,
            RelmapError::Decode(_) => ErrorCode::Decode,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

fn on_table(table: &Option<String>) -> String {
    table
        .as_deref()
        .map(|t| format!(" on table '{t}'"))
        .unwrap_or_default()
}

pub type Result<T, E = RelmapError> = std::result::Result<T, E>;
