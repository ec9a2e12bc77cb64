use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The running statement was aborted by `interrupt_current`.
    Interrupted,
    /// The engine rejected the statement (syntax, missing table, I/O, ...).
    Statement,
}

/// Error reported by the embedded SQL engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: EngineErrorKind::Statement,
            message: message.into(),
        }
    }

    pub fn interrupted() -> Self {
        Self {
            kind: EngineErrorKind::Interrupted,
            message: "statement interrupted".to_string(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == EngineErrorKind::Interrupted
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                Self::interrupted()
            }
            _ => Self::statement(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlGraphError {
    #[error("handle not found: {0}")]
    NotFound(String),
    #[error("fragment cycle detected at {0}")]
    CycleDetected(String),
    #[error("{0}")]
    ArgumentMismatch(String),
    #[error("{0}")]
    Engine(EngineError),
    #[error("operation cancelled")]
    Cancelled,
    #[error("query engine is busy")]
    Busy,
}

impl SqlGraphError {
    /// Stable category used in `#ERROR!<category>: ...` status strings.
    pub fn category(&self) -> &'static str {
        match self {
            SqlGraphError::NotFound(_) => "not_found",
            SqlGraphError::CycleDetected(_) => "cycle",
            SqlGraphError::ArgumentMismatch(_) => "argument",
            SqlGraphError::Engine(_) => "engine",
            SqlGraphError::Cancelled => "cancelled",
            SqlGraphError::Busy => "busy",
        }
    }
}

impl From<EngineError> for SqlGraphError {
    fn from(err: EngineError) -> Self {
        if err.is_interrupted() {
            SqlGraphError::Cancelled
        } else {
            SqlGraphError::Engine(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, SqlGraphError>;
