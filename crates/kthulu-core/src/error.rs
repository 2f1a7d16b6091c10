use thiserror::Error;

#[derive(Error, Debug)]
pub enum KthuluError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid root: {0}")]
    InvalidRoot(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error in {file} at line {line}: {message}")]
    Parse {
        file: String,
        line: u32,
        message: String,
    },

    #[error("Circular dependency detected among: {}", modules.join(", "))]
    CircularDependency { modules: Vec<String> },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KthuluError {
    /// Per-file failures that a scan records as warnings instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, KthuluError::Parse { .. } | KthuluError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, KthuluError>;
