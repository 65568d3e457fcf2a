/// Unified error type for the query engine
/// Provides structured error handling with one category per failure mode of a query
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Schema errors: unknown or ambiguous column, declared/actual column mismatch
    #[error("Schema error: {message}")]
    Schema {
        message: String,
        context: Option<String>,
    },

    /// Format errors: malformed record in a source file
    #[error("Format error: {message}{}", location(.path, .line))]
    Format {
        message: String,
        path: Option<String>,
        line: Option<u64>,
    },

    /// Type errors: expression applied to incompatible operand types
    #[error("Type mismatch: {message}")]
    TypeMismatch {
        message: String,
        context: Option<String>,
    },

    /// A blocking operator's buffered state exceeded the query memory budget
    #[error("Resource exhausted in {operator}: requested {requested} bytes with {used} of {budget} bytes in use")]
    ResourceExhausted {
        operator: String,
        requested: usize,
        used: usize,
        budget: usize,
    },

    /// Query cancelled by its token or by a timeout
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// IO errors: file open/read/write, glob expansion
    #[error("IO error: {message}{}", location(.path, &None))]
    Io {
        message: String,
        path: Option<String>,
    },

    /// Planning errors: invalid plan shape or parameters
    #[error("Planning error: {message}")]
    Planning {
        message: String,
        context: Option<String>,
    },

    /// Execution errors: arithmetic overflow, invalid state while running
    #[error("Execution error: {message}")]
    Execution {
        message: String,
        operator: Option<String>,
    },

    /// Internal errors: should never happen, indicates bug
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn location(path: &Option<String>, line: &Option<u64>) -> String {
    match (path, line) {
        (Some(p), Some(l)) => format!(" ({}:{})", p, l),
        (Some(p), None) => format!(" ({})", p),
        (None, Some(l)) => format!(" (line {})", l),
        (None, None) => String::new(),
    }
}

impl EngineError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            context: None,
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
            path: None,
            line: None,
        }
    }

    pub fn format_at(message: impl Into<String>, path: impl Into<String>, line: u64) -> Self {
        Self::Format {
            message: message.into(),
            path: Some(path.into()),
            line: Some(line),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
            context: None,
        }
    }

    pub fn resource_exhausted(
        operator: impl Into<String>,
        requested: usize,
        used: usize,
        budget: usize,
    ) -> Self {
        Self::ResourceExhausted {
            operator: operator.into(),
            requested,
            used,
            budget,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            path: None,
        }
    }

    pub fn io_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning {
            message: message.into(),
            context: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            operator: None,
        }
    }

    pub fn execution_with_operator(message: impl Into<String>, operator: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            operator: Some(operator.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Attach the source path to a format or IO error that lacks one
    pub fn with_path(mut self, source_path: impl Into<String>) -> Self {
        match &mut self {
            Self::Format { path, .. } | Self::Io { path, .. } if path.is_none() => {
                *path = Some(source_path.into());
            }
            _ => {}
        }
        self
    }

    /// Add context to an error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Schema { context: ctx, .. } => *ctx = Some(context.into()),
            Self::TypeMismatch { context: ctx, .. } => *ctx = Some(context.into()),
            Self::Planning { context: ctx, .. } => *ctx = Some(context.into()),
            _ => {}
        }
        self
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<arrow::error::ArrowError> for EngineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Format {
            message: err.to_string(),
            path: None,
            line: None,
        }
    }
}

impl From<parquet::errors::ParquetError> for EngineError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::Format {
            message: err.to_string(),
            path: None,
            line: None,
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line());
        if err.is_io_error() {
            return Self::Io {
                message: err.to_string(),
                path: None,
            };
        }
        Self::Format {
            message: err.to_string(),
            path: None,
            line,
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            return Self::Io {
                message: err.to_string(),
                path: None,
            };
        }
        Self::Format {
            message: err.to_string(),
            path: None,
            line: Some(err.line() as u64),
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_display_includes_location() {
        let err = EngineError::format_at("expected 3 fields, found 2", "data/a.csv", 7);
        assert_eq!(
            err.to_string(),
            "Format error: expected 3 fields, found 2 (data/a.csv:7)"
        );
    }

    #[test]
    fn test_with_path_only_fills_missing_path() {
        let err = EngineError::format("bad row").with_path("x.json");
        match err {
            EngineError::Format { path, .. } => assert_eq!(path.as_deref(), Some("x.json")),
            other => panic!("unexpected error {other:?}"),
        }

        let err = EngineError::io_with_path("missing", "a.csv").with_path("b.csv");
        match err {
            EngineError::Io { path, .. } => assert_eq!(path.as_deref(), Some("a.csv")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_resource_exhausted_message() {
        let err = EngineError::resource_exhausted("HashJoin(build)", 100, 950, 1000);
        assert!(err.to_string().contains("HashJoin(build)"));
        assert!(err.to_string().contains("1000"));
    }
}
