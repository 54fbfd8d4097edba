//! Error types for the search engine.
//!
//! Errors are split by the stage that raises them: parsing the rule text,
//! building and evaluating the expression tree, and talking to the backing
//! database. [`SearchError`] wraps all of them for the public service API.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::value::SearchValueKind;

/// The top-level error type returned by the search service.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The rule text is not grammatically valid.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The rule is grammatically valid but semantically wrong.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// The database failed outside of running a compiled expression.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The database rejected a compiled expression.
    #[error("invalid search expression: {message}")]
    InvalidSearchExpression { message: String },

    /// The requested enrollee does not exist.
    #[error("enrollee not found: {enrollee_id}")]
    EnrolleeNotFound { enrollee_id: String },
}

impl SearchError {
    /// Rewrites a backend failure raised while running a compiled expression.
    ///
    /// The database engine's own detail message is preferred over the
    /// driver's generic message. Connection-level failures are passed through
    /// unchanged since they say nothing about the expression.
    pub fn from_execution(err: BackendError) -> Self {
        match err {
            BackendError::Query { message, detail } => SearchError::InvalidSearchExpression {
                message: detail.unwrap_or(message),
            },
            BackendError::Timeout { timeout_ms } => SearchError::InvalidSearchExpression {
                message: format!("query cancelled after {}ms", timeout_ms),
            },
            other => SearchError::Backend(other),
        }
    }
}

/// A lexical or grammatical error in rule text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    /// Description of what went wrong.
    pub message: String,
    /// Byte offset of the offending token in the rule text.
    pub position: usize,
}

impl ParseError {
    /// Creates a new parse error at the given byte offset.
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Errors raised while building or evaluating an expression tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    /// No registered resolver knows the variable.
    #[error("variable does not exist: {variable}")]
    UnknownVariable { variable: String },

    /// The function name is not one of the built-in functions.
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },

    /// A function was called with the wrong number of arguments.
    #[error("function {function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Two values cannot be compared or combined.
    #[error("cannot compare {left} with {right}")]
    IncompatibleKinds {
        left: SearchValueKind,
        right: SearchValueKind,
    },

    /// The operator is not defined for the operand kind.
    #[error("operator {operator} is not supported for {kind} values")]
    UnsupportedOperator {
        operator: String,
        kind: SearchValueKind,
    },

    /// Operator text does not name a known operator, or is used illegally.
    #[error("invalid operator: {operator}")]
    InvalidOperator { operator: String },

    /// `contains` was applied to non-string operands.
    #[error("contains requires string operands, got {left} and {right}")]
    ContainsOnNonString {
        left: SearchValueKind,
        right: SearchValueKind,
    },

    /// An `include` operand depends on participant data.
    #[error("include requires a constant operand")]
    NonConstantInclude,

    /// A value could not be converted to the requested kind.
    #[error("cannot convert '{value}' to {target}")]
    ValueConversion {
        value: String,
        target: SearchValueKind,
    },
}

/// Errors raised by a database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// The database rejected or failed a statement.
    #[error("query execution failed: {message}")]
    Query {
        message: String,
        /// The database engine's own message, when the driver exposes it.
        detail: Option<String>,
    },

    /// The statement ran longer than allowed and was cancelled.
    #[error("query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A column value could not be decoded.
    #[error("failed to decode column {column}: {message}")]
    Decode { column: usize, message: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for service operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for expression building and evaluation.
pub type ExpressionResult<T> = Result<T, ExpressionError>;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref code, ref detail) => BackendError::Query {
                message: code.to_string(),
                detail: detail.clone(),
            },
            other => BackendError::Query {
                message: other.to_string(),
                detail: None,
            },
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for BackendError {
    fn from(_err: r2d2::Error) -> Self {
        BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        let detail = err.as_db_error().map(|db| db.message().to_string());
        BackendError::Query {
            message: err.to_string(),
            detail,
        }
    }
}
