//! Error types for graph construction, query building and compilation.

use crate::sql::Dialect;
use crate::sql::Parameter;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Broad category of a [`QueryError`], for callers that only need to
/// decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A member path does not exist in the table graph.
    PathResolution,
    /// The registered model is inconsistent; raised when the catalog is built.
    Configuration,
    /// The query cannot be expressed; raised while finalizing or rendering.
    Compilation,
    /// Raised by the execution layer, carrying the statement that failed.
    Execution,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("path '{path}' not found on entity '{entity}'")]
    PathNotFound { entity: String, path: String },

    #[error("path '{path}' on entity '{entity}' does not end at a column")]
    NotAColumn { entity: String, path: String },

    #[error("path '{path}' on entity '{entity}' does not end at a relationship")]
    NotARelationship { entity: String, path: String },

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("invalid model definition: {0}")]
    InvalidModel(String),

    #[error("entity '{0}' is registered more than once")]
    DuplicateEntity(String),

    #[error("entity '{entity}' has no member '{member}'")]
    UnknownMember { entity: String, member: String },

    #[error("entity '{entity}' needs a primary key: {context}")]
    MissingPrimaryKey { entity: String, context: String },

    #[error("relationship '{entity}.{relationship}' cannot resolve foreign key column '{column}'")]
    UnresolvableForeignKey {
        entity: String,
        relationship: String,
        column: String,
    },

    #[error("relationship '{entity}.{relationship}' has no join {index} (it has {joins})")]
    InvalidJoinIndex {
        entity: String,
        relationship: String,
        index: usize,
        joins: usize,
    },

    #[error("relationship '{entity}.{relationship}' is invalid: {reason}")]
    InvalidRelationship {
        entity: String,
        relationship: String,
        reason: String,
    },

    #[error("operator {operator} on '{path}' cannot be inverted")]
    OperatorNotInvertible { operator: String, path: String },

    #[error("operator {operator} is not supported for {context}")]
    UnsupportedOperator { operator: String, context: String },

    #[error("quantifier {quantifier} on '{path}' requires a one-to-many relationship")]
    QuantifierOutsideMany { quantifier: String, path: String },

    #[error("columns '{left}' and '{right}' lie on different one-to-many branches")]
    CrossBranchComparison { left: String, right: String },

    #[error("{feature} is not supported by {dialect}")]
    NotSupported { dialect: Dialect, feature: String },

    #[error("paging requires an order column but entity '{0}' declares no columns")]
    PagingWithoutOrder(String),

    #[error("invalid paging: {0}")]
    InvalidPaging(String),

    #[error("invalid operand for '{path}': {reason}")]
    InvalidOperand { path: String, reason: String },

    #[error("output key '{key}' collides with '{other}' in the shaped result")]
    ConflictingOutputKey { key: String, other: String },

    #[error("execution failed: {message}\nSQL: {sql}")]
    Execution {
        sql: String,
        params: Vec<Parameter>,
        message: String,
    },
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::PathNotFound { .. }
            | QueryError::NotAColumn { .. }
            | QueryError::NotARelationship { .. } => ErrorKind::PathResolution,

            QueryError::UnknownEntity(_)
            | QueryError::InvalidModel(_)
            | QueryError::DuplicateEntity(_)
            | QueryError::UnknownMember { .. }
            | QueryError::MissingPrimaryKey { .. }
            | QueryError::UnresolvableForeignKey { .. }
            | QueryError::InvalidJoinIndex { .. }
            | QueryError::InvalidRelationship { .. } => ErrorKind::Configuration,

            QueryError::OperatorNotInvertible { .. }
            | QueryError::UnsupportedOperator { .. }
            | QueryError::QuantifierOutsideMany { .. }
            | QueryError::CrossBranchComparison { .. }
            | QueryError::NotSupported { .. }
            | QueryError::PagingWithoutOrder(_)
            | QueryError::InvalidPaging(_)
            | QueryError::InvalidOperand { .. }
            | QueryError::ConflictingOutputKey { .. } => ErrorKind::Compilation,

            QueryError::Execution { .. } => ErrorKind::Execution,
        }
    }

    /// Wrap a failure reported by the execution layer with the statement
    /// that produced it.
    pub fn execution(statement: &crate::sql::Statement, message: impl Into<String>) -> Self {
        QueryError::Execution {
            sql: statement.sql.clone(),
            params: statement.params.clone(),
            message: message.into(),
        }
    }
}
