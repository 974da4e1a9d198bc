//! Repository and session error taxonomy.
//!
//! # Invariants
//! - SQLite constraint failures always surface as `ConstraintViolation`.
//! - Every other engine fault surfaces as `Db` and is never retried here.

use crate::db::DbError;
use crate::model::entity::EntityId;
use rusqlite::ErrorCode;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Which side of a parameter binding was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingFault {
    /// A supplied parameter has no matching placeholder.
    Unknown,
    /// A placeholder received no value.
    Unbound,
}

impl Display for BindingFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("has no matching placeholder"),
            Self::Unbound => f.write_str("was not bound"),
        }
    }
}

/// Error surfaced by repository and session operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Lower-layer connectivity or IO fault.
    #[error("{0}")]
    Db(#[from] DbError),
    /// Uniqueness or referential-integrity rule broken by a write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[source] rusqlite::Error),
    #[error("{entity} not found: {id}")]
    EntityNotFound { entity: &'static str, id: EntityId },
    #[error("named query not found: `{0}`")]
    QueryNotFound(String),
    #[error("named query `{0}` is already registered with different text")]
    DuplicateNamedQuery(String),
    #[error("parameter `{parameter}` of query `{query}` {fault}")]
    ParameterBinding {
        query: String,
        parameter: String,
        fault: BindingFault,
    },
    #[error("query `{query}` did not yield a single numeric value: {reason}")]
    ScalarResult { query: String, reason: String },
    #[error("field path `{path}` has {segments} segments; at most {max} are supported")]
    PathDepthExceeded {
        path: String,
        segments: usize,
        max: usize,
    },
    #[error("invalid field path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("unknown field `{field}` on {entity}")]
    UnknownField { entity: &'static str, field: String },
    #[error("unknown relation `{relation}` on {entity}")]
    UnknownRelation {
        entity: &'static str,
        relation: String,
    },
    #[error("invalid sort order `{0}`; expected asc|desc")]
    InvalidSortOrder(String),
    #[error("{entity} instance has no identity")]
    MissingIdentity { entity: &'static str },
    #[error("schema `{actual}` is not column-compatible with `{expected}`")]
    IncompatibleSchema {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("missing required table `{0}`")]
    MissingRequiredTable(&'static str),
    #[error("missing required column `{table}.{column}`")]
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("invalid transaction state: {0}")]
    TransactionState(&'static str),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(value),
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}
