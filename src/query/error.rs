//! Query error types
//!
//! Defines all error conditions that can occur while planning and running a
//! pattern query against the index.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Only conjunctive patterns (sequence or conjunction) are filtered
    #[error("Disjunctive patterns are not supported")]
    DisjunctionUnsupported,

    /// Predicate mark other than has-min, has-max or has-both
    #[error("Invalid predicate kind: {0}")]
    InvalidPredicateKind(u8),

    /// Constraint with no usable bound, or an empty range
    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    /// Constraint refers to a variable the pattern does not declare
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// Constraint refers to an attribute that is not indexed
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Interval inserted out of order or with end before start
    #[error("Illegal interval [{start}, {end}]: {reason}")]
    IllegalInterval {
        start: i64,
        end: i64,
        reason: &'static str,
    },

    /// Overlap mask does not line up with the type's clusters
    #[error("Mask length {actual} does not match {expected} clusters")]
    MaskMismatch { expected: usize, actual: usize },

    /// Storage layer error
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
