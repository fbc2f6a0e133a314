//! Error types for query execution
//!
//! Builder operations never fail; every failure surfaces at a terminal
//! operation or during iteration. Construction and transferability errors
//! have no runtime representation: the constructor requires `IntoIterator`
//! and every user-supplied function must be `Send + Sync + 'static`, so the
//! compiler rejects both before the program runs.

use thiserror::Error;

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors surfaced by terminal query operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// No element satisfied the request (`first`/`last` without a match,
    /// or an ordering/mean reduction over an empty output sequence).
    #[error("no such element was found")]
    NoSuchElement,

    /// A user-supplied function panicked inside a worker. The pipeline is
    /// torn down and the first failure is reported here.
    #[error("worker panicked while executing a chunk: {0}")]
    WorkerPanic(String),

    /// The result channel closed while chunks were still outstanding.
    #[error("result channel disconnected before all work completed")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            QueryError::NoSuchElement.to_string(),
            "no such element was found"
        );
        let err = QueryError::WorkerPanic("boom".to_string());
        assert!(err.to_string().contains("boom"));
    }
}
