//! Error types for schema reconciliation, query synthesis and execution.

use std::time::Duration;

/// Errors that can occur while comparing two sources.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// No primary key was configured.
    #[error("Primary key is not set")]
    PrimaryKeyNotSet,

    /// The primary key is not a column shared by both sources.
    #[error("Primary key '{0}' is not a common column of both sources")]
    PrimaryKeyNotCommon(String),

    /// The column selection resolved to nothing.
    #[error("No columns selected for comparison")]
    EmptyColumnSelection,

    /// The two sources do not share any comparable column.
    #[error("No common columns found between '{left}' and '{right}'")]
    NoCommonColumns {
        /// Label of the first source.
        left: String,
        /// Label of the second source.
        right: String,
    },

    /// A column lookup failed.
    #[error("Column '{column}' not found in '{table}'")]
    ColumnNotFound {
        /// The requested column.
        column: String,
        /// The schema that was searched.
        table: String,
    },

    /// A schema was built with the same column name twice.
    #[error("Column '{column}' appears more than once in '{table}'")]
    DuplicateColumn {
        /// The duplicated column.
        column: String,
        /// The schema being built.
        table: String,
    },

    /// Sampling rate outside of the accepted percentage range.
    #[error("Sampling rate {0} is out of range (expected 10 to 100)")]
    InvalidSamplingRate(u8),

    /// The SQL engine rejected or failed a query.
    #[error("Query execution failed: {message}\n{sql}")]
    Execution {
        /// The SQL text that failed.
        sql: String,
        /// Engine-side error message.
        message: String,
    },

    /// A query did not finish in time.
    #[error("Query timed out after {timeout:?} (job cancelled: {job_cancelled})")]
    Timeout {
        /// The SQL text that timed out.
        sql: String,
        /// The timeout that elapsed.
        timeout: Duration,
        /// Whether the remote job is known to be cancelled.
        job_cancelled: bool,
    },

    /// A query result did not have the expected shape.
    #[error("Unexpected query result: {0}")]
    MalformedResult(String),

    /// IO error (reading schema files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiffError {
    /// Returns whether this error was detected before any remote call and
    /// requires the caller to change its configuration.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::PrimaryKeyNotSet
                | Self::PrimaryKeyNotCommon(_)
                | Self::EmptyColumnSelection
                | Self::NoCommonColumns { .. }
                | Self::ColumnNotFound { .. }
                | Self::DuplicateColumn { .. }
                | Self::InvalidSamplingRate(_)
        )
    }

    /// Returns whether re-running the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Timeout { .. })
    }

    /// Returns the SQL text attached to an execution failure.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Execution { sql, .. } | Self::Timeout { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Builds an execution error from any engine error.
    pub fn execution(sql: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Execution {
            sql: sql.into(),
            message: error.to_string(),
        }
    }
}

/// Result type for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DiffError::PrimaryKeyNotSet.is_configuration());
        assert!(!DiffError::PrimaryKeyNotSet.is_retryable());

        let err = DiffError::execution("select 1", "boom");
        assert!(!err.is_configuration());
        assert!(err.is_retryable());
        assert_eq!(err.sql(), Some("select 1"));

        let timeout = DiffError::Timeout {
            sql: "select 2".to_string(),
            timeout: Duration::from_secs(1),
            job_cancelled: true,
        };
        assert_eq!(timeout.sql(), Some("select 2"));
        assert!(timeout.to_string().contains("job cancelled: true"));
    }
}
