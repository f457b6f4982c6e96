//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with additional context about which operation failed.

use std::time::Duration;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A store call did not complete within the configured query timeout.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The store operation that was cut off.
        operation: &'static str,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// A row referenced a participant or quiz that does not exist.
    #[error("foreign key violation: {0}")]
    MissingReference(String),

    /// A stored value could not be mapped onto a domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
