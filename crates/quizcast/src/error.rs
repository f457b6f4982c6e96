//! Error types for the Quizcast binary.
//!
//! [`AppError`] is the top-level error type that wraps every failure
//! mode during startup and serving.

/// Top-level error for the Quizcast binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: quizcast_core::ConfigError,
    },

    /// The database could not be reached or migrated.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: quizcast_db::DbError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: quizcast_server::ServerError,
    },
}
