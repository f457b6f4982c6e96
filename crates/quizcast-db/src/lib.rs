//! Data layer for the Quizcast live-polling engine.
//!
//! `PostgreSQL` is the single source of truth for quizzes, participants,
//! sessions and answers. Nothing derived from it (tallies, rankings) is
//! cached; every read goes back to the tables.
//!
//! # Architecture
//!
//! ```text
//! SubmissionCoordinator / SessionControl / handlers
//!     |
//!     +-- Store (query timeout on every call)
//!         |-- PgStore      (PostgresPool, ON CONFLICT upsert)
//!         +-- MemoryStore  (tests and database-less demos)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`store`] -- The backend-independent [`Store`] facade
//! - [`pg_store`] -- `PostgreSQL` queries
//! - [`memory`] -- In-memory backend with identical semantics
//! - [`error`] -- Shared error types

pub mod error;
pub mod memory;
pub mod pg_store;
pub mod postgres;
pub mod store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use memory::MemoryStore;
pub use pg_store::PgStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{DEFAULT_QUERY_TIMEOUT, QuizPosition, Store, UpsertOutcome};
