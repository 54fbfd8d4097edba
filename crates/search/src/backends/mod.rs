//! Database backends for the participant store.
//!
//! Each backend implements [`SqlExecutor`](crate::store::SqlExecutor) and owns
//! the DDL for the fixed participant schema. Backends are gated behind
//! feature flags.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | Embedded database, used for development and tests |
//! | PostgreSQL | `postgres` | Production RDBMS with statement cancellation |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use cohort_search::backends::sqlite::SqliteBackend;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory SQLite backend
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! // Or use a file-based database
//! let backend = SqliteBackend::open("./data/cohort.db")?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
