//! SQLite backend.
//!
//! Supports in-memory databases (used throughout the test suite) and
//! file-based databases. Statements run on tokio's blocking pool; a query
//! that outlives its timeout is stopped by a progress handler checking its
//! deadline, with the connection's interrupt handle as a backstop. Every
//! connection gets the Unicode-aware `search_lower`, `search_date` and
//! `search_instant` functions.
//!
//! Instants are stored as `YYYY-MM-DD HH:MM:SS.SSS` text in UTC and dates as
//! `YYYY-MM-DD`, so text comparison orders both chronologically. Booleans are
//! stored as `0`/`1`.

mod backend;
mod functions;
pub(crate) mod schema;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
