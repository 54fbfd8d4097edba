//! PostgreSQL backend.
//!
//! Connections come from a `deadpool-postgres` pool. Every session runs with
//! `TimeZone=UTC` and a server-side `statement_timeout`; a per-query timeout
//! additionally cancels the running statement through the client's cancel
//! token.
//!
//! Identifier columns use the `"C"` collation so that tie-breaking on ids
//! orders bytes the same way in-memory evaluation does.

mod backend;
pub(crate) mod schema;

pub use backend::{PostgresBackend, PostgresConfig, PostgresSslMode};
pub use schema::SCHEMA_VERSION;
