//! Cohort Search
//!
//! A small query language for selecting study enrollees, with two ways to run
//! it: evaluated in memory against one participant's loaded data, or compiled
//! into a single parameterized SQL statement that filters a whole study
//! environment in the database. Both agree for every rule.
//!
//! # Rules
//!
//! ```text
//! {age} > 18 and {profile.givenName} contains "Jo"
//! not ({task.demographics.status} = "COMPLETE") or {family.isProband} = true
//! lower({profile.mailingAddress.state}) = "ma" and {enrolledDate} >= "2024-01-01"
//! include "enrollee-1, enrollee-2"
//! ```
//!
//! Variables are written in braces and resolved by the [`TermRegistry`]. The
//! set of variables a study environment supports, together with their kinds,
//! is reported by [`EnrolleeSearchService::facets`].
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//! - `postgres` - PostgreSQL via `tokio-postgres`
//!
//! # Architecture
//!
//! - [`value`] - typed values and their comparison rules
//! - [`parser`] - lexer and recursive-descent parser
//! - [`term`] - variables, literals and functions, and the resolver registry
//! - [`expression`] - the typed expression tree and its builder
//! - [`sql`] - SQL fragments, clause deduplication and the final query
//! - [`store`] - participant data access over a minimal executor trait
//! - [`backends`] - SQLite and PostgreSQL executors with schema setup
//! - [`service`] - parse, facets, execute and evaluate
//! - [`export`] - filters consumed by participant exports
//!
//! # Quick Start
//!
//! ```
//! use cohort_search::context::EnrolleeSearchContext;
//! use cohort_search::expression::EnrolleeSearchExpressionParser;
//! use cohort_search::model::{Enrollee, StudyEnvironmentId};
//! use cohort_search::sql::SqlDialect;
//! use chrono::{TimeZone, Utc};
//!
//! let parser = EnrolleeSearchExpressionParser::default();
//! let rule = parser.parse_rule("{enrollee.consented} = true").unwrap();
//!
//! let context = EnrolleeSearchContext::new(Enrollee {
//!     id: "e1".to_string(),
//!     shortcode: "JOSALK".to_string(),
//!     study_environment_id: StudyEnvironmentId::new("heartdemo-sandbox"),
//!     participant_user_id: None,
//!     profile_id: None,
//!     subject: true,
//!     consented: true,
//!     created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
//! });
//! assert!(rule.evaluate(&context).unwrap());
//!
//! let query = rule.compile(
//!     &StudyEnvironmentId::new("heartdemo-sandbox"),
//!     SqlDialect::Sqlite,
//!     Some(100),
//! );
//! assert!(query.query.sql.contains("enrollee.consented"));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod expression;
pub mod model;
pub mod parser;
pub mod service;
pub mod sql;
pub mod store;
pub mod term;
pub mod value;

// Re-export commonly used types at crate root
pub use config::SearchConfig;
pub use context::EnrolleeSearchContext;
pub use error::{
    BackendError, BackendResult, ExpressionError, ExpressionResult, ParseError, SearchError,
    SearchResult,
};
pub use export::ExportFilter;
pub use expression::{EnrolleeSearchExpression, EnrolleeSearchExpressionParser, SearchOperator};
pub use model::StudyEnvironmentId;
pub use service::{EnrolleeSearchOptions, EnrolleeSearchRow, EnrolleeSearchService};
pub use store::{ParticipantStore, ParticipantWriter, SqlExecutor};
pub use term::{SearchTerm, TermRegistry, TermResolver};
pub use value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
