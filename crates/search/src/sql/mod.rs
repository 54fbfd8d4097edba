//! SQL generation: fragments with bound parameters, dialects, clause
//! deduplication and the final enrollee query.

pub mod clause;
pub mod dialect;
pub mod fragment;
pub mod query;
pub mod row;

pub use clause::{JoinClause, SelectClause, SqlSearch, WhereClause};
pub use dialect::{
    DATE_FUNCTION, INSTANT_FUNCTION, LOWER_FUNCTION, SQLITE_INSTANT_FORMAT, SqlDialect,
};
pub use fragment::{SqlFragment, SqlParam, SqlQuery};
pub use query::{ENROLLEE_COLUMNS, EnrolleeQueryBuilder, EnrolleeSearchQuery};
pub use row::{ColumnType, SqlRow};
