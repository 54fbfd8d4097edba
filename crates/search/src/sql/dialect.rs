//! Per-database SQL differences.

use std::fmt;

use crate::value::SearchValueKind;

use super::fragment::{SqlFragment, SqlParam};

/// Escapes LIKE wildcards in a pattern expression, using `\` as escape char.
const LIKE_ESCAPE_PREFIX: &str = r"REPLACE(REPLACE(REPLACE(";
const LIKE_ESCAPE_SUFFIX: &str = r", '\', '\\'), '%', '\%'), '_', '\_')";

/// SQLite renders instants with this format; stored instants use it too, so
/// text comparison is chronological.
pub const SQLITE_INSTANT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Unicode lowercasing. SQLite's built-in `LOWER` folds ASCII only, so the
/// SQLite backend registers this on every connection.
pub const LOWER_FUNCTION: &str = "search_lower";

/// Lenient string-to-date conversion: NULL when the text does not parse.
/// Registered by the SQLite backend, created by the PostgreSQL schema.
pub const DATE_FUNCTION: &str = "search_date";

/// Lenient string-to-instant conversion: NULL when the text does not parse.
pub const INSTANT_FUNCTION: &str = "search_instant";

/// The SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Sqlite => write!(f, "sqlite"),
            SqlDialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl SqlDialect {
    /// The placeholder for the parameter at 1-based `index`.
    ///
    /// PostgreSQL placeholders carry an explicit cast so the server never has
    /// to infer a parameter type from context.
    pub fn placeholder(&self, index: usize, param: &SqlParam) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{}", index),
            SqlDialect::Postgres => {
                let pg_type = match param {
                    SqlParam::Text(_) | SqlParam::Null => "text",
                    SqlParam::Integer(_) => "int8",
                    SqlParam::Float(_) => "float8",
                    SqlParam::Bool(_) => "bool",
                    SqlParam::Date(_) => "date",
                    SqlParam::Timestamp(_) => "timestamp",
                };
                format!("${}::{}", index, pg_type)
            }
        }
    }

    /// Converts a string expression to a temporal kind, the SQL counterpart
    /// of parsing a string value. Text that does not parse becomes NULL.
    /// Other kinds are returned unchanged.
    pub fn coerce(&self, target: SearchValueKind, expr: SqlFragment) -> SqlFragment {
        let function = match target {
            SearchValueKind::Date => DATE_FUNCTION,
            SearchValueKind::Instant => INSTANT_FUNCTION,
            _ => return expr,
        };
        SqlFragment::wrap(&format!("{}(", function), expr, ")")
    }

    /// Lowercases a text expression the way string values are lowercased.
    pub fn lower(&self, expr: SqlFragment) -> SqlFragment {
        match self {
            SqlDialect::Sqlite => SqlFragment::wrap(&format!("{}(", LOWER_FUNCTION), expr, ")"),
            SqlDialect::Postgres => SqlFragment::wrap("LOWER(", expr, ")"),
        }
    }

    /// The calendar date of an instant column.
    pub fn date_of(&self, instant: SqlFragment) -> SqlFragment {
        match self {
            SqlDialect::Sqlite => SqlFragment::wrap("date(", instant, ")"),
            SqlDialect::Postgres => SqlFragment::wrap("CAST(", instant, " AS DATE)"),
        }
    }

    /// Forces byte-wise ordering of a text expression.
    pub fn binary_order(&self, expr: SqlFragment) -> SqlFragment {
        match self {
            SqlDialect::Sqlite => expr,
            SqlDialect::Postgres => SqlFragment::wrap("(", expr, ") COLLATE \"C\""),
        }
    }

    /// Case-insensitive substring match, with LIKE wildcards in the needle
    /// escaped.
    pub fn contains(&self, haystack: SqlFragment, needle: SqlFragment) -> SqlFragment {
        let (operator, haystack, needle) = match self {
            SqlDialect::Sqlite => (" LIKE ", self.lower(haystack), self.lower(needle)),
            SqlDialect::Postgres => (" ILIKE ", haystack, needle),
        };
        let mut fragment = SqlFragment::wrap("(", haystack, operator);
        fragment
            .push_sql("('%' || ")
            .append(SqlFragment::wrap(LIKE_ESCAPE_PREFIX, needle, LIKE_ESCAPE_SUFFIX))
            .push_sql(r" || '%') ESCAPE '\')");
        fragment
    }

    /// Smallest or largest non-null argument, NULL when all are NULL.
    pub fn extreme(
        &self,
        kind: SearchValueKind,
        mut args: Vec<SqlFragment>,
        greatest: bool,
    ) -> SqlFragment {
        if args.len() == 1 {
            return args.remove(0);
        }
        match self {
            SqlDialect::Postgres => {
                let function = if greatest { "GREATEST(" } else { "LEAST(" };
                let args = args.into_iter().map(|arg| match kind {
                    SearchValueKind::String => self.binary_order(arg),
                    _ => arg,
                });
                SqlFragment::wrap(function, SqlFragment::join(args, ", "), ")")
            }
            SqlDialect::Sqlite => {
                // SQLite's scalar min/max return NULL if any argument is NULL,
                // so each argument falls back to the others.
                let function = if greatest { "max(" } else { "min(" };
                let coalesced = (0..args.len()).map(|i| {
                    let ordered = std::iter::once(args[i].clone())
                        .chain(args.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, a)| a.clone()));
                    SqlFragment::wrap("COALESCE(", SqlFragment::join(ordered, ", "), ")")
                });
                SqlFragment::wrap(function, SqlFragment::join(coalesced.collect::<Vec<_>>(), ", "), ")")
            }
        }
    }

    /// Whole years between a birth date column and today (UTC).
    pub fn age_in_years(&self, birth_date: &str) -> SqlFragment {
        match self {
            SqlDialect::Sqlite => SqlFragment::raw(format!(
                "(CAST(strftime('%Y', 'now') AS INTEGER) - CAST(strftime('%Y', {b}) AS INTEGER) \
                 - (strftime('%m-%d', 'now') < strftime('%m-%d', {b})))",
                b = birth_date
            )),
            SqlDialect::Postgres => SqlFragment::raw(format!(
                "CAST(EXTRACT(YEAR FROM AGE(CURRENT_DATE, {})) AS DOUBLE PRECISION)",
                birth_date
            )),
        }
    }

    /// Wraps a count so it compares as a number.
    pub fn count_as_number(&self, count: SqlFragment) -> SqlFragment {
        match self {
            SqlDialect::Sqlite => count,
            SqlDialect::Postgres => SqlFragment::wrap("CAST(", count, " AS DOUBLE PRECISION)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> SqlFragment {
        SqlFragment::param(SqlParam::Text(s.to_string()))
    }

    #[test]
    fn test_coerce_postgres_instant() {
        let query = SqlDialect::Postgres
            .coerce(SearchValueKind::Instant, text("2023-01-01"))
            .render(SqlDialect::Postgres);
        assert_eq!(query.sql, "search_instant($1::text)");
    }

    #[test]
    fn test_coerce_sqlite_date() {
        let query = SqlDialect::Sqlite
            .coerce(SearchValueKind::Date, text("2023-01-01"))
            .render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "search_date(?1)");
    }

    #[test]
    fn test_coerce_leaves_strings_alone() {
        let query = SqlDialect::Sqlite
            .coerce(SearchValueKind::String, SqlFragment::raw("x"))
            .render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "x");
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let query = SqlDialect::Postgres
            .contains(SqlFragment::raw("profile.given_name"), text("jo"))
            .render(SqlDialect::Postgres);
        assert_eq!(
            query.sql,
            r"(profile.given_name ILIKE ('%' || REPLACE(REPLACE(REPLACE($1::text, '\', '\\'), '%', '\%'), '_', '\_') || '%') ESCAPE '\')"
        );
    }

    #[test]
    fn test_sqlite_contains_folds_with_unicode_lower() {
        let query = SqlDialect::Sqlite
            .contains(SqlFragment::raw("profile.given_name"), text("Émile"))
            .render(SqlDialect::Sqlite);
        assert!(query.sql.starts_with("(search_lower(profile.given_name) LIKE"));
        assert!(query.sql.contains("REPLACE(search_lower(?1),"));
    }

    #[test]
    fn test_extreme_single_argument_passes_through() {
        let query = SqlDialect::Sqlite
            .extreme(SearchValueKind::Number, vec![SqlFragment::raw("a")], false)
            .render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "a");
    }

    #[test]
    fn test_extreme_sqlite_coalesces_arguments() {
        let query = SqlDialect::Sqlite
            .extreme(
                SearchValueKind::Number,
                vec![SqlFragment::raw("a"), SqlFragment::raw("b")],
                true,
            )
            .render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "max(COALESCE(a, b), COALESCE(b, a))");
    }

    #[test]
    fn test_extreme_postgres_strings_use_binary_collation() {
        let query = SqlDialect::Postgres
            .extreme(
                SearchValueKind::String,
                vec![SqlFragment::raw("a"), SqlFragment::raw("b")],
                false,
            )
            .render(SqlDialect::Postgres);
        assert_eq!(query.sql, "LEAST((a) COLLATE \"C\", (b) COLLATE \"C\")");
    }
}
