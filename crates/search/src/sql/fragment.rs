//! SQL fragments with inline bound parameters.
//!
//! A fragment interleaves SQL text and parameter values. Placeholders are
//! only numbered when the final statement is rendered, so the order of bound
//! values always matches their order in the SQL text no matter how fragments
//! were nested or merged.

use chrono::{DateTime, NaiveDate, Utc};

use super::dialect::SqlDialect;

/// A parameter value for SQL queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Timestamp value, always UTC.
    Timestamp(DateTime<Utc>),
    /// SQL NULL. Rendered as a literal rather than bound.
    Null,
}

impl SqlParam {
    /// Wraps an optional text value, mapping `None` to [`SqlParam::Null`].
    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(SqlParam::Null, |v| SqlParam::Text(v.to_string()))
    }

    /// Wraps an optional timestamp, mapping `None` to [`SqlParam::Null`].
    pub fn opt_timestamp(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(SqlParam::Null, SqlParam::Timestamp)
    }

    /// Wraps an optional date, mapping `None` to [`SqlParam::Null`].
    pub fn opt_date(value: Option<NaiveDate>) -> Self {
        value.map_or(SqlParam::Null, SqlParam::Date)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SqlPart {
    Sql(String),
    Param(SqlParam),
}

/// A piece of SQL with its bound parameters in textual order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    parts: Vec<SqlPart>,
}

/// A rendered statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    /// The SQL text with dialect placeholders.
    pub sql: String,
    /// Bound values, in placeholder order.
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    /// Creates an empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fragment of plain SQL text.
    pub fn raw(sql: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.push_sql(&sql.into());
        fragment
    }

    /// Creates a fragment holding a single bound parameter.
    pub fn param(param: SqlParam) -> Self {
        let mut fragment = Self::new();
        fragment.push_param(param);
        fragment
    }

    /// Appends SQL text.
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        if let Some(SqlPart::Sql(last)) = self.parts.last_mut() {
            last.push_str(sql);
        } else {
            self.parts.push(SqlPart::Sql(sql.to_string()));
        }
        self
    }

    /// Appends a bound parameter.
    pub fn push_param(&mut self, param: SqlParam) -> &mut Self {
        self.parts.push(SqlPart::Param(param));
        self
    }

    /// Appends another fragment.
    pub fn append(&mut self, other: SqlFragment) -> &mut Self {
        for part in other.parts {
            match part {
                SqlPart::Sql(sql) => {
                    self.push_sql(&sql);
                }
                SqlPart::Param(param) => {
                    self.push_param(param);
                }
            }
        }
        self
    }

    /// Surrounds a fragment with SQL text.
    pub fn wrap(prefix: &str, inner: SqlFragment, suffix: &str) -> Self {
        let mut fragment = Self::raw(prefix);
        fragment.append(inner).push_sql(suffix);
        fragment
    }

    /// Joins fragments with a separator.
    pub fn join(fragments: impl IntoIterator<Item = SqlFragment>, separator: &str) -> Self {
        let mut joined = Self::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                joined.push_sql(separator);
            }
            joined.append(fragment);
        }
        joined
    }

    /// Combines two conditions with AND.
    pub fn and(self, other: SqlFragment) -> Self {
        Self::combine(self, "AND", other)
    }

    /// Combines two conditions with OR.
    pub fn or(self, other: SqlFragment) -> Self {
        Self::combine(self, "OR", other)
    }

    fn combine(left: SqlFragment, operator: &str, right: SqlFragment) -> Self {
        let mut fragment = Self::wrap("(", left, &format!(") {} (", operator));
        fragment.append(right).push_sql(")");
        fragment
    }

    /// Returns true if the fragment holds no SQL and no parameters.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns the bound parameters in textual order. Nulls are included.
    pub fn params(&self) -> Vec<&SqlParam> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                SqlPart::Param(p) => Some(p),
                SqlPart::Sql(_) => None,
            })
            .collect()
    }

    /// Renders the fragment as a standalone statement.
    pub fn render(&self, dialect: SqlDialect) -> SqlQuery {
        let mut query = SqlQuery {
            sql: String::new(),
            params: Vec::new(),
        };
        self.render_into(dialect, &mut query);
        query
    }

    /// Renders the fragment onto the end of a partially built statement,
    /// continuing its placeholder numbering.
    pub fn render_into(&self, dialect: SqlDialect, query: &mut SqlQuery) {
        for part in &self.parts {
            match part {
                SqlPart::Sql(sql) => query.sql.push_str(sql),
                SqlPart::Param(SqlParam::Null) => query.sql.push_str("NULL"),
                SqlPart::Param(param) => {
                    query.params.push(param.clone());
                    let placeholder = dialect.placeholder(query.params.len(), param);
                    query.sql.push_str(&placeholder);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_fragment_has_no_params() {
        let fragment = SqlFragment::raw("1 = 1");
        let query = fragment.render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "1 = 1");
        assert!(query.params.is_empty());
    }

    #[test]
    fn test_placeholders_follow_text_order() {
        let mut left = SqlFragment::raw("a = ");
        left.push_param(SqlParam::Text("x".to_string()));
        let mut right = SqlFragment::raw("b > ");
        right.push_param(SqlParam::Float(2.0));

        let query = left.or(right).render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "(a = ?1) OR (b > ?2)");
        assert_eq!(
            query.params,
            vec![SqlParam::Text("x".to_string()), SqlParam::Float(2.0)]
        );
    }

    #[test]
    fn test_postgres_placeholders_are_typed() {
        let mut fragment = SqlFragment::raw("x = ");
        fragment
            .push_param(SqlParam::Bool(true))
            .push_sql(" AND y = ")
            .push_param(SqlParam::Text("t".to_string()));
        let query = fragment.render(SqlDialect::Postgres);
        assert_eq!(query.sql, "x = $1::bool AND y = $2::text");
    }

    #[test]
    fn test_null_renders_inline() {
        let mut fragment = SqlFragment::raw("INSERT INTO t VALUES (");
        fragment
            .push_param(SqlParam::Null)
            .push_sql(", ")
            .push_param(SqlParam::Integer(3))
            .push_sql(")");
        let query = fragment.render(SqlDialect::Sqlite);
        assert_eq!(query.sql, "INSERT INTO t VALUES (NULL, ?1)");
        assert_eq!(query.params, vec![SqlParam::Integer(3)]);
    }

    #[test]
    fn test_join_with_separator() {
        let fragments = vec![
            SqlFragment::param(SqlParam::Text("a".to_string())),
            SqlFragment::param(SqlParam::Text("b".to_string())),
        ];
        let query = SqlFragment::join(fragments, ", ").render(SqlDialect::Postgres);
        assert_eq!(query.sql, "$1::text, $2::text");
    }

    #[test]
    fn test_render_into_continues_numbering() {
        let mut query = SqlFragment::param(SqlParam::Integer(1)).render(SqlDialect::Sqlite);
        SqlFragment::param(SqlParam::Integer(2)).render_into(SqlDialect::Sqlite, &mut query);
        assert_eq!(query.sql, "?1?2");
        assert_eq!(query.params.len(), 2);
    }
}
