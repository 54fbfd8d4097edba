//! Search terms: the leaves of an expression.
//!
//! A term yields a typed value in both execution modes. In memory it reads the
//! value out of an [`EnrolleeSearchContext`]; in SQL it contributes the joins
//! and selects it needs and an expression fragment producing the same value.
//!
//! Variables (`{profile.givenName}`) are turned into terms by the resolvers
//! registered in a [`TermRegistry`]. Literals and function calls are terms too.

pub mod age;
pub mod answer;
pub mod enrollee;
pub mod family;
pub mod functions;
pub mod kit;
pub mod profile;
pub mod registry;
pub mod task;
pub mod user;

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::ExpressionResult;
use crate::sql::{JoinClause, SelectClause, SqlDialect, SqlFragment, SqlParam};
use crate::value::{SearchValue, SearchValueKind};

pub use functions::{FunctionTerm, SearchFunction};
pub use registry::{TermRegistry, TermResolver};

/// A value-producing node usable in both evaluation and SQL compilation.
pub trait SearchTerm: Send + Sync + fmt::Debug {
    /// Reads the value for one participant. `None` means missing.
    fn extract(&self, context: &EnrolleeSearchContext) -> ExpressionResult<Option<SearchValue>>;

    /// The static kind of the value. Only the `null` literal has none.
    fn kind(&self) -> Option<SearchValueKind>;

    /// Joins the SQL expression depends on.
    fn joins(&self) -> Vec<JoinClause> {
        Vec::new()
    }

    /// Columns to return alongside each matched enrollee.
    fn selects(&self) -> Vec<SelectClause> {
        Vec::new()
    }

    /// SQL expression producing the same value as [`SearchTerm::extract`].
    fn term_clause(&self, dialect: SqlDialect) -> SqlFragment;

    /// Conditions ANDed into every comparison using this term. Each must be
    /// non-NULL for every row.
    fn required_conditions(&self, _dialect: SqlDialect) -> Vec<SqlFragment> {
        Vec::new()
    }

    /// In-memory counterpart of [`SearchTerm::required_conditions`].
    fn guard(&self, _context: &EnrolleeSearchContext) -> bool {
        true
    }

    /// The value of a term that does not depend on participant data.
    fn constant_value(&self) -> Option<ExpressionResult<Option<SearchValue>>> {
        None
    }
}

impl From<&SearchValue> for SqlParam {
    fn from(value: &SearchValue) -> Self {
        match value {
            SearchValue::String(s) => SqlParam::Text(s.clone()),
            SearchValue::Number(n) => SqlParam::Float(*n),
            SearchValue::Boolean(b) => SqlParam::Bool(*b),
            SearchValue::Date(d) => SqlParam::Date(*d),
            SearchValue::Instant(i) => SqlParam::Timestamp(*i),
        }
    }
}

/// A literal from the rule text: string, number, boolean or `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralTerm {
    value: Option<SearchValue>,
}

impl LiteralTerm {
    pub fn new(value: SearchValue) -> Self {
        Self { value: Some(value) }
    }

    pub fn null() -> Self {
        Self { value: None }
    }
}

impl SearchTerm for LiteralTerm {
    fn extract(&self, _context: &EnrolleeSearchContext) -> ExpressionResult<Option<SearchValue>> {
        Ok(self.value.clone())
    }

    fn kind(&self) -> Option<SearchValueKind> {
        self.value.as_ref().map(SearchValue::kind)
    }

    fn term_clause(&self, _dialect: SqlDialect) -> SqlFragment {
        SqlFragment::param(self.value.as_ref().map_or(SqlParam::Null, SqlParam::from))
    }

    fn constant_value(&self) -> Option<ExpressionResult<Option<SearchValue>>> {
        Some(Ok(self.value.clone()))
    }
}

type Extractor = Arc<dyn Fn(&EnrolleeSearchContext) -> Option<SearchValue> + Send + Sync>;
type SqlBuilder = Arc<dyn Fn(SqlDialect) -> SqlFragment + Send + Sync>;
type GuardCheck = Arc<dyn Fn(&EnrolleeSearchContext) -> bool + Send + Sync>;

/// A guard condition in both forms.
#[derive(Clone)]
pub struct TermGuard {
    sql: SqlBuilder,
    check: GuardCheck,
}

impl TermGuard {
    pub fn new(
        sql: impl Fn(SqlDialect) -> SqlFragment + Send + Sync + 'static,
        check: impl Fn(&EnrolleeSearchContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            sql: Arc::new(sql),
            check: Arc::new(check),
        }
    }
}

/// A term backed by participant data: a table column or a computed
/// expression, with the joins it needs and an optional guard.
#[derive(Clone)]
pub struct FieldTerm {
    variable: String,
    kind: SearchValueKind,
    joins: Vec<JoinClause>,
    select: Option<SelectClause>,
    sql: SqlBuilder,
    extract: Extractor,
    guard: Option<TermGuard>,
}

impl fmt::Debug for FieldTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTerm")
            .field("variable", &self.variable)
            .field("kind", &self.kind)
            .field(
                "joins",
                &self.joins.iter().map(|j| j.alias.as_str()).collect::<Vec<_>>(),
            )
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl FieldTerm {
    /// A term reading `alias.column`, which is also returned with results.
    pub fn column(
        variable: impl Into<String>,
        kind: SearchValueKind,
        alias: &str,
        column: &str,
        extract: impl Fn(&EnrolleeSearchContext) -> Option<SearchValue> + Send + Sync + 'static,
    ) -> Self {
        let qualified = format!("{}.{}", alias, column);
        Self {
            variable: variable.into(),
            kind,
            joins: Vec::new(),
            select: Some(SelectClause::new(alias, column, kind)),
            sql: Arc::new(move |_: SqlDialect| SqlFragment::raw(qualified.clone())),
            extract: Arc::new(extract),
            guard: None,
        }
    }

    /// A term whose SQL is an arbitrary expression.
    pub fn computed(
        variable: impl Into<String>,
        kind: SearchValueKind,
        sql: impl Fn(SqlDialect) -> SqlFragment + Send + Sync + 'static,
        extract: impl Fn(&EnrolleeSearchContext) -> Option<SearchValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            variable: variable.into(),
            kind,
            joins: Vec::new(),
            select: None,
            sql: Arc::new(sql),
            extract: Arc::new(extract),
            guard: None,
        }
    }

    pub fn with_join(mut self, join: JoinClause) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_guard(mut self, guard: TermGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Erases the concrete type for storage in an expression.
    pub fn shared(self) -> Arc<dyn SearchTerm> {
        Arc::new(self)
    }
}

impl SearchTerm for FieldTerm {
    fn extract(&self, context: &EnrolleeSearchContext) -> ExpressionResult<Option<SearchValue>> {
        Ok((self.extract)(context))
    }

    fn kind(&self) -> Option<SearchValueKind> {
        Some(self.kind)
    }

    fn joins(&self) -> Vec<JoinClause> {
        self.joins.clone()
    }

    fn selects(&self) -> Vec<SelectClause> {
        self.select.iter().cloned().collect()
    }

    fn term_clause(&self, dialect: SqlDialect) -> SqlFragment {
        (self.sql)(dialect)
    }

    fn required_conditions(&self, dialect: SqlDialect) -> Vec<SqlFragment> {
        self.guard.iter().map(|g| (g.sql)(dialect)).collect()
    }

    fn guard(&self, context: &EnrolleeSearchContext) -> bool {
        self.guard.as_ref().is_none_or(|g| (g.check)(context))
    }
}

/// A join alias that is stable for the given key parts, so that two terms
/// reading the same row share one join.
pub(crate) fn hashed_alias(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    format!("{}_{:016x}", prefix, hasher.finish())
}

/// Binds a text parameter into a fragment.
pub(crate) fn text_param(value: &str) -> SqlFragment {
    SqlFragment::param(SqlParam::Text(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_alias_is_deterministic() {
        let a = hashed_alias("answer", &["medical_history", "diagnosis"]);
        let b = hashed_alias("answer", &["medical_history", "diagnosis"]);
        let c = hashed_alias("answer", &["medical_history", "diagnosisDate"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("answer_"));
    }

    #[test]
    fn test_hashed_alias_separates_parts() {
        assert_ne!(
            hashed_alias("answer", &["a_b", "c"]),
            hashed_alias("answer", &["a", "b_c"])
        );
    }

    #[test]
    fn test_null_literal_has_no_kind() {
        let null = LiteralTerm::null();
        assert_eq!(null.kind(), None);
        assert_eq!(
            null.term_clause(SqlDialect::Sqlite).render(SqlDialect::Sqlite).sql,
            "NULL"
        );
    }

    #[test]
    fn test_literal_is_constant() {
        let literal = LiteralTerm::new(SearchValue::Number(18.0));
        assert_eq!(
            literal.constant_value().unwrap().unwrap(),
            Some(SearchValue::Number(18.0))
        );
        let query = literal
            .term_clause(SqlDialect::Postgres)
            .render(SqlDialect::Postgres);
        assert_eq!(query.sql, "$1::float8");
    }
}
