//! The typed expression tree.
//!
//! Every variant can be evaluated against one [`EnrolleeSearchContext`] or
//! compiled to SQL. Both paths must agree for every enrollee, which is why
//! comparisons are compiled as `(...) IS TRUE`: a missing value makes the
//! comparison false in memory and must not become SQL `NULL`, which `NOT`
//! would leave unknown instead of turning true.

pub mod builder;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::{ExpressionError, ExpressionResult};
use crate::model::StudyEnvironmentId;
use crate::sql::{
    EnrolleeQueryBuilder, EnrolleeSearchQuery, SqlDialect, SqlFragment, SqlParam, SqlSearch,
    WhereClause,
};
use crate::term::SearchTerm;
use crate::value::{SearchValue, SearchValueKind};

pub use builder::{EnrolleeSearchExpressionParser, ExpressionBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
}

impl SearchOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            SearchOperator::Equals => "=",
            SearchOperator::NotEquals => "!=",
            SearchOperator::GreaterThan => ">",
            SearchOperator::GreaterThanOrEqual => ">=",
            SearchOperator::LessThan => "<",
            SearchOperator::LessThanOrEqual => "<=",
            SearchOperator::Contains => "contains",
        }
    }

    fn is_ordering(&self) -> bool {
        matches!(
            self,
            SearchOperator::GreaterThan
                | SearchOperator::GreaterThanOrEqual
                | SearchOperator::LessThan
                | SearchOperator::LessThanOrEqual
        )
    }

    fn sql(&self) -> &'static str {
        match self {
            SearchOperator::NotEquals => "<>",
            other => other.symbol(),
        }
    }
}

impl fmt::Display for SearchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for SearchOperator {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "=" => Ok(SearchOperator::Equals),
            "!=" => Ok(SearchOperator::NotEquals),
            ">" => Ok(SearchOperator::GreaterThan),
            ">=" => Ok(SearchOperator::GreaterThanOrEqual),
            "<" => Ok(SearchOperator::LessThan),
            "<=" => Ok(SearchOperator::LessThanOrEqual),
            "contains" => Ok(SearchOperator::Contains),
            _ => Err(ExpressionError::InvalidOperator {
                operator: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// How the two operand values are brought together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComparisonMode {
    /// Both sides have the same kind.
    Direct,
    /// One side is the `null` literal; the other is tested for presence.
    Presence { value_side: Side },
    /// One side is a string parsed into the temporal kind of the other.
    Coerce { string_side: Side, target: SearchValueKind },
}

/// `term OP term`, type-checked at construction.
#[derive(Debug, Clone)]
pub struct ComparisonExpression {
    left: Arc<dyn SearchTerm>,
    operator: SearchOperator,
    right: Arc<dyn SearchTerm>,
    mode: ComparisonMode,
}

impl ComparisonExpression {
    pub fn new(
        left: Arc<dyn SearchTerm>,
        operator: SearchOperator,
        right: Arc<dyn SearchTerm>,
    ) -> ExpressionResult<Self> {
        let mode = match (left.kind(), right.kind()) {
            (None, None) => {
                return Err(ExpressionError::InvalidOperator {
                    operator: format!("null {} null", operator),
                });
            }
            (Some(_), None) | (None, Some(_)) => {
                if !matches!(operator, SearchOperator::Equals | SearchOperator::NotEquals) {
                    return Err(ExpressionError::InvalidOperator {
                        operator: format!("{} null", operator),
                    });
                }
                let value_side = if left.kind().is_some() {
                    Side::Left
                } else {
                    Side::Right
                };
                ComparisonMode::Presence { value_side }
            }
            (Some(l), Some(r)) if l == r => {
                check_operator(operator, l, r)?;
                ComparisonMode::Direct
            }
            (Some(l), Some(r)) if l.is_temporal() && r == SearchValueKind::String => {
                check_operator(operator, l, r)?;
                check_constant_parses(right.as_ref(), l)?;
                ComparisonMode::Coerce {
                    string_side: Side::Right,
                    target: l,
                }
            }
            (Some(l), Some(r)) if r.is_temporal() && l == SearchValueKind::String => {
                check_operator(operator, l, r)?;
                check_constant_parses(left.as_ref(), r)?;
                ComparisonMode::Coerce {
                    string_side: Side::Left,
                    target: r,
                }
            }
            (Some(l), Some(r)) => {
                return Err(ExpressionError::IncompatibleKinds { left: l, right: r });
            }
        };
        Ok(Self {
            left,
            operator,
            right,
            mode,
        })
    }

    pub fn operator(&self) -> SearchOperator {
        self.operator
    }

    pub fn evaluate(&self, context: &EnrolleeSearchContext) -> ExpressionResult<bool> {
        if !self.left.guard(context) || !self.right.guard(context) {
            return Ok(false);
        }
        let left = self.left.extract(context)?;
        let right = self.right.extract(context)?;

        if let ComparisonMode::Presence { value_side } = self.mode {
            let present = match value_side {
                Side::Left => left.is_some(),
                Side::Right => right.is_some(),
            };
            return Ok(match self.operator {
                SearchOperator::Equals => !present,
                _ => present,
            });
        }

        let (Some(mut left), Some(mut right)) = (left, right) else {
            return Ok(false);
        };
        if let ComparisonMode::Coerce {
            string_side,
            target,
        } = self.mode
        {
            // Stored text that does not parse compares like a missing value.
            let slot = match string_side {
                Side::Left => &mut left,
                Side::Right => &mut right,
            };
            match slot.parse_to(target) {
                Ok(parsed) => *slot = parsed,
                Err(_) => return Ok(false),
            }
        }
        apply_operator(self.operator, &left, &right)
    }

    /// The WHERE fragment for this comparison, guards included.
    pub fn to_fragment(&self, dialect: SqlDialect) -> SqlFragment {
        let mut left = self.left.term_clause(dialect);
        let mut right = self.right.term_clause(dialect);

        let comparison = match self.mode {
            ComparisonMode::Presence { value_side } => {
                let value = match value_side {
                    Side::Left => left,
                    Side::Right => right,
                };
                let test = match self.operator {
                    SearchOperator::Equals => ") IS NULL",
                    _ => ") IS NOT NULL",
                };
                SqlFragment::wrap("(", value, test)
            }
            mode => {
                if let ComparisonMode::Coerce {
                    string_side,
                    target,
                } = mode
                {
                    match string_side {
                        Side::Left => left = dialect.coerce(target, left),
                        Side::Right => right = dialect.coerce(target, right),
                    }
                }
                let predicate = if self.operator == SearchOperator::Contains {
                    dialect.contains(left, right)
                } else {
                    if self.operator.is_ordering() && self.left.kind() == Some(SearchValueKind::String)
                        && self.right.kind() == Some(SearchValueKind::String)
                    {
                        left = dialect.binary_order(left);
                        right = dialect.binary_order(right);
                    }
                    let mut predicate =
                        SqlFragment::wrap("(", left, &format!(" {} ", self.operator.sql()));
                    predicate.append(right).push_sql(")");
                    predicate
                };
                SqlFragment::wrap("(", predicate, " IS TRUE)")
            }
        };

        self.left
            .required_conditions(dialect)
            .into_iter()
            .chain(self.right.required_conditions(dialect))
            .fold(comparison, SqlFragment::and)
    }

    fn to_sql(&self, dialect: SqlDialect) -> SqlSearch {
        let mut search = SqlSearch::new(WhereClause::Condition(self.to_fragment(dialect)));
        for term in [&self.left, &self.right] {
            for join in term.joins() {
                search.add_join(join);
            }
            for select in term.selects() {
                search.add_select(select);
            }
        }
        search
    }
}

fn check_operator(
    operator: SearchOperator,
    left: SearchValueKind,
    right: SearchValueKind,
) -> ExpressionResult<()> {
    if operator == SearchOperator::Contains
        && (left != SearchValueKind::String || right != SearchValueKind::String)
    {
        return Err(ExpressionError::ContainsOnNonString { left, right });
    }
    if operator.is_ordering() && !left.is_orderable() {
        return Err(ExpressionError::UnsupportedOperator {
            operator: operator.to_string(),
            kind: left,
        });
    }
    Ok(())
}

/// A constant string compared with a temporal term must parse now rather
/// than fail for every enrollee later.
fn check_constant_parses(term: &dyn SearchTerm, target: SearchValueKind) -> ExpressionResult<()> {
    if let Some(value) = term.constant_value() {
        if let Some(value) = value? {
            value.parse_to(target)?;
        }
    }
    Ok(())
}

fn apply_operator(
    operator: SearchOperator,
    left: &SearchValue,
    right: &SearchValue,
) -> ExpressionResult<bool> {
    match operator {
        SearchOperator::Equals => left.equals(right),
        SearchOperator::NotEquals => Ok(!left.equals(right)?),
        SearchOperator::GreaterThan => left.greater_than(right),
        SearchOperator::GreaterThanOrEqual => left.greater_than_or_equal(right),
        SearchOperator::LessThan => right.greater_than(left),
        SearchOperator::LessThanOrEqual => right.greater_than_or_equal(left),
        SearchOperator::Contains => left.contains(right),
    }
}

/// A parsed and type-checked search rule.
#[derive(Debug, Clone)]
pub enum EnrolleeSearchExpression {
    /// Matches every enrollee.
    Default,
    Not(Box<EnrolleeSearchExpression>),
    Boolean {
        left: Box<EnrolleeSearchExpression>,
        operator: BooleanOperator,
        right: Box<EnrolleeSearchExpression>,
    },
    /// Matches enrollees whose id is in the list.
    Include { ids: Vec<String> },
    Comparison(ComparisonExpression),
}

impl EnrolleeSearchExpression {
    pub fn not(inner: EnrolleeSearchExpression) -> Self {
        EnrolleeSearchExpression::Not(Box::new(inner))
    }

    pub fn and(left: EnrolleeSearchExpression, right: EnrolleeSearchExpression) -> Self {
        EnrolleeSearchExpression::Boolean {
            left: Box::new(left),
            operator: BooleanOperator::And,
            right: Box::new(right),
        }
    }

    pub fn or(left: EnrolleeSearchExpression, right: EnrolleeSearchExpression) -> Self {
        EnrolleeSearchExpression::Boolean {
            left: Box::new(left),
            operator: BooleanOperator::Or,
            right: Box::new(right),
        }
    }

    /// Evaluates the rule for one enrollee. Both sides of a boolean operator
    /// are always evaluated so that errors surface consistently.
    pub fn evaluate(&self, context: &EnrolleeSearchContext) -> ExpressionResult<bool> {
        match self {
            EnrolleeSearchExpression::Default => Ok(true),
            EnrolleeSearchExpression::Not(inner) => Ok(!inner.evaluate(context)?),
            EnrolleeSearchExpression::Boolean {
                left,
                operator,
                right,
            } => {
                let left = left.evaluate(context)?;
                let right = right.evaluate(context)?;
                Ok(match operator {
                    BooleanOperator::And => left && right,
                    BooleanOperator::Or => left || right,
                })
            }
            EnrolleeSearchExpression::Include { ids } => {
                Ok(ids.iter().any(|id| *id == context.enrollee.id))
            }
            EnrolleeSearchExpression::Comparison(comparison) => comparison.evaluate(context),
        }
    }

    /// Compiles the rule into joins, selects and a WHERE tree.
    pub fn to_sql(&self, dialect: SqlDialect) -> SqlSearch {
        match self {
            EnrolleeSearchExpression::Default => SqlSearch::new(WhereClause::always()),
            EnrolleeSearchExpression::Not(inner) => inner.to_sql(dialect).negate(),
            EnrolleeSearchExpression::Boolean {
                left,
                operator,
                right,
            } => {
                let left = left.to_sql(dialect);
                let right = right.to_sql(dialect);
                match operator {
                    BooleanOperator::And => left.and(right),
                    BooleanOperator::Or => left.or(right),
                }
            }
            EnrolleeSearchExpression::Include { ids } => {
                if ids.is_empty() {
                    return SqlSearch::new(WhereClause::never());
                }
                let values = ids
                    .iter()
                    .map(|id| SqlFragment::param(SqlParam::Text(id.clone())));
                SqlSearch::new(WhereClause::Condition(SqlFragment::wrap(
                    "enrollee.id IN (",
                    SqlFragment::join(values, ", "),
                    ")",
                )))
            }
            EnrolleeSearchExpression::Comparison(comparison) => comparison.to_sql(dialect),
        }
    }

    /// Compiles the rule into a complete statement scoped to one environment.
    pub fn compile(
        &self,
        study_env: &StudyEnvironmentId,
        dialect: SqlDialect,
        limit: Option<usize>,
    ) -> EnrolleeSearchQuery {
        EnrolleeQueryBuilder::new(study_env, dialect)
            .with_limit(limit)
            .build(&self.to_sql(dialect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Enrollee, Profile};
    use crate::term::{LiteralTerm, TermRegistry};
    use crate::value::parse_instant;

    fn registry() -> TermRegistry {
        TermRegistry::with_defaults()
    }

    fn term(variable: &str) -> Arc<dyn SearchTerm> {
        registry().resolve(variable).unwrap()
    }

    fn literal(value: SearchValue) -> Arc<dyn SearchTerm> {
        Arc::new(LiteralTerm::new(value))
    }

    fn text(s: &str) -> Arc<dyn SearchTerm> {
        literal(SearchValue::String(s.to_string()))
    }

    fn null() -> Arc<dyn SearchTerm> {
        Arc::new(LiteralTerm::null())
    }

    fn context(given_name: Option<&str>) -> EnrolleeSearchContext {
        let mut ctx = EnrolleeSearchContext::new(Enrollee {
            id: "e1".to_string(),
            shortcode: "JOSALK".to_string(),
            study_environment_id: StudyEnvironmentId::new("env"),
            participant_user_id: None,
            profile_id: Some("p1".to_string()),
            subject: true,
            consented: false,
            created_at: parse_instant("2023-03-04T10:00:00Z").unwrap(),
        });
        ctx.profile = Some(Profile {
            id: "p1".to_string(),
            given_name: given_name.map(str::to_string),
            ..Default::default()
        });
        ctx
    }

    #[test]
    fn test_operator_text_round_trips() {
        for operator in [
            SearchOperator::Equals,
            SearchOperator::NotEquals,
            SearchOperator::GreaterThan,
            SearchOperator::GreaterThanOrEqual,
            SearchOperator::LessThan,
            SearchOperator::LessThanOrEqual,
            SearchOperator::Contains,
        ] {
            assert_eq!(operator.symbol().parse::<SearchOperator>().unwrap(), operator);
        }
        assert!(matches!(
            "=~".parse::<SearchOperator>(),
            Err(ExpressionError::InvalidOperator { .. })
        ));
    }

    #[test]
    fn test_mismatched_kinds_are_rejected() {
        let err = ComparisonExpression::new(
            term("age"),
            SearchOperator::Equals,
            text("eighteen"),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExpressionError::IncompatibleKinds {
                left: SearchValueKind::Number,
                right: SearchValueKind::String,
            }
        );
    }

    #[test]
    fn test_ordering_on_booleans_is_rejected() {
        let err = ComparisonExpression::new(
            term("enrollee.consented"),
            SearchOperator::GreaterThan,
            literal(SearchValue::Boolean(false)),
        )
        .unwrap_err();
        assert!(matches!(err, ExpressionError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_contains_requires_strings() {
        let err = ComparisonExpression::new(
            term("age"),
            SearchOperator::Contains,
            literal(SearchValue::Number(1.0)),
        )
        .unwrap_err();
        assert!(matches!(err, ExpressionError::ContainsOnNonString { .. }));
    }

    #[test]
    fn test_null_only_with_equality() {
        assert!(ComparisonExpression::new(term("age"), SearchOperator::GreaterThan, null()).is_err());
        assert!(ComparisonExpression::new(null(), SearchOperator::Equals, null()).is_err());
        assert!(ComparisonExpression::new(null(), SearchOperator::NotEquals, term("age")).is_ok());
    }

    #[test]
    fn test_unparseable_constant_date_is_rejected() {
        let err = ComparisonExpression::new(
            term("enrolledDate"),
            SearchOperator::Equals,
            text("March 4th"),
        )
        .unwrap_err();
        assert!(matches!(err, ExpressionError::ValueConversion { .. }));
    }

    #[test]
    fn test_presence_checks() {
        let is_null =
            ComparisonExpression::new(term("profile.givenName"), SearchOperator::Equals, null())
                .unwrap();
        assert!(is_null.evaluate(&context(None)).unwrap());
        assert!(!is_null.evaluate(&context(Some("Jonas"))).unwrap());
        assert_eq!(
            is_null.to_fragment(SqlDialect::Sqlite).render(SqlDialect::Sqlite).sql,
            "(profile.given_name) IS NULL"
        );
    }

    #[test]
    fn test_missing_value_is_false_both_ways() {
        let eq = ComparisonExpression::new(
            term("profile.givenName"),
            SearchOperator::Equals,
            text("Jonas"),
        )
        .unwrap();
        let ne = ComparisonExpression::new(
            term("profile.givenName"),
            SearchOperator::NotEquals,
            text("Jonas"),
        )
        .unwrap();
        let ctx = context(None);
        assert!(!eq.evaluate(&ctx).unwrap());
        assert!(!ne.evaluate(&ctx).unwrap());
        let not_eq = EnrolleeSearchExpression::not(EnrolleeSearchExpression::Comparison(eq));
        assert!(not_eq.evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_coercion_applies_in_both_directions() {
        let ctx = context(None);
        let date_first = ComparisonExpression::new(
            term("enrolledDate"),
            SearchOperator::Equals,
            text("2023-03-04"),
        )
        .unwrap();
        let string_first = ComparisonExpression::new(
            text("2023-03-04"),
            SearchOperator::Equals,
            term("enrolledDate"),
        )
        .unwrap();
        assert!(date_first.evaluate(&ctx).unwrap());
        assert!(string_first.evaluate(&ctx).unwrap());

        let sql = string_first
            .to_fragment(SqlDialect::Sqlite)
            .render(SqlDialect::Sqlite)
            .sql;
        assert_eq!(sql, "((search_date(?1) = date(enrollee.created_at)) IS TRUE)");
    }

    #[test]
    fn test_unparseable_stored_text_compares_as_missing() {
        // The given name is not a date, so every ordering against the
        // enrollment date is false rather than an error.
        let ctx = context(Some("soon"));
        for operator in [
            SearchOperator::GreaterThan,
            SearchOperator::LessThan,
            SearchOperator::Equals,
            SearchOperator::NotEquals,
        ] {
            let comparison =
                ComparisonExpression::new(term("profile.givenName"), operator, term("enrolledDate"))
                    .unwrap();
            assert!(!comparison.evaluate(&ctx).unwrap(), "{}", operator);
        }

        let negated = EnrolleeSearchExpression::Not(Box::new(EnrolleeSearchExpression::Comparison(
            ComparisonExpression::new(
                term("profile.givenName"),
                SearchOperator::GreaterThan,
                term("enrolledDate"),
            )
            .unwrap(),
        )));
        assert!(negated.evaluate(&ctx).unwrap());

        let parsed = context(Some("2023-03-05"));
        let later = ComparisonExpression::new(
            term("profile.givenName"),
            SearchOperator::GreaterThan,
            term("enrolledDate"),
        )
        .unwrap();
        assert!(later.evaluate(&parsed).unwrap());
    }

    #[test]
    fn test_less_than_swaps_operands() {
        let ctx = context(None);
        let before = ComparisonExpression::new(
            term("enrollee.createdAt"),
            SearchOperator::LessThan,
            text("2024-01-01"),
        )
        .unwrap();
        assert!(before.evaluate(&ctx).unwrap());
        let after = ComparisonExpression::new(
            term("enrollee.createdAt"),
            SearchOperator::LessThanOrEqual,
            text("2020-01-01"),
        )
        .unwrap();
        assert!(!after.evaluate(&ctx).unwrap());
    }

    #[test]
    fn test_postgres_string_ordering_is_bytewise() {
        let cmp = ComparisonExpression::new(
            term("profile.givenName"),
            SearchOperator::GreaterThan,
            text("M"),
        )
        .unwrap();
        assert_eq!(
            cmp.to_fragment(SqlDialect::Postgres)
                .render(SqlDialect::Postgres)
                .sql,
            "(((profile.given_name) COLLATE \"C\" > ($1::text) COLLATE \"C\") IS TRUE)"
        );
    }

    #[test]
    fn test_task_guard_is_anded() {
        let cmp = ComparisonExpression::new(
            term("task.consent.status"),
            SearchOperator::Equals,
            text("COMPLETE"),
        )
        .unwrap();
        let sql = cmp.to_fragment(SqlDialect::Sqlite).render(SqlDialect::Sqlite).sql;
        assert!(sql.starts_with("(((task_"));
        assert!(sql.contains(") AND (COALESCE(task_"));
        assert!(sql.ends_with(".status, '') <> 'REMOVED')"));
    }

    #[test]
    fn test_include_compiles_to_in_list() {
        let include = EnrolleeSearchExpression::Include {
            ids: vec!["e1".to_string(), "e2".to_string()],
        };
        assert!(include.evaluate(&context(None)).unwrap());
        let sql = include.to_sql(SqlDialect::Sqlite);
        assert_eq!(
            sql.condition().to_fragment().render(SqlDialect::Sqlite).sql,
            "enrollee.id IN (?1, ?2)"
        );

        let empty = EnrolleeSearchExpression::Include { ids: vec![] };
        assert!(!empty.evaluate(&context(None)).unwrap());
        assert_eq!(
            empty
                .to_sql(SqlDialect::Sqlite)
                .condition()
                .to_fragment()
                .render(SqlDialect::Sqlite)
                .sql,
            "1 = 0"
        );
    }

    #[test]
    fn test_boolean_merges_joins_once() {
        let given = EnrolleeSearchExpression::Comparison(
            ComparisonExpression::new(term("profile.givenName"), SearchOperator::Equals, text("A"))
                .unwrap(),
        );
        let family = EnrolleeSearchExpression::Comparison(
            ComparisonExpression::new(
                term("profile.familyName"),
                SearchOperator::Equals,
                text("B"),
            )
            .unwrap(),
        );
        let search = EnrolleeSearchExpression::or(given, family).to_sql(SqlDialect::Sqlite);
        assert_eq!(search.joins().len(), 1);
        assert_eq!(search.selects().len(), 2);
    }
}
