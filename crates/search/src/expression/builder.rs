//! Turns a parse tree into a type-checked expression tree.

use std::sync::Arc;

use tracing::debug;

use crate::error::{ExpressionError, ExpressionResult, SearchResult};
use crate::parser::{self, ParsedExpression, ParsedTerm};
use crate::term::{FunctionTerm, LiteralTerm, SearchFunction, SearchTerm, TermRegistry};
use crate::value::{SearchValue, SearchValueKind};

use super::{ComparisonExpression, EnrolleeSearchExpression, SearchOperator};

/// Resolves variables and checks kinds while walking a parse tree.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionBuilder<'a> {
    registry: &'a TermRegistry,
}

impl<'a> ExpressionBuilder<'a> {
    pub fn new(registry: &'a TermRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, parsed: &ParsedExpression) -> ExpressionResult<EnrolleeSearchExpression> {
        match parsed {
            ParsedExpression::Empty => Ok(EnrolleeSearchExpression::Default),
            ParsedExpression::Not(inner) => Ok(EnrolleeSearchExpression::not(self.build(inner)?)),
            ParsedExpression::And(left, right) => Ok(EnrolleeSearchExpression::and(
                self.build(left)?,
                self.build(right)?,
            )),
            ParsedExpression::Or(left, right) => Ok(EnrolleeSearchExpression::or(
                self.build(left)?,
                self.build(right)?,
            )),
            ParsedExpression::Include(term) => {
                let term = self.build_term(term)?;
                Ok(EnrolleeSearchExpression::Include {
                    ids: include_ids(term.as_ref())?,
                })
            }
            ParsedExpression::Comparison {
                left,
                operator,
                right,
                ..
            } => {
                let operator: SearchOperator = operator.parse()?;
                let comparison =
                    ComparisonExpression::new(self.build_term(left)?, operator, self.build_term(right)?)?;
                Ok(EnrolleeSearchExpression::Comparison(comparison))
            }
        }
    }

    pub fn build_term(&self, parsed: &ParsedTerm) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let term: Arc<dyn SearchTerm> = match parsed {
            ParsedTerm::Variable(variable) => return self.registry.resolve(variable),
            ParsedTerm::String(s) => Arc::new(LiteralTerm::new(SearchValue::String(s.clone()))),
            ParsedTerm::Number(n) => Arc::new(LiteralTerm::new(SearchValue::Number(*n))),
            ParsedTerm::Boolean(b) => Arc::new(LiteralTerm::new(SearchValue::Boolean(*b))),
            ParsedTerm::Null => Arc::new(LiteralTerm::null()),
            ParsedTerm::Function { name, args } => {
                let function: SearchFunction = name.parse()?;
                let args = args
                    .iter()
                    .map(|a| self.build_term(a))
                    .collect::<ExpressionResult<Vec<_>>>()?;
                Arc::new(FunctionTerm::new(function, args)?)
            }
        };
        Ok(term)
    }
}

/// Splits a constant string into enrollee ids on commas and whitespace.
fn include_ids(term: &dyn SearchTerm) -> ExpressionResult<Vec<String>> {
    let value = term.constant_value().ok_or(ExpressionError::NonConstantInclude)??;
    match value {
        None => Ok(Vec::new()),
        Some(SearchValue::String(s)) => Ok(s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()),
        Some(other) => Err(ExpressionError::IncompatibleKinds {
            left: SearchValueKind::String,
            right: other.kind(),
        }),
    }
}

/// Parses rule text into expressions using a shared registry.
#[derive(Debug, Clone)]
pub struct EnrolleeSearchExpressionParser {
    registry: Arc<TermRegistry>,
}

impl EnrolleeSearchExpressionParser {
    pub fn new(registry: Arc<TermRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TermRegistry {
        &self.registry
    }

    /// Parses and builds a rule. Errors carry no partial tree.
    pub fn parse_rule(&self, rule: &str) -> SearchResult<EnrolleeSearchExpression> {
        let parsed = parser::parse(rule)?;
        let expression = ExpressionBuilder::new(&self.registry).build(&parsed)?;
        debug!(rule = %rule, "parsed search rule");
        Ok(expression)
    }
}

impl Default for EnrolleeSearchExpressionParser {
    fn default() -> Self {
        Self::new(Arc::new(TermRegistry::with_defaults()))
    }
}
