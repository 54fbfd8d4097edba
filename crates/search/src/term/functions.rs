//! Built-in functions over terms: `lower`, `trim`, `min` and `max`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::{ExpressionError, ExpressionResult};
use crate::sql::{JoinClause, SelectClause, SqlDialect, SqlFragment};
use crate::value::{SearchValue, SearchValueKind};

use super::SearchTerm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchFunction {
    Lower,
    Trim,
    Min,
    Max,
}

impl SearchFunction {
    pub fn name(&self) -> &'static str {
        match self {
            SearchFunction::Lower => "lower",
            SearchFunction::Trim => "trim",
            SearchFunction::Min => "min",
            SearchFunction::Max => "max",
        }
    }

    /// Validates argument count and kinds, returning the result kind.
    fn check(&self, kinds: &[Option<SearchValueKind>]) -> ExpressionResult<SearchValueKind> {
        match self {
            SearchFunction::Lower | SearchFunction::Trim => {
                if kinds.len() != 1 {
                    return Err(self.arity("exactly 1", kinds.len()));
                }
                match kinds[0] {
                    Some(SearchValueKind::String) => Ok(SearchValueKind::String),
                    Some(kind) => Err(ExpressionError::UnsupportedOperator {
                        operator: self.name().to_string(),
                        kind,
                    }),
                    None => Err(null_argument(SearchValueKind::String)),
                }
            }
            SearchFunction::Min | SearchFunction::Max => {
                let first = match kinds.first() {
                    None => return Err(self.arity("at least 1", 0)),
                    Some(None) => return Err(null_argument(SearchValueKind::Number)),
                    Some(Some(kind)) => *kind,
                };
                if !first.is_orderable() {
                    return Err(ExpressionError::UnsupportedOperator {
                        operator: self.name().to_string(),
                        kind: first,
                    });
                }
                for kind in &kinds[1..] {
                    match kind {
                        Some(k) if *k == first => {}
                        Some(k) => {
                            return Err(ExpressionError::IncompatibleKinds {
                                left: first,
                                right: *k,
                            });
                        }
                        None => return Err(null_argument(first)),
                    }
                }
                Ok(first)
            }
        }
    }

    fn arity(&self, expected: &str, actual: usize) -> ExpressionError {
        ExpressionError::Arity {
            function: self.name().to_string(),
            expected: expected.to_string(),
            actual,
        }
    }

    /// Applies the function to already extracted argument values.
    pub fn apply(&self, args: Vec<Option<SearchValue>>) -> ExpressionResult<Option<SearchValue>> {
        match self {
            SearchFunction::Lower => Ok(single_string(args)
                .map(|s| SearchValue::String(s.to_lowercase()))),
            SearchFunction::Trim => Ok(single_string(args)
                .map(|s| SearchValue::String(s.trim_matches(' ').to_string()))),
            SearchFunction::Min | SearchFunction::Max => {
                let greatest = *self == SearchFunction::Max;
                let mut best: Option<SearchValue> = None;
                for value in args.into_iter().flatten() {
                    best = match best {
                        None => Some(value),
                        Some(current) => {
                            let replace = if greatest {
                                value.greater_than(&current)?
                            } else {
                                current.greater_than(&value)?
                            };
                            Some(if replace { value } else { current })
                        }
                    };
                }
                Ok(best)
            }
        }
    }
}

fn single_string(args: Vec<Option<SearchValue>>) -> Option<String> {
    match args.into_iter().next().flatten() {
        Some(SearchValue::String(s)) => Some(s),
        _ => None,
    }
}

fn null_argument(target: SearchValueKind) -> ExpressionError {
    ExpressionError::ValueConversion {
        value: "null".to_string(),
        target,
    }
}

impl fmt::Display for SearchFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SearchFunction {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lower" => Ok(SearchFunction::Lower),
            "trim" => Ok(SearchFunction::Trim),
            "min" => Ok(SearchFunction::Min),
            "max" => Ok(SearchFunction::Max),
            _ => Err(ExpressionError::UnknownFunction {
                name: s.to_string(),
            }),
        }
    }
}

/// A function applied to one or more terms.
#[derive(Debug, Clone)]
pub struct FunctionTerm {
    function: SearchFunction,
    args: Vec<Arc<dyn SearchTerm>>,
    kind: SearchValueKind,
}

impl FunctionTerm {
    /// Type-checks the arguments; wrong arity or kinds fail here rather than
    /// at evaluation time.
    pub fn new(function: SearchFunction, args: Vec<Arc<dyn SearchTerm>>) -> ExpressionResult<Self> {
        let kinds: Vec<_> = args.iter().map(|a| a.kind()).collect();
        let kind = function.check(&kinds)?;
        Ok(Self {
            function,
            args,
            kind,
        })
    }

    pub fn function(&self) -> SearchFunction {
        self.function
    }
}

impl SearchTerm for FunctionTerm {
    fn extract(&self, context: &EnrolleeSearchContext) -> ExpressionResult<Option<SearchValue>> {
        let values = self
            .args
            .iter()
            .map(|a| a.extract(context))
            .collect::<ExpressionResult<Vec<_>>>()?;
        self.function.apply(values)
    }

    fn kind(&self) -> Option<SearchValueKind> {
        Some(self.kind)
    }

    fn joins(&self) -> Vec<JoinClause> {
        self.args.iter().flat_map(|a| a.joins()).collect()
    }

    fn selects(&self) -> Vec<SelectClause> {
        self.args.iter().flat_map(|a| a.selects()).collect()
    }

    fn term_clause(&self, dialect: SqlDialect) -> SqlFragment {
        let mut args: Vec<_> = self.args.iter().map(|a| a.term_clause(dialect)).collect();
        match self.function {
            SearchFunction::Lower => dialect.lower(args.remove(0)),
            SearchFunction::Trim => SqlFragment::wrap("TRIM(", args.remove(0), ")"),
            SearchFunction::Min => dialect.extreme(self.kind, args, false),
            SearchFunction::Max => dialect.extreme(self.kind, args, true),
        }
    }

    fn required_conditions(&self, dialect: SqlDialect) -> Vec<SqlFragment> {
        self.args
            .iter()
            .flat_map(|a| a.required_conditions(dialect))
            .collect()
    }

    fn guard(&self, context: &EnrolleeSearchContext) -> bool {
        self.args.iter().all(|a| a.guard(context))
    }

    fn constant_value(&self) -> Option<ExpressionResult<Option<SearchValue>>> {
        let mut values = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg.constant_value()? {
                Ok(value) => values.push(value),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(self.function.apply(values))
    }
}
