//! Filtering of exported participant data by a search rule.

use crate::context::EnrolleeSearchContext;
use crate::error::{ExpressionResult, SearchResult};
use crate::expression::{EnrolleeSearchExpression, ExpressionBuilder};
use crate::parser;
use crate::term::TermRegistry;

/// A parsed export filter.
///
/// The raw filter string is kept alongside the expression so export
/// options can be stored and shown back to the operator unchanged.
///
/// ```
/// use cohort_search::export::ExportFilter;
/// use cohort_search::term::TermRegistry;
///
/// let registry = TermRegistry::with_defaults();
/// let filter = ExportFilter::new("{enrollee.consented} = true", &registry).unwrap();
/// assert_eq!(filter.filter_string(), "{enrollee.consented} = true");
/// ```
#[derive(Debug, Clone)]
pub struct ExportFilter {
    filter_string: String,
    expression: EnrolleeSearchExpression,
}

impl ExportFilter {
    /// Parses a filter string. A blank string matches every enrollee.
    pub fn new(filter_string: impl Into<String>, registry: &TermRegistry) -> SearchResult<Self> {
        let filter_string = filter_string.into();
        let parsed = parser::parse(&filter_string)?;
        let expression = ExpressionBuilder::new(registry).build(&parsed)?;
        Ok(Self {
            filter_string,
            expression,
        })
    }

    pub fn filter_string(&self) -> &str {
        &self.filter_string
    }

    pub fn expression(&self) -> &EnrolleeSearchExpression {
        &self.expression
    }

    pub fn matches(&self, context: &EnrolleeSearchContext) -> ExpressionResult<bool> {
        self.expression.evaluate(context)
    }

    /// Keeps the contexts the filter matches, in their original order.
    pub fn retain_matching(
        &self,
        contexts: Vec<EnrolleeSearchContext>,
    ) -> ExpressionResult<Vec<EnrolleeSearchContext>> {
        let mut kept = Vec::with_capacity(contexts.len());
        for context in contexts {
            if self.matches(&context)? {
                kept.push(context);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::model::{Enrollee, StudyEnvironmentId};
    use chrono::{TimeZone, Utc};

    fn context(id: &str, consented: bool) -> EnrolleeSearchContext {
        EnrolleeSearchContext::new(Enrollee {
            id: id.to_string(),
            shortcode: id.to_uppercase(),
            study_environment_id: StudyEnvironmentId::new("env"),
            participant_user_id: None,
            profile_id: None,
            subject: true,
            consented,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn test_retain_matching_keeps_order() {
        let registry = TermRegistry::with_defaults();
        let filter = ExportFilter::new("{enrollee.consented} = true", &registry).unwrap();
        let kept = filter
            .retain_matching(vec![
                context("c", true),
                context("a", false),
                context("b", true),
            ])
            .unwrap();
        let ids: Vec<&str> = kept.iter().map(|c| c.enrollee.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_blank_filter_matches_everything() {
        let registry = TermRegistry::with_defaults();
        let filter = ExportFilter::new("  ", &registry).unwrap();
        assert!(filter.matches(&context("a", false)).unwrap());
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let registry = TermRegistry::with_defaults();
        let err = ExportFilter::new("{enrollee.consented} =", &registry).unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }
}
