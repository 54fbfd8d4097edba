//! `answer.<surveyStableId>.<questionStableId>` variables.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExpressionResult;
use crate::model::StudyEnvironmentCatalog;
use crate::sql::{JoinClause, SqlFragment};
use crate::value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm, hashed_alias, text_param};

const PREFIX: &str = "answer.";

/// Joins the single answer an enrollee gave to one question.
fn answer_join(alias: &str, survey_stable_id: &str, question_stable_id: &str) -> JoinClause {
    let mut on = SqlFragment::raw(format!(
        "{a}.enrollee_id = enrollee.id AND {a}.survey_stable_id = ",
        a = alias
    ));
    on.append(text_param(survey_stable_id))
        .push_sql(&format!(" AND {}.question_stable_id = ", alias))
        .append(text_param(question_stable_id));
    JoinClause::left("answer", alias, on)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerTermResolver;

impl TermResolver for AnswerTermResolver {
    fn name(&self) -> &'static str {
        "answer"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let (survey, question) = variable
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.split_once('.'))
            .filter(|(s, q)| !s.is_empty() && !q.is_empty() && !q.contains('.'))
            .ok_or_else(|| unknown_variable(variable))?;

        let alias = hashed_alias("answer", &[survey, question]);
        let join = answer_join(&alias, survey, question);
        let (survey, question) = (survey.to_string(), question.to_string());
        Ok(FieldTerm::column(
            variable,
            SearchValueKind::String,
            &alias,
            "string_value",
            move |ctx| {
                ctx.answer(&survey, &question)
                    .and_then(|a| a.string_value.clone())
                    .map(SearchValue::String)
            },
        )
        .with_join(join)
        .shared())
    }

    fn facets(
        &self,
        catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        catalog
            .questions
            .iter()
            .map(|q| {
                let mut definition = SearchValueTypeDefinition::of(SearchValueKind::String)
                    .with_choices(q.choices.clone());
                if let Some(text) = &q.question_text {
                    definition = definition.with_description(text.clone());
                }
                (
                    format!("{}{}.{}", PREFIX, q.survey_stable_id, q.question_stable_id),
                    definition,
                )
            })
            .collect()
    }
}
