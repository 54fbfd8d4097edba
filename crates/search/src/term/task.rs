//! `task.<targetStableId>.*` variables.
//!
//! Field terms read the most recent task for the target. A removed task
//! makes every comparison on those fields false rather than looking like a
//! missing task.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::ExpressionResult;
use crate::model::{ParticipantTask, StudyEnvironmentCatalog, TaskStatus};
use crate::sql::{JoinClause, SqlDialect, SqlFragment};
use crate::value::{FacetChoice, SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm, TermGuard, hashed_alias, text_param};

const PREFIX: &str = "task.";

struct TaskField {
    name: &'static str,
    column: &'static str,
    kind: SearchValueKind,
    read: fn(&ParticipantTask) -> SearchValue,
}

const TASK_FIELDS: &[TaskField] = &[
    TaskField {
        name: "status",
        column: "status",
        kind: SearchValueKind::String,
        read: |t| SearchValue::String(t.status.as_str().to_string()),
    },
    TaskField {
        name: "taskType",
        column: "task_type",
        kind: SearchValueKind::String,
        read: |t| SearchValue::String(t.task_type.clone()),
    },
    TaskField {
        name: "createdAt",
        column: "created_at",
        kind: SearchValueKind::Instant,
        read: |t| SearchValue::Instant(t.created_at),
    },
];

const ASSIGNED: &str = "assigned";

/// Joins the most recent task for a target, whatever its status.
fn latest_task_join(alias: &str, target: &str) -> JoinClause {
    let mut on = SqlFragment::raw(format!(
        "{}.id = (SELECT t.id FROM participant_task t WHERE t.enrollee_id = enrollee.id \
         AND t.target_stable_id = ",
        alias
    ));
    on.append(text_param(target))
        .push_sql(" ORDER BY t.created_at DESC, t.id DESC LIMIT 1)");
    JoinClause::left("participant_task", alias, on)
}

fn not_removed_guard(alias: &str, target: &str) -> TermGuard {
    let condition = format!(
        "COALESCE({}.status, '') <> '{}'",
        alias,
        TaskStatus::Removed.as_str()
    );
    let target = target.to_string();
    TermGuard::new(
        move |_: SqlDialect| SqlFragment::raw(condition.clone()),
        move |ctx: &EnrolleeSearchContext| {
            ctx.latest_task(&target)
                .is_none_or(|t| t.status != TaskStatus::Removed)
        },
    )
}

fn assigned_term(variable: &str, target: &str) -> FieldTerm {
    let sql_target = target.to_string();
    let target = target.to_string();
    FieldTerm::computed(
        variable,
        SearchValueKind::Boolean,
        move |_: SqlDialect| {
            let mut exists = SqlFragment::raw(
                "EXISTS (SELECT 1 FROM participant_task t WHERE t.enrollee_id = enrollee.id \
                 AND t.target_stable_id = ",
            );
            exists
                .append(text_param(&sql_target))
                .push_sql(&format!(" AND t.status <> '{}')", TaskStatus::Removed.as_str()));
            exists
        },
        move |ctx| {
            Some(SearchValue::Boolean(ctx.tasks.iter().any(|t| {
                t.target_stable_id == target && t.status != TaskStatus::Removed
            })))
        },
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskTermResolver;

impl TermResolver for TaskTermResolver {
    fn name(&self) -> &'static str {
        "task"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let (target, field) = variable
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.rsplit_once('.'))
            .filter(|(t, _)| !t.is_empty() && !t.contains('.'))
            .ok_or_else(|| unknown_variable(variable))?;

        if field == ASSIGNED {
            return Ok(assigned_term(variable, target).shared());
        }

        let spec = TASK_FIELDS
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| unknown_variable(variable))?;
        let alias = hashed_alias("task", &[target]);
        let read = spec.read;
        let owned_target = target.to_string();
        Ok(
            FieldTerm::column(variable, spec.kind, &alias, spec.column, move |ctx| {
                ctx.latest_task(&owned_target).map(read)
            })
            .with_join(latest_task_join(&alias, target))
            .with_guard(not_removed_guard(&alias, target))
            .shared(),
        )
    }

    fn facets(
        &self,
        catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        let statuses: Vec<_> = TaskStatus::ALL
            .iter()
            .map(|s| FacetChoice::plain(s.as_str()))
            .collect();
        let mut facets = BTreeMap::new();
        for target in &catalog.task_targets {
            for field in TASK_FIELDS {
                let mut definition = SearchValueTypeDefinition::of(field.kind);
                if field.name == "status" {
                    definition = definition.with_choices(statuses.clone());
                }
                facets.insert(format!("{}{}.{}", PREFIX, target, field.name), definition);
            }
            facets.insert(
                format!("{}{}.{}", PREFIX, target, ASSIGNED),
                SearchValueTypeDefinition::of(SearchValueKind::Boolean),
            );
        }
        facets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Enrollee, StudyEnvironmentId};
    use crate::value::parse_instant;

    fn task(id: &str, status: TaskStatus, created: &str) -> ParticipantTask {
        ParticipantTask {
            id: id.to_string(),
            enrollee_id: "e1".to_string(),
            target_stable_id: "consent".to_string(),
            task_type: "CONSENT".to_string(),
            status,
            created_at: parse_instant(created).unwrap(),
        }
    }

    fn context(tasks: Vec<ParticipantTask>) -> EnrolleeSearchContext {
        let mut ctx = EnrolleeSearchContext::new(Enrollee {
            id: "e1".to_string(),
            shortcode: "AAAA".to_string(),
            study_environment_id: StudyEnvironmentId::new("env"),
            participant_user_id: None,
            profile_id: None,
            subject: true,
            consented: true,
            created_at: parse_instant("2023-01-01").unwrap(),
        });
        ctx.tasks = tasks;
        ctx
    }

    #[test]
    fn test_status_reads_latest_task() {
        let term = TaskTermResolver
            .resolve_variable("task.consent.status")
            .unwrap();
        let ctx = context(vec![
            task("t1", TaskStatus::New, "2023-01-01"),
            task("t2", TaskStatus::Complete, "2023-02-01"),
        ]);
        assert_eq!(
            term.extract(&ctx).unwrap(),
            Some(SearchValue::String("COMPLETE".to_string()))
        );
        assert!(term.guard(&ctx));
    }

    #[test]
    fn test_removed_latest_task_fails_guard() {
        let term = TaskTermResolver
            .resolve_variable("task.consent.status")
            .unwrap();
        let ctx = context(vec![task("t1", TaskStatus::Removed, "2023-01-01")]);
        assert!(!term.guard(&ctx));
        assert_eq!(term.required_conditions(SqlDialect::Sqlite).len(), 1);
    }

    #[test]
    fn test_no_task_passes_guard() {
        let term = TaskTermResolver
            .resolve_variable("task.consent.status")
            .unwrap();
        let ctx = context(vec![]);
        assert!(term.guard(&ctx));
        assert_eq!(term.extract(&ctx).unwrap(), None);
    }

    #[test]
    fn test_assigned_ignores_removed_tasks() {
        let term = TaskTermResolver
            .resolve_variable("task.consent.assigned")
            .unwrap();
        assert_eq!(
            term.extract(&context(vec![task("t1", TaskStatus::Removed, "2023-01-01")]))
                .unwrap(),
            Some(SearchValue::Boolean(false))
        );
        assert_eq!(
            term.extract(&context(vec![task("t1", TaskStatus::New, "2023-01-01")]))
                .unwrap(),
            Some(SearchValue::Boolean(true))
        );
    }

    #[test]
    fn test_unknown_task_field() {
        assert!(TaskTermResolver.resolve_variable("task.consent.color").is_err());
        assert!(TaskTermResolver.resolve_variable("task.status").is_err());
    }
}
