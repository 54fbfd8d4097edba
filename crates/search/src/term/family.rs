//! `family.*` variables: family membership and proxy relationships.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::ExpressionResult;
use crate::model::{EnrolleeRelation, RelationshipType, StudyEnvironmentCatalog};
use crate::sql::{JoinClause, SqlDialect, SqlFragment};
use crate::value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const PREFIX: &str = "family.";
const MEMBER_ALIAS: &str = "family_member";
const FAMILY_ALIAS: &str = "family";

fn first_membership_join() -> JoinClause {
    JoinClause::left(
        "family_enrollee",
        MEMBER_ALIAS,
        SqlFragment::raw(format!(
            "{}.id = (SELECT fe.id FROM family_enrollee fe WHERE fe.enrollee_id = enrollee.id \
             ORDER BY fe.created_at, fe.id LIMIT 1)",
            MEMBER_ALIAS
        )),
    )
}

fn family_join() -> JoinClause {
    JoinClause::left(
        "family",
        FAMILY_ALIAS,
        SqlFragment::raw(format!(
            "{}.id = {}.family_id",
            FAMILY_ALIAS, MEMBER_ALIAS
        )),
    )
}

fn relation_exists(column: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM enrollee_relation r WHERE r.{} = enrollee.id \
         AND r.relationship_type = '{}')",
        column,
        RelationshipType::Proxy.as_str()
    )
}

fn has_proxy_relation(
    context: &EnrolleeSearchContext,
    side: fn(&EnrolleeRelation) -> &str,
) -> bool {
    context.relations.iter().any(|r| {
        r.relationship_type == RelationshipType::Proxy && side(r) == context.enrollee.id
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FamilyTermResolver;

impl TermResolver for FamilyTermResolver {
    fn name(&self) -> &'static str {
        "family"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let field = variable
            .strip_prefix(PREFIX)
            .ok_or_else(|| unknown_variable(variable))?;
        let term = match field {
            "shortcode" => FieldTerm::column(
                variable,
                SearchValueKind::String,
                FAMILY_ALIAS,
                "shortcode",
                |ctx| {
                    ctx.first_membership()
                        .map(|m| SearchValue::String(m.family.shortcode.clone()))
                },
            )
            .with_join(first_membership_join())
            .with_join(family_join()),
            "count" => FieldTerm::computed(
                variable,
                SearchValueKind::Number,
                |dialect: SqlDialect| {
                    dialect.count_as_number(SqlFragment::raw(
                        "(SELECT COUNT(*) FROM family_enrollee fe WHERE fe.enrollee_id = enrollee.id)",
                    ))
                },
                |ctx| Some(SearchValue::Number(ctx.family_memberships.len() as f64)),
            ),
            "isProband" => FieldTerm::computed(
                variable,
                SearchValueKind::Boolean,
                |_: SqlDialect| {
                    SqlFragment::raw(
                        "EXISTS (SELECT 1 FROM family_enrollee fe JOIN family f ON f.id = fe.family_id \
                         WHERE fe.enrollee_id = enrollee.id AND f.proband_enrollee_id = enrollee.id)",
                    )
                },
                |ctx| {
                    let id = &ctx.enrollee.id;
                    Some(SearchValue::Boolean(ctx.family_memberships.iter().any(|m| {
                        m.family.proband_enrollee_id.as_deref() == Some(id.as_str())
                    })))
                },
            ),
            "isProxy" => FieldTerm::computed(
                variable,
                SearchValueKind::Boolean,
                |_: SqlDialect| SqlFragment::raw(relation_exists("enrollee_id")),
                |ctx| {
                    Some(SearchValue::Boolean(has_proxy_relation(ctx, |r| {
                        r.enrollee_id.as_str()
                    })))
                },
            ),
            "hasProxy" => FieldTerm::computed(
                variable,
                SearchValueKind::Boolean,
                |_: SqlDialect| SqlFragment::raw(relation_exists("target_enrollee_id")),
                |ctx| {
                    Some(SearchValue::Boolean(has_proxy_relation(ctx, |r| {
                        r.target_enrollee_id.as_str()
                    })))
                },
            ),
            _ => return Err(unknown_variable(variable)),
        };
        Ok(term.shared())
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        BTreeMap::from([
            (
                "family.shortcode".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::String),
            ),
            (
                "family.count".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Number)
                    .with_description("Number of families the enrollee belongs to"),
            ),
            (
                "family.isProband".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Boolean),
            ),
            (
                "family.isProxy".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Boolean)
                    .with_description("Acts as proxy for another enrollee"),
            ),
            (
                "family.hasProxy".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Boolean)
                    .with_description("Is governed by a proxy"),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FamilyMembership;
    use crate::model::{Enrollee, Family, FamilyEnrollee, StudyEnvironmentId};
    use crate::value::parse_instant;

    fn context() -> EnrolleeSearchContext {
        EnrolleeSearchContext::new(Enrollee {
            id: "e1".to_string(),
            shortcode: "FAMO".to_string(),
            study_environment_id: StudyEnvironmentId::new("env"),
            participant_user_id: None,
            profile_id: None,
            subject: true,
            consented: true,
            created_at: parse_instant("2023-01-01").unwrap(),
        })
    }

    fn membership(id: &str, shortcode: &str, proband: Option<&str>, created: &str) -> FamilyMembership {
        FamilyMembership {
            membership: FamilyEnrollee {
                id: format!("m-{}", id),
                family_id: id.to_string(),
                enrollee_id: "e1".to_string(),
                created_at: parse_instant(created).unwrap(),
            },
            family: Family {
                id: id.to_string(),
                shortcode: shortcode.to_string(),
                study_environment_id: StudyEnvironmentId::new("env"),
                proband_enrollee_id: proband.map(str::to_string),
                created_at: parse_instant(created).unwrap(),
            },
        }
    }

    fn extract(variable: &str, ctx: &EnrolleeSearchContext) -> Option<SearchValue> {
        FamilyTermResolver
            .resolve_variable(variable)
            .unwrap()
            .extract(ctx)
            .unwrap()
    }

    #[test]
    fn test_shortcode_uses_first_membership() {
        let mut ctx = context();
        ctx.family_memberships = vec![
            membership("f2", "LATER", None, "2023-06-01"),
            membership("f1", "FIRST", Some("e1"), "2023-02-01"),
        ];
        assert_eq!(
            extract("family.shortcode", &ctx),
            Some(SearchValue::String("FIRST".to_string()))
        );
        assert_eq!(extract("family.count", &ctx), Some(SearchValue::Number(2.0)));
        assert_eq!(
            extract("family.isProband", &ctx),
            Some(SearchValue::Boolean(true))
        );
    }

    #[test]
    fn test_no_family() {
        let ctx = context();
        assert_eq!(extract("family.shortcode", &ctx), None);
        assert_eq!(extract("family.count", &ctx), Some(SearchValue::Number(0.0)));
        assert_eq!(
            extract("family.isProband", &ctx),
            Some(SearchValue::Boolean(false))
        );
    }

    #[test]
    fn test_proxy_direction() {
        let mut ctx = context();
        ctx.relations = vec![EnrolleeRelation {
            id: "r1".to_string(),
            enrollee_id: "e1".to_string(),
            target_enrollee_id: "e2".to_string(),
            relationship_type: RelationshipType::Proxy,
            created_at: parse_instant("2023-01-01").unwrap(),
        }];
        assert_eq!(extract("family.isProxy", &ctx), Some(SearchValue::Boolean(true)));
        assert_eq!(extract("family.hasProxy", &ctx), Some(SearchValue::Boolean(false)));
    }

    #[test]
    fn test_shortcode_joins_membership_then_family() {
        let term = FamilyTermResolver.resolve_variable("family.shortcode").unwrap();
        let aliases: Vec<_> = term.joins().into_iter().map(|j| j.alias).collect();
        assert_eq!(aliases, vec!["family_member", "family"]);
    }
}
