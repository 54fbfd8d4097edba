//! Account variables: `user.*` for the participant user and `portalUser.*`
//! for the portal registration attached to the enrollee's profile.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExpressionResult;
use crate::model::StudyEnvironmentCatalog;
use crate::sql::{JoinClause, SqlFragment};
use crate::value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const USER_PREFIX: &str = "user.";
const USER_ALIAS: &str = "participant_user";
const PORTAL_PREFIX: &str = "portalUser.";
const PORTAL_ALIAS: &str = "portal_user";

fn participant_user_join() -> JoinClause {
    JoinClause::left(
        "participant_user",
        USER_ALIAS,
        SqlFragment::raw(format!(
            "{}.id = enrollee.participant_user_id",
            USER_ALIAS
        )),
    )
}

/// The earliest portal registration for the enrollee's profile.
fn portal_user_join() -> JoinClause {
    JoinClause::left(
        "portal_participant_user",
        PORTAL_ALIAS,
        SqlFragment::raw(format!(
            "{}.id = (SELECT p.id FROM portal_participant_user p \
             WHERE p.profile_id = enrollee.profile_id ORDER BY p.created_at, p.id LIMIT 1)",
            PORTAL_ALIAS
        )),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserTermResolver;

impl TermResolver for UserTermResolver {
    fn name(&self) -> &'static str {
        "user"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(USER_PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let term = match variable.strip_prefix(USER_PREFIX) {
            Some("username") => FieldTerm::column(
                variable,
                SearchValueKind::String,
                USER_ALIAS,
                "username",
                |ctx| {
                    ctx.participant_user
                        .as_ref()
                        .map(|u| SearchValue::String(u.username.clone()))
                },
            ),
            Some("createdAt") => FieldTerm::column(
                variable,
                SearchValueKind::Instant,
                USER_ALIAS,
                "created_at",
                |ctx| {
                    ctx.participant_user
                        .as_ref()
                        .map(|u| SearchValue::Instant(u.created_at))
                },
            ),
            Some("lastLogin") => FieldTerm::column(
                variable,
                SearchValueKind::Instant,
                USER_ALIAS,
                "last_login",
                |ctx| {
                    ctx.participant_user
                        .as_ref()
                        .and_then(|u| u.last_login)
                        .map(SearchValue::Instant)
                },
            ),
            _ => return Err(unknown_variable(variable)),
        };
        Ok(term.with_join(participant_user_join()).shared())
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        BTreeMap::from([
            (
                "user.username".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::String),
            ),
            (
                "user.createdAt".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Instant),
            ),
            (
                "user.lastLogin".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Instant),
            ),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortalUserTermResolver;

impl TermResolver for PortalUserTermResolver {
    fn name(&self) -> &'static str {
        "portalUser"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PORTAL_PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let term = match variable.strip_prefix(PORTAL_PREFIX) {
            Some("createdAt") => FieldTerm::column(
                variable,
                SearchValueKind::Instant,
                PORTAL_ALIAS,
                "created_at",
                |ctx| {
                    ctx.portal_participant_user
                        .as_ref()
                        .map(|p| SearchValue::Instant(p.created_at))
                },
            ),
            Some("lastLogin") => FieldTerm::column(
                variable,
                SearchValueKind::Instant,
                PORTAL_ALIAS,
                "last_login",
                |ctx| {
                    ctx.portal_participant_user
                        .as_ref()
                        .and_then(|p| p.last_login)
                        .map(SearchValue::Instant)
                },
            ),
            _ => return Err(unknown_variable(variable)),
        };
        Ok(term.with_join(portal_user_join()).shared())
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        BTreeMap::from([
            (
                "portalUser.createdAt".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Instant),
            ),
            (
                "portalUser.lastLogin".to_string(),
                SearchValueTypeDefinition::of(SearchValueKind::Instant)
                    .with_description("Most recent sign-in to the portal"),
            ),
        ])
    }
}
