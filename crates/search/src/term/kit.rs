//! `kit.latest.*` variables: the enrollee's most recent kit request.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExpressionResult;
use crate::model::{KitRequest, KitRequestStatus, StudyEnvironmentCatalog};
use crate::sql::{JoinClause, SqlFragment};
use crate::value::{FacetChoice, SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const PREFIX: &str = "kit.latest.";
const ALIAS: &str = "kit_latest";

struct KitField {
    name: &'static str,
    column: &'static str,
    kind: SearchValueKind,
    read: fn(&KitRequest) -> SearchValue,
}

const KIT_FIELDS: &[KitField] = &[
    KitField {
        name: "status",
        column: "status",
        kind: SearchValueKind::String,
        read: |k| SearchValue::String(k.status.as_str().to_string()),
    },
    KitField {
        name: "kitType",
        column: "kit_type",
        kind: SearchValueKind::String,
        read: |k| SearchValue::String(k.kit_type.clone()),
    },
    KitField {
        name: "createdAt",
        column: "created_at",
        kind: SearchValueKind::Instant,
        read: |k| SearchValue::Instant(k.created_at),
    },
];

fn latest_kit_join() -> JoinClause {
    JoinClause::left(
        "kit_request",
        ALIAS,
        SqlFragment::raw(format!(
            "{}.id = (SELECT k.id FROM kit_request k WHERE k.enrollee_id = enrollee.id \
             ORDER BY k.created_at DESC, k.id DESC LIMIT 1)",
            ALIAS
        )),
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KitTermResolver;

impl TermResolver for KitTermResolver {
    fn name(&self) -> &'static str {
        "kit"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with("kit.")
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let field = variable
            .strip_prefix(PREFIX)
            .and_then(|name| KIT_FIELDS.iter().find(|f| f.name == name))
            .ok_or_else(|| unknown_variable(variable))?;
        let read = field.read;
        Ok(
            FieldTerm::column(variable, field.kind, ALIAS, field.column, move |ctx| {
                ctx.latest_kit().map(read)
            })
            .with_join(latest_kit_join())
            .shared(),
        )
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        KIT_FIELDS
            .iter()
            .map(|f| {
                let mut definition = SearchValueTypeDefinition::of(f.kind);
                if f.name == "status" {
                    definition = definition.with_choices(
                        KitRequestStatus::ALL
                            .iter()
                            .map(|s| FacetChoice::plain(s.as_str()))
                            .collect(),
                    );
                }
                (format!("{}{}", PREFIX, f.name), definition)
            })
            .collect()
    }
}
