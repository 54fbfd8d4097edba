//! `enrollee.*` variables and `enrolledDate`, read from the base table.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExpressionResult;
use crate::model::{Enrollee, StudyEnvironmentCatalog};
use crate::sql::{SqlDialect, SqlFragment};
use crate::value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const PREFIX: &str = "enrollee.";
const ENROLLED_DATE: &str = "enrolledDate";

struct EnrolleeField {
    name: &'static str,
    column: &'static str,
    kind: SearchValueKind,
    read: fn(&Enrollee) -> SearchValue,
}

const ENROLLEE_FIELDS: &[EnrolleeField] = &[
    EnrolleeField {
        name: "shortcode",
        column: "shortcode",
        kind: SearchValueKind::String,
        read: |e| SearchValue::String(e.shortcode.clone()),
    },
    EnrolleeField {
        name: "subject",
        column: "subject",
        kind: SearchValueKind::Boolean,
        read: |e| SearchValue::Boolean(e.subject),
    },
    EnrolleeField {
        name: "consented",
        column: "consented",
        kind: SearchValueKind::Boolean,
        read: |e| SearchValue::Boolean(e.consented),
    },
    EnrolleeField {
        name: "createdAt",
        column: "created_at",
        kind: SearchValueKind::Instant,
        read: |e| SearchValue::Instant(e.created_at),
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct EnrolleeTermResolver;

impl TermResolver for EnrolleeTermResolver {
    fn name(&self) -> &'static str {
        "enrollee"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PREFIX) || variable == ENROLLED_DATE
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        if variable == ENROLLED_DATE {
            return Ok(FieldTerm::computed(
                variable,
                SearchValueKind::Date,
                |dialect: SqlDialect| dialect.date_of(SqlFragment::raw("enrollee.created_at")),
                |ctx| Some(SearchValue::Date(ctx.enrollee.created_at.date_naive())),
            )
            .shared());
        }

        let field = variable
            .strip_prefix(PREFIX)
            .and_then(|name| ENROLLEE_FIELDS.iter().find(|f| f.name == name))
            .ok_or_else(|| unknown_variable(variable))?;
        // Base table columns are already part of every result row.
        let qualified = format!("enrollee.{}", field.column);
        let read = field.read;
        Ok(FieldTerm::computed(
            variable,
            field.kind,
            move |_: SqlDialect| SqlFragment::raw(qualified.clone()),
            move |ctx| Some(read(&ctx.enrollee)),
        )
        .shared())
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        let mut facets: BTreeMap<_, _> = ENROLLEE_FIELDS
            .iter()
            .map(|f| {
                (
                    format!("{}{}", PREFIX, f.name),
                    SearchValueTypeDefinition::of(f.kind),
                )
            })
            .collect();
        facets.insert(
            ENROLLED_DATE.to_string(),
            SearchValueTypeDefinition::of(SearchValueKind::Date)
                .with_description("Date the enrollee joined the study"),
        );
        facets
    }
}
