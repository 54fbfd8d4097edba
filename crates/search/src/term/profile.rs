//! `profile.*` variables: personal details and mailing address.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::EnrolleeSearchContext;
use crate::error::ExpressionResult;
use crate::model::{MailingAddress, Profile, StudyEnvironmentCatalog};
use crate::sql::{JoinClause, SqlDialect, SqlFragment};
use crate::value::{FacetChoice, SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const PREFIX: &str = "profile.";
const MAILING_PREFIX: &str = "mailingAddress.";

/// The join every enrollee query carries for display names.
pub fn profile_join() -> JoinClause {
    JoinClause::left(
        "profile",
        "profile",
        SqlFragment::raw("profile.id = enrollee.profile_id"),
    )
}

fn mailing_address_join() -> JoinClause {
    JoinClause::left(
        "mailing_address",
        "mailing_address",
        SqlFragment::raw("mailing_address.id = profile.mailing_address_id"),
    )
}

struct ProfileField {
    name: &'static str,
    column: &'static str,
    kind: SearchValueKind,
    read: fn(&Profile) -> Option<SearchValue>,
}

const PROFILE_FIELDS: &[ProfileField] = &[
    ProfileField {
        name: "givenName",
        column: "given_name",
        kind: SearchValueKind::String,
        read: |p| p.given_name.clone().map(SearchValue::String),
    },
    ProfileField {
        name: "familyName",
        column: "family_name",
        kind: SearchValueKind::String,
        read: |p| p.family_name.clone().map(SearchValue::String),
    },
    ProfileField {
        name: "birthDate",
        column: "birth_date",
        kind: SearchValueKind::Date,
        read: |p| p.birth_date.map(SearchValue::Date),
    },
    ProfileField {
        name: "contactEmail",
        column: "contact_email",
        kind: SearchValueKind::String,
        read: |p| p.contact_email.clone().map(SearchValue::String),
    },
    ProfileField {
        name: "phoneNumber",
        column: "phone_number",
        kind: SearchValueKind::String,
        read: |p| p.phone_number.clone().map(SearchValue::String),
    },
    ProfileField {
        name: "doNotEmail",
        column: "do_not_email",
        kind: SearchValueKind::Boolean,
        read: |p| Some(SearchValue::Boolean(p.do_not_email)),
    },
    ProfileField {
        name: "sexAtBirth",
        column: "sex_at_birth",
        kind: SearchValueKind::String,
        read: |p| p.sex_at_birth.clone().map(SearchValue::String),
    },
];

struct AddressField {
    name: &'static str,
    column: &'static str,
    read: fn(&MailingAddress) -> Option<String>,
}

const ADDRESS_FIELDS: &[AddressField] = &[
    AddressField {
        name: "street1",
        column: "street1",
        read: |a| a.street1.clone(),
    },
    AddressField {
        name: "city",
        column: "city",
        read: |a| a.city.clone(),
    },
    AddressField {
        name: "state",
        column: "state",
        read: |a| a.state.clone(),
    },
    AddressField {
        name: "postalCode",
        column: "postal_code",
        read: |a| a.postal_code.clone(),
    },
    AddressField {
        name: "country",
        column: "country",
        read: |a| a.country.clone(),
    },
];

const SEX_AT_BIRTH: &[&str] = &["male", "female", "intersex", "unknown"];

/// Given and family name joined by a space, with missing parts dropped.
fn full_name(context: &EnrolleeSearchContext) -> String {
    let profile = context.profile.as_ref();
    let given = profile.and_then(|p| p.given_name.as_deref()).unwrap_or("");
    let family = profile.and_then(|p| p.family_name.as_deref()).unwrap_or("");
    format!("{} {}", given, family).trim_matches(' ').to_string()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileTermResolver;

impl TermResolver for ProfileTermResolver {
    fn name(&self) -> &'static str {
        "profile"
    }

    fn matches(&self, variable: &str) -> bool {
        variable.starts_with(PREFIX)
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        let field = variable
            .strip_prefix(PREFIX)
            .ok_or_else(|| unknown_variable(variable))?;

        if field == "name" {
            return Ok(FieldTerm::computed(
                variable,
                SearchValueKind::String,
                |_: SqlDialect| {
                    SqlFragment::raw(
                        "TRIM(COALESCE(profile.given_name, '') || ' ' || COALESCE(profile.family_name, ''))",
                    )
                },
                |ctx| Some(SearchValue::String(full_name(ctx))),
            )
            .with_join(profile_join())
            .shared());
        }

        if let Some(address_field) = field.strip_prefix(MAILING_PREFIX) {
            let spec = ADDRESS_FIELDS
                .iter()
                .find(|f| f.name == address_field)
                .ok_or_else(|| unknown_variable(variable))?;
            let read = spec.read;
            return Ok(FieldTerm::column(
                variable,
                SearchValueKind::String,
                "mailing_address",
                spec.column,
                move |ctx| {
                    ctx.mailing_address
                        .as_ref()
                        .and_then(read)
                        .map(SearchValue::String)
                },
            )
            .with_join(profile_join())
            .with_join(mailing_address_join())
            .shared());
        }

        let spec = PROFILE_FIELDS
            .iter()
            .find(|f| f.name == field)
            .ok_or_else(|| unknown_variable(variable))?;
        let read = spec.read;
        Ok(
            FieldTerm::column(variable, spec.kind, "profile", spec.column, move |ctx| {
                ctx.profile.as_ref().and_then(read)
            })
            .with_join(profile_join())
            .shared(),
        )
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        let mut facets = BTreeMap::new();
        for field in PROFILE_FIELDS {
            let mut definition = SearchValueTypeDefinition::of(field.kind);
            if field.name == "sexAtBirth" {
                definition = definition
                    .with_choices(SEX_AT_BIRTH.iter().map(|s| FacetChoice::plain(*s)).collect());
            }
            facets.insert(format!("{}{}", PREFIX, field.name), definition);
        }
        facets.insert(
            format!("{}name", PREFIX),
            SearchValueTypeDefinition::of(SearchValueKind::String)
                .with_description("Given and family name"),
        );
        for field in ADDRESS_FIELDS {
            facets.insert(
                format!("{}{}{}", PREFIX, MAILING_PREFIX, field.name),
                SearchValueTypeDefinition::of(SearchValueKind::String),
            );
        }
        facets
    }
}
