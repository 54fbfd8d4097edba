//! `age`: whole years since the profile birth date.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};

use crate::error::ExpressionResult;
use crate::model::StudyEnvironmentCatalog;
use crate::sql::SqlDialect;
use crate::value::{SearchValue, SearchValueKind, SearchValueTypeDefinition};

use super::profile::profile_join;
use super::registry::{TermResolver, unknown_variable};
use super::{FieldTerm, SearchTerm};

const VARIABLE: &str = "age";

/// Age in completed years on `today`.
pub fn age_on(birth_date: NaiveDate, today: NaiveDate) -> i32 {
    let before_birthday = (today.month(), today.day()) < (birth_date.month(), birth_date.day());
    today.year() - birth_date.year() - i32::from(before_birthday)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AgeTermResolver;

impl TermResolver for AgeTermResolver {
    fn name(&self) -> &'static str {
        "age"
    }

    fn matches(&self, variable: &str) -> bool {
        variable == VARIABLE
    }

    fn resolve_variable(&self, variable: &str) -> ExpressionResult<Arc<dyn SearchTerm>> {
        if variable != VARIABLE {
            return Err(unknown_variable(variable));
        }
        Ok(FieldTerm::computed(
            variable,
            SearchValueKind::Number,
            |dialect: SqlDialect| dialect.age_in_years("profile.birth_date"),
            |ctx| {
                let birth_date = ctx.profile.as_ref()?.birth_date?;
                let today = Utc::now().date_naive();
                Some(SearchValue::Number(f64::from(age_on(birth_date, today))))
            },
        )
        .with_join(profile_join())
        .shared())
    }

    fn facets(
        &self,
        _catalog: &StudyEnvironmentCatalog,
    ) -> BTreeMap<String, SearchValueTypeDefinition> {
        BTreeMap::from([(
            VARIABLE.to_string(),
            SearchValueTypeDefinition::of(SearchValueKind::Number)
                .with_description("Age in years, from the profile birth date"),
        )])
    }
}
