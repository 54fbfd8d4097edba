//! Assembly of the final enrollee search statement.

use crate::model::StudyEnvironmentId;
use crate::term::profile::profile_join;
use crate::value::SearchValueKind;

use super::clause::{SelectClause, SqlSearch};
use super::dialect::SqlDialect;
use super::fragment::{SqlFragment, SqlParam, SqlQuery};
use super::row::ColumnType;

/// Columns of the `enrollee` table, in the order the store decodes them.
pub const ENROLLEE_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("shortcode", ColumnType::Text),
    ("study_environment_id", ColumnType::Text),
    ("participant_user_id", ColumnType::Text),
    ("profile_id", ColumnType::Text),
    ("subject", ColumnType::Bool),
    ("consented", ColumnType::Bool),
    ("created_at", ColumnType::Timestamp),
];

/// Display columns returned with every row, right after the enrollee columns.
pub fn display_selects() -> [SelectClause; 2] {
    [
        SelectClause::new("profile", "given_name", SearchValueKind::String),
        SelectClause::new("profile", "family_name", SearchValueKind::String),
    ]
}

/// A rendered search statement plus what is needed to decode its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrolleeSearchQuery {
    pub query: SqlQuery,
    /// Every select after the enrollee columns, display columns first.
    pub selects: Vec<SelectClause>,
    /// Expected type of every result column.
    pub columns: Vec<ColumnType>,
}

/// Builds the environment-scoped SELECT around a compiled [`SqlSearch`].
#[derive(Debug, Clone)]
pub struct EnrolleeQueryBuilder<'a> {
    study_env: &'a StudyEnvironmentId,
    dialect: SqlDialect,
    limit: Option<usize>,
}

impl<'a> EnrolleeQueryBuilder<'a> {
    pub fn new(study_env: &'a StudyEnvironmentId, dialect: SqlDialect) -> Self {
        Self {
            study_env,
            dialect,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn build(&self, search: &SqlSearch) -> EnrolleeSearchQuery {
        let mut scoped = SqlSearch::new(search.condition().clone());
        scoped.add_join(profile_join());
        for join in search.joins() {
            scoped.add_join(join.clone());
        }
        for select in display_selects() {
            scoped.add_select(select);
        }
        for select in search.selects() {
            scoped.add_select(select.clone());
        }

        let mut columns: Vec<String> = ENROLLEE_COLUMNS
            .iter()
            .map(|(name, _)| format!("enrollee.{}", name))
            .collect();
        columns.extend(scoped.selects().iter().map(SelectClause::to_sql));

        let mut fragment = SqlFragment::raw(format!(
            "SELECT DISTINCT {} FROM enrollee",
            columns.join(", ")
        ));
        for join in scoped.joins() {
            fragment.push_sql(" ").append(join.to_fragment());
        }
        fragment
            .push_sql(" WHERE enrollee.study_environment_id = ")
            .push_param(SqlParam::Text(self.study_env.as_str().to_string()))
            .push_sql(" AND (")
            .append(scoped.condition().to_fragment())
            .push_sql(") ORDER BY enrollee.created_at DESC, enrollee.id");
        if let Some(limit) = self.limit {
            fragment.push_sql(&format!(" LIMIT {}", limit));
        }

        let column_types = ENROLLEE_COLUMNS
            .iter()
            .map(|(_, column_type)| *column_type)
            .chain(scoped.selects().iter().map(SelectClause::column_type))
            .collect();

        EnrolleeSearchQuery {
            query: fragment.render(self.dialect),
            selects: scoped.selects().to_vec(),
            columns: column_types,
        }
    }
}
