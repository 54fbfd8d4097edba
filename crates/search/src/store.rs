//! Participant data access on top of a minimal SQL executor.
//!
//! [`SqlExecutor`] is the only seam a database backend has to implement: run a
//! rendered [`SqlQuery`] and hand back decoded rows. Everything else, loading
//! evaluation contexts, the facet catalog, search rows and record writes, is
//! plain SQL built with the same fragment machinery the compiler uses, so it
//! works unchanged on every backend.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::context::{EnrolleeSearchContext, FamilyMembership};
use crate::error::{BackendError, BackendResult};
use crate::model::{
    Answer, Enrollee, EnrolleeRelation, Family, FamilyEnrollee, KitRequest, MailingAddress,
    ParticipantTask, ParticipantUser, PortalParticipantUser, Profile, QuestionDefinition,
    StudyEnvironmentCatalog, StudyEnvironmentId,
};
use crate::sql::{
    ColumnType, ENROLLEE_COLUMNS, EnrolleeSearchQuery, SelectClause, SqlDialect, SqlFragment,
    SqlParam, SqlQuery, SqlRow,
};
use crate::value::{FacetChoice, SearchValue};

/// Runs rendered statements against one database.
#[async_trait]
pub trait SqlExecutor: Send + Sync + fmt::Debug {
    /// The dialect statements must be rendered in.
    fn dialect(&self) -> SqlDialect;

    /// Runs a query and decodes every row with the given column types.
    ///
    /// When `timeout` elapses the running statement is cancelled and
    /// [`BackendError::Timeout`] is returned.
    async fn query(
        &self,
        query: &SqlQuery,
        columns: &[ColumnType],
        timeout: Option<Duration>,
    ) -> BackendResult<Vec<SqlRow>>;

    /// Runs a statement that returns no rows. Returns the affected row count.
    async fn execute(&self, statement: &SqlQuery) -> BackendResult<u64>;
}

#[async_trait]
impl<E: SqlExecutor + ?Sized> SqlExecutor for Arc<E> {
    fn dialect(&self) -> SqlDialect {
        (**self).dialect()
    }

    async fn query(
        &self,
        query: &SqlQuery,
        columns: &[ColumnType],
        timeout: Option<Duration>,
    ) -> BackendResult<Vec<SqlRow>> {
        (**self).query(query, columns, timeout).await
    }

    async fn execute(&self, statement: &SqlQuery) -> BackendResult<u64> {
        (**self).execute(statement).await
    }
}

/// One matched enrollee of a compiled search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolleeSearchRow {
    pub enrollee: Enrollee,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Every selected column keyed by `alias__column`.
    pub fields: BTreeMap<String, Option<SearchValue>>,
}

const PROFILE_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("given_name", ColumnType::Text),
    ("family_name", ColumnType::Text),
    ("birth_date", ColumnType::Date),
    ("contact_email", ColumnType::Text),
    ("phone_number", ColumnType::Text),
    ("do_not_email", ColumnType::Bool),
    ("sex_at_birth", ColumnType::Text),
    ("mailing_address_id", ColumnType::Text),
];

const MAILING_ADDRESS_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("street1", ColumnType::Text),
    ("city", ColumnType::Text),
    ("state", ColumnType::Text),
    ("postal_code", ColumnType::Text),
    ("country", ColumnType::Text),
];

const PARTICIPANT_USER_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("username", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
    ("last_login", ColumnType::Timestamp),
];

const PORTAL_USER_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("participant_user_id", ColumnType::Text),
    ("profile_id", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
    ("last_login", ColumnType::Timestamp),
];

const ANSWER_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("enrollee_id", ColumnType::Text),
    ("survey_stable_id", ColumnType::Text),
    ("question_stable_id", ColumnType::Text),
    ("string_value", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const TASK_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("enrollee_id", ColumnType::Text),
    ("target_stable_id", ColumnType::Text),
    ("task_type", ColumnType::Text),
    ("status", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const KIT_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("enrollee_id", ColumnType::Text),
    ("kit_type", ColumnType::Text),
    ("status", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const FAMILY_ENROLLEE_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("family_id", ColumnType::Text),
    ("enrollee_id", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const FAMILY_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("shortcode", ColumnType::Text),
    ("study_environment_id", ColumnType::Text),
    ("proband_enrollee_id", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const RELATION_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("enrollee_id", ColumnType::Text),
    ("target_enrollee_id", ColumnType::Text),
    ("relationship_type", ColumnType::Text),
    ("created_at", ColumnType::Timestamp),
];

const QUESTION_COLUMNS: &[(&str, ColumnType)] = &[
    ("id", ColumnType::Text),
    ("study_environment_id", ColumnType::Text),
    ("survey_stable_id", ColumnType::Text),
    ("question_stable_id", ColumnType::Text),
    ("question_text", ColumnType::Text),
    ("choices", ColumnType::Text),
];

fn select_list(alias: &str, columns: &[(&str, ColumnType)]) -> String {
    columns
        .iter()
        .map(|(name, _)| format!("{}.{}", alias, name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_types<'a>(groups: impl IntoIterator<Item = &'a [(&'a str, ColumnType)]>) -> Vec<ColumnType> {
    groups
        .into_iter()
        .flat_map(|columns| columns.iter().map(|(_, column_type)| *column_type))
        .collect()
}

fn parse_enum<T: std::str::FromStr<Err = String>>(row: &SqlRow, index: usize) -> BackendResult<T> {
    row.text(index)?
        .parse()
        .map_err(|message| BackendError::Decode {
            column: index,
            message,
        })
}

fn decode_enrollee(row: &SqlRow, at: usize) -> BackendResult<Enrollee> {
    Ok(Enrollee {
        id: row.text(at)?,
        shortcode: row.text(at + 1)?,
        study_environment_id: StudyEnvironmentId::new(row.text(at + 2)?),
        participant_user_id: row.opt_text(at + 3)?,
        profile_id: row.opt_text(at + 4)?,
        subject: row.bool(at + 5)?,
        consented: row.bool(at + 6)?,
        created_at: row.timestamp(at + 7)?,
    })
}

fn decode_profile(row: &SqlRow) -> BackendResult<Profile> {
    Ok(Profile {
        id: row.text(0)?,
        given_name: row.opt_text(1)?,
        family_name: row.opt_text(2)?,
        birth_date: row.opt_date(3)?,
        contact_email: row.opt_text(4)?,
        phone_number: row.opt_text(5)?,
        do_not_email: row.opt_bool(6)?.unwrap_or(false),
        sex_at_birth: row.opt_text(7)?,
        mailing_address_id: row.opt_text(8)?,
    })
}

fn decode_mailing_address(row: &SqlRow) -> BackendResult<MailingAddress> {
    Ok(MailingAddress {
        id: row.text(0)?,
        street1: row.opt_text(1)?,
        city: row.opt_text(2)?,
        state: row.opt_text(3)?,
        postal_code: row.opt_text(4)?,
        country: row.opt_text(5)?,
    })
}

fn decode_participant_user(row: &SqlRow) -> BackendResult<ParticipantUser> {
    Ok(ParticipantUser {
        id: row.text(0)?,
        username: row.text(1)?,
        created_at: row.timestamp(2)?,
        last_login: row.opt_timestamp(3)?,
    })
}

fn decode_portal_user(row: &SqlRow) -> BackendResult<PortalParticipantUser> {
    Ok(PortalParticipantUser {
        id: row.text(0)?,
        participant_user_id: row.text(1)?,
        profile_id: row.opt_text(2)?,
        created_at: row.timestamp(3)?,
        last_login: row.opt_timestamp(4)?,
    })
}

fn decode_answer(row: &SqlRow) -> BackendResult<Answer> {
    Ok(Answer {
        id: row.text(0)?,
        enrollee_id: row.text(1)?,
        survey_stable_id: row.text(2)?,
        question_stable_id: row.text(3)?,
        string_value: row.opt_text(4)?,
        created_at: row.timestamp(5)?,
    })
}

fn decode_task(row: &SqlRow) -> BackendResult<ParticipantTask> {
    Ok(ParticipantTask {
        id: row.text(0)?,
        enrollee_id: row.text(1)?,
        target_stable_id: row.text(2)?,
        task_type: row.text(3)?,
        status: parse_enum(row, 4)?,
        created_at: row.timestamp(5)?,
    })
}

fn decode_kit(row: &SqlRow) -> BackendResult<KitRequest> {
    Ok(KitRequest {
        id: row.text(0)?,
        enrollee_id: row.text(1)?,
        kit_type: row.text(2)?,
        status: parse_enum(row, 3)?,
        created_at: row.timestamp(4)?,
    })
}

fn decode_membership(row: &SqlRow) -> BackendResult<FamilyMembership> {
    let at = FAMILY_ENROLLEE_COLUMNS.len();
    Ok(FamilyMembership {
        membership: FamilyEnrollee {
            id: row.text(0)?,
            family_id: row.text(1)?,
            enrollee_id: row.text(2)?,
            created_at: row.timestamp(3)?,
        },
        family: Family {
            id: row.text(at)?,
            shortcode: row.text(at + 1)?,
            study_environment_id: StudyEnvironmentId::new(row.text(at + 2)?),
            proband_enrollee_id: row.opt_text(at + 3)?,
            created_at: row.timestamp(at + 4)?,
        },
    })
}

fn decode_relation(row: &SqlRow) -> BackendResult<EnrolleeRelation> {
    Ok(EnrolleeRelation {
        id: row.text(0)?,
        enrollee_id: row.text(1)?,
        target_enrollee_id: row.text(2)?,
        relationship_type: parse_enum(row, 3)?,
        created_at: row.timestamp(4)?,
    })
}

fn decode_question(row: &SqlRow) -> BackendResult<QuestionDefinition> {
    let choices = match row.opt_text(5)? {
        Some(json) => serde_json::from_str::<Vec<FacetChoice>>(&json).map_err(|e| {
            BackendError::Decode {
                column: 5,
                message: format!("invalid choices JSON: {}", e),
            }
        })?,
        None => Vec::new(),
    };
    Ok(QuestionDefinition {
        id: row.text(0)?,
        study_environment_id: StudyEnvironmentId::new(row.text(1)?),
        survey_stable_id: row.text(2)?,
        question_stable_id: row.text(3)?,
        question_text: row.opt_text(4)?,
        choices,
    })
}

fn decode_search_row(row: &SqlRow, selects: &[SelectClause]) -> BackendResult<EnrolleeSearchRow> {
    let base = ENROLLEE_COLUMNS.len();
    let enrollee = decode_enrollee(row, 0)?;
    // Display columns always lead the selects.
    let given_name = row.opt_text(base)?;
    let family_name = row.opt_text(base + 1)?;
    let mut fields = BTreeMap::new();
    for (i, select) in selects.iter().enumerate() {
        fields.insert(select.label(), row.search_value(base + i, select.kind)?);
    }
    Ok(EnrolleeSearchRow {
        enrollee,
        given_name,
        family_name,
        fields,
    })
}

/// Which enrollees a context load covers.
#[derive(Debug, Clone, Copy)]
enum EnrolleeScope<'a> {
    One(&'a str),
    Environment(&'a StudyEnvironmentId),
}

impl EnrolleeScope<'_> {
    fn condition(&self, alias: &str) -> SqlFragment {
        match self {
            EnrolleeScope::One(id) => {
                let mut fragment = SqlFragment::raw(format!("{}.id = ", alias));
                fragment.push_param(SqlParam::Text(id.to_string()));
                fragment
            }
            EnrolleeScope::Environment(env) => {
                let mut fragment = SqlFragment::raw(format!("{}.study_environment_id = ", alias));
                fragment.push_param(SqlParam::Text(env.as_str().to_string()));
                fragment
            }
        }
    }

    /// `SELECT e.<column> FROM enrollee e WHERE ...`, for use inside `IN (...)`.
    fn enrollee_column(&self, column: &str) -> SqlFragment {
        let mut fragment = SqlFragment::raw(format!("SELECT e.{} FROM enrollee e WHERE ", column));
        fragment.append(self.condition("e"));
        fragment
    }
}

fn group_by_enrollee<T>(records: Vec<T>, key: impl Fn(&T) -> &str) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for record in records {
        grouped.entry(key(&record).to_string()).or_default().push(record);
    }
    grouped
}

/// Files each relation under both of its enrollees.
fn group_relations(relations: Vec<EnrolleeRelation>) -> HashMap<String, Vec<EnrolleeRelation>> {
    let mut grouped: HashMap<String, Vec<EnrolleeRelation>> = HashMap::new();
    for relation in relations {
        if relation.target_enrollee_id != relation.enrollee_id {
            grouped
                .entry(relation.target_enrollee_id.clone())
                .or_default()
                .push(relation.clone());
        }
        grouped.entry(relation.enrollee_id.clone()).or_default().push(relation);
    }
    grouped
}

/// The earliest portal registration per profile. `portal_users` arrive
/// oldest first.
fn first_portal_user_by_profile(
    portal_users: Vec<PortalParticipantUser>,
) -> HashMap<String, PortalParticipantUser> {
    let mut first: HashMap<String, PortalParticipantUser> = HashMap::new();
    for portal_user in portal_users {
        if let Some(profile_id) = portal_user.profile_id.clone() {
            first.entry(profile_id).or_insert(portal_user);
        }
    }
    first
}

/// Reads participant data through any [`SqlExecutor`].
#[derive(Debug, Clone)]
pub struct ParticipantStore<E> {
    executor: E,
}

impl<E: SqlExecutor> ParticipantStore<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn dialect(&self) -> SqlDialect {
        self.executor.dialect()
    }

    /// A writer sharing this store's executor.
    pub fn writer(&self) -> ParticipantWriter<'_, E> {
        ParticipantWriter {
            executor: &self.executor,
        }
    }

    async fn fetch<T>(
        &self,
        fragment: SqlFragment,
        columns: Vec<ColumnType>,
        decode: impl Fn(&SqlRow) -> BackendResult<T>,
    ) -> BackendResult<Vec<T>> {
        let query = fragment.render(self.dialect());
        trace!(sql = %query.sql, params = query.params.len(), "Loading participant rows");
        let rows = self.executor.query(&query, &columns, None).await?;
        rows.iter().map(decode).collect()
    }

    /// Rows of `table` whose `key` column is in the scope's `source` column.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_related<T>(
        &self,
        table: &str,
        columns: &[(&str, ColumnType)],
        key: &str,
        scope: EnrolleeScope<'_>,
        source: &str,
        order_by: &str,
        decode: impl Fn(&SqlRow) -> BackendResult<T>,
    ) -> BackendResult<Vec<T>> {
        let mut fragment = SqlFragment::raw(format!(
            "SELECT {} FROM {} t WHERE t.{} IN (",
            select_list("t", columns),
            table,
            key
        ));
        fragment
            .append(scope.enrollee_column(source))
            .push_sql(&format!(") ORDER BY {}", order_by));
        self.fetch(fragment, column_types([columns]), decode).await
    }

    /// Loads the evaluation context of one enrollee, or `None` if it does not
    /// exist.
    pub async fn load_context(
        &self,
        enrollee_id: &str,
    ) -> BackendResult<Option<EnrolleeSearchContext>> {
        let mut contexts = self.load_scope(EnrolleeScope::One(enrollee_id)).await?;
        Ok(contexts.pop())
    }

    /// Loads the context of every enrollee in an environment, newest first.
    pub async fn load_contexts(
        &self,
        study_env: &StudyEnvironmentId,
    ) -> BackendResult<Vec<EnrolleeSearchContext>> {
        self.load_scope(EnrolleeScope::Environment(study_env)).await
    }

    async fn load_scope(&self, scope: EnrolleeScope<'_>) -> BackendResult<Vec<EnrolleeSearchContext>> {
        let started = Instant::now();

        let mut fragment = SqlFragment::raw(format!(
            "SELECT {} FROM enrollee e WHERE ",
            select_list("e", ENROLLEE_COLUMNS)
        ));
        fragment
            .append(scope.condition("e"))
            .push_sql(" ORDER BY e.created_at DESC, e.id");
        let enrollees = self
            .fetch(fragment, column_types([ENROLLEE_COLUMNS]), |row| {
                decode_enrollee(row, 0)
            })
            .await?;
        if enrollees.is_empty() {
            return Ok(Vec::new());
        }

        let profiles = self
            .fetch_related("profile", PROFILE_COLUMNS, "id", scope, "profile_id", "t.id", decode_profile)
            .await?;

        let mut fragment = SqlFragment::raw(format!(
            "SELECT {} FROM mailing_address t WHERE t.id IN \
             (SELECT p.mailing_address_id FROM profile p WHERE p.id IN (",
            select_list("t", MAILING_ADDRESS_COLUMNS)
        ));
        fragment
            .append(scope.enrollee_column("profile_id"))
            .push_sql("))");
        let addresses = self
            .fetch(
                fragment,
                column_types([MAILING_ADDRESS_COLUMNS]),
                decode_mailing_address,
            )
            .await?;

        let users = self
            .fetch_related(
                "participant_user",
                PARTICIPANT_USER_COLUMNS,
                "id",
                scope,
                "participant_user_id",
                "t.id",
                decode_participant_user,
            )
            .await?;
        let portal_users = self
            .fetch_related(
                "portal_participant_user",
                PORTAL_USER_COLUMNS,
                "profile_id",
                scope,
                "profile_id",
                "t.created_at, t.id",
                decode_portal_user,
            )
            .await?;
        let answers = self
            .fetch_related(
                "answer",
                ANSWER_COLUMNS,
                "enrollee_id",
                scope,
                "id",
                "t.survey_stable_id, t.question_stable_id",
                decode_answer,
            )
            .await?;
        let tasks = self
            .fetch_related(
                "participant_task",
                TASK_COLUMNS,
                "enrollee_id",
                scope,
                "id",
                "t.created_at, t.id",
                decode_task,
            )
            .await?;
        let kits = self
            .fetch_related(
                "kit_request",
                KIT_COLUMNS,
                "enrollee_id",
                scope,
                "id",
                "t.created_at, t.id",
                decode_kit,
            )
            .await?;

        let mut fragment = SqlFragment::raw(format!(
            "SELECT {}, {} FROM family_enrollee fe JOIN family f ON f.id = fe.family_id \
             WHERE fe.enrollee_id IN (",
            select_list("fe", FAMILY_ENROLLEE_COLUMNS),
            select_list("f", FAMILY_COLUMNS)
        ));
        fragment
            .append(scope.enrollee_column("id"))
            .push_sql(") ORDER BY fe.created_at, fe.id");
        let memberships = self
            .fetch(
                fragment,
                column_types([FAMILY_ENROLLEE_COLUMNS, FAMILY_COLUMNS]),
                decode_membership,
            )
            .await?;

        let mut fragment = SqlFragment::raw(format!(
            "SELECT {} FROM enrollee_relation t WHERE t.enrollee_id IN (",
            select_list("t", RELATION_COLUMNS)
        ));
        fragment
            .append(scope.enrollee_column("id"))
            .push_sql(") OR t.target_enrollee_id IN (")
            .append(scope.enrollee_column("id"))
            .push_sql(") ORDER BY t.created_at, t.id");
        let relations = self
            .fetch(fragment, column_types([RELATION_COLUMNS]), decode_relation)
            .await?;

        let profiles: HashMap<String, Profile> =
            profiles.into_iter().map(|p| (p.id.clone(), p)).collect();
        let addresses: HashMap<String, MailingAddress> =
            addresses.into_iter().map(|a| (a.id.clone(), a)).collect();
        let users: HashMap<String, ParticipantUser> =
            users.into_iter().map(|u| (u.id.clone(), u)).collect();
        let mut answers = group_by_enrollee(answers, |a| a.enrollee_id.as_str());
        let mut tasks = group_by_enrollee(tasks, |t| t.enrollee_id.as_str());
        let mut kits = group_by_enrollee(kits, |k| k.enrollee_id.as_str());
        let mut memberships = group_by_enrollee(memberships, |m| m.membership.enrollee_id.as_str());
        let portal_users = first_portal_user_by_profile(portal_users);
        let mut relations = group_relations(relations);

        let contexts: Vec<EnrolleeSearchContext> = enrollees
            .into_iter()
            .map(|enrollee| {
                let id = enrollee.id.clone();
                let profile = enrollee
                    .profile_id
                    .as_ref()
                    .and_then(|pid| profiles.get(pid))
                    .cloned();
                let mailing_address = profile
                    .as_ref()
                    .and_then(|p| p.mailing_address_id.as_ref())
                    .and_then(|aid| addresses.get(aid))
                    .cloned();
                let participant_user = enrollee
                    .participant_user_id
                    .as_ref()
                    .and_then(|uid| users.get(uid))
                    .cloned();
                let portal_participant_user = enrollee
                    .profile_id
                    .as_ref()
                    .and_then(|pid| portal_users.get(pid))
                    .cloned();
                EnrolleeSearchContext {
                    profile,
                    mailing_address,
                    participant_user,
                    portal_participant_user,
                    answers: answers.remove(&id).unwrap_or_default(),
                    tasks: tasks.remove(&id).unwrap_or_default(),
                    kit_requests: kits.remove(&id).unwrap_or_default(),
                    family_memberships: memberships.remove(&id).unwrap_or_default(),
                    relations: relations.remove(&id).unwrap_or_default(),
                    enrollee,
                }
            })
            .collect();

        debug!(
            enrollees = contexts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded search contexts"
        );
        Ok(contexts)
    }

    /// Loads the metadata facets are generated from.
    pub async fn catalog(
        &self,
        study_env: &StudyEnvironmentId,
    ) -> BackendResult<StudyEnvironmentCatalog> {
        let mut fragment = SqlFragment::raw(format!(
            "SELECT {} FROM survey_question_definition q WHERE q.study_environment_id = ",
            select_list("q", QUESTION_COLUMNS)
        ));
        fragment
            .push_param(SqlParam::Text(study_env.as_str().to_string()))
            .push_sql(" ORDER BY q.survey_stable_id, q.question_stable_id");
        let questions = self
            .fetch(fragment, column_types([QUESTION_COLUMNS]), decode_question)
            .await?;

        let mut fragment = SqlFragment::raw(
            "SELECT DISTINCT t.target_stable_id FROM participant_task t \
             JOIN enrollee e ON e.id = t.enrollee_id WHERE e.study_environment_id = ",
        );
        fragment
            .push_param(SqlParam::Text(study_env.as_str().to_string()))
            .push_sql(" ORDER BY t.target_stable_id");
        let task_targets = self
            .fetch(fragment, vec![ColumnType::Text], |row| row.text(0))
            .await?;

        Ok(StudyEnvironmentCatalog {
            questions,
            task_targets,
        })
    }

    /// Runs a compiled search.
    pub async fn search(
        &self,
        query: &EnrolleeSearchQuery,
        timeout: Option<Duration>,
    ) -> BackendResult<Vec<EnrolleeSearchRow>> {
        let rows = self
            .executor
            .query(&query.query, &query.columns, timeout)
            .await?;
        rows.iter()
            .map(|row| decode_search_row(row, &query.selects))
            .collect()
    }
}

/// Inserts participant records.
///
/// Records with an empty id get a fresh UUID; every `save_*` returns the id
/// that was stored.
#[derive(Debug, Clone, Copy)]
pub struct ParticipantWriter<'a, E> {
    executor: &'a E,
}

fn record_id(id: &str) -> String {
    if id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        id.to_string()
    }
}

impl<E: SqlExecutor> ParticipantWriter<'_, E> {
    async fn insert(&self, table: &str, values: Vec<(&str, SqlParam)>) -> BackendResult<()> {
        let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
        let mut fragment = SqlFragment::raw(format!(
            "INSERT INTO {} ({}) VALUES (",
            table,
            columns.join(", ")
        ));
        fragment
            .append(SqlFragment::join(
                values.into_iter().map(|(_, value)| SqlFragment::param(value)),
                ", ",
            ))
            .push_sql(")");
        let statement = fragment.render(self.executor.dialect());
        self.executor.execute(&statement).await?;
        trace!(table, "Inserted participant record");
        Ok(())
    }

    pub async fn save_participant_user(&self, user: &ParticipantUser) -> BackendResult<String> {
        let id = record_id(&user.id);
        self.insert(
            "participant_user",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("username", SqlParam::Text(user.username.clone())),
                ("created_at", SqlParam::Timestamp(user.created_at)),
                ("last_login", SqlParam::opt_timestamp(user.last_login)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_mailing_address(&self, address: &MailingAddress) -> BackendResult<String> {
        let id = record_id(&address.id);
        self.insert(
            "mailing_address",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("street1", SqlParam::opt_text(address.street1.as_deref())),
                ("city", SqlParam::opt_text(address.city.as_deref())),
                ("state", SqlParam::opt_text(address.state.as_deref())),
                ("postal_code", SqlParam::opt_text(address.postal_code.as_deref())),
                ("country", SqlParam::opt_text(address.country.as_deref())),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_profile(&self, profile: &Profile) -> BackendResult<String> {
        let id = record_id(&profile.id);
        self.insert(
            "profile",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("given_name", SqlParam::opt_text(profile.given_name.as_deref())),
                ("family_name", SqlParam::opt_text(profile.family_name.as_deref())),
                ("birth_date", SqlParam::opt_date(profile.birth_date)),
                ("contact_email", SqlParam::opt_text(profile.contact_email.as_deref())),
                ("phone_number", SqlParam::opt_text(profile.phone_number.as_deref())),
                ("do_not_email", SqlParam::Bool(profile.do_not_email)),
                ("sex_at_birth", SqlParam::opt_text(profile.sex_at_birth.as_deref())),
                (
                    "mailing_address_id",
                    SqlParam::opt_text(profile.mailing_address_id.as_deref()),
                ),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_portal_participant_user(
        &self,
        portal_user: &PortalParticipantUser,
    ) -> BackendResult<String> {
        let id = record_id(&portal_user.id);
        self.insert(
            "portal_participant_user",
            vec![
                ("id", SqlParam::Text(id.clone())),
                (
                    "participant_user_id",
                    SqlParam::Text(portal_user.participant_user_id.clone()),
                ),
                ("profile_id", SqlParam::opt_text(portal_user.profile_id.as_deref())),
                ("created_at", SqlParam::Timestamp(portal_user.created_at)),
                ("last_login", SqlParam::opt_timestamp(portal_user.last_login)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_enrollee(&self, enrollee: &Enrollee) -> BackendResult<String> {
        let id = record_id(&enrollee.id);
        self.insert(
            "enrollee",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("shortcode", SqlParam::Text(enrollee.shortcode.clone())),
                (
                    "study_environment_id",
                    SqlParam::Text(enrollee.study_environment_id.as_str().to_string()),
                ),
                (
                    "participant_user_id",
                    SqlParam::opt_text(enrollee.participant_user_id.as_deref()),
                ),
                ("profile_id", SqlParam::opt_text(enrollee.profile_id.as_deref())),
                ("subject", SqlParam::Bool(enrollee.subject)),
                ("consented", SqlParam::Bool(enrollee.consented)),
                ("created_at", SqlParam::Timestamp(enrollee.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_answer(&self, answer: &Answer) -> BackendResult<String> {
        let id = record_id(&answer.id);
        self.insert(
            "answer",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("enrollee_id", SqlParam::Text(answer.enrollee_id.clone())),
                ("survey_stable_id", SqlParam::Text(answer.survey_stable_id.clone())),
                ("question_stable_id", SqlParam::Text(answer.question_stable_id.clone())),
                ("string_value", SqlParam::opt_text(answer.string_value.as_deref())),
                ("created_at", SqlParam::Timestamp(answer.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_task(&self, task: &ParticipantTask) -> BackendResult<String> {
        let id = record_id(&task.id);
        self.insert(
            "participant_task",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("enrollee_id", SqlParam::Text(task.enrollee_id.clone())),
                ("target_stable_id", SqlParam::Text(task.target_stable_id.clone())),
                ("task_type", SqlParam::Text(task.task_type.clone())),
                ("status", SqlParam::Text(task.status.as_str().to_string())),
                ("created_at", SqlParam::Timestamp(task.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_kit_request(&self, kit: &KitRequest) -> BackendResult<String> {
        let id = record_id(&kit.id);
        self.insert(
            "kit_request",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("enrollee_id", SqlParam::Text(kit.enrollee_id.clone())),
                ("kit_type", SqlParam::Text(kit.kit_type.clone())),
                ("status", SqlParam::Text(kit.status.as_str().to_string())),
                ("created_at", SqlParam::Timestamp(kit.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_family(&self, family: &Family) -> BackendResult<String> {
        let id = record_id(&family.id);
        self.insert(
            "family",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("shortcode", SqlParam::Text(family.shortcode.clone())),
                (
                    "study_environment_id",
                    SqlParam::Text(family.study_environment_id.as_str().to_string()),
                ),
                (
                    "proband_enrollee_id",
                    SqlParam::opt_text(family.proband_enrollee_id.as_deref()),
                ),
                ("created_at", SqlParam::Timestamp(family.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_family_enrollee(&self, member: &FamilyEnrollee) -> BackendResult<String> {
        let id = record_id(&member.id);
        self.insert(
            "family_enrollee",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("family_id", SqlParam::Text(member.family_id.clone())),
                ("enrollee_id", SqlParam::Text(member.enrollee_id.clone())),
                ("created_at", SqlParam::Timestamp(member.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_relation(&self, relation: &EnrolleeRelation) -> BackendResult<String> {
        let id = record_id(&relation.id);
        self.insert(
            "enrollee_relation",
            vec![
                ("id", SqlParam::Text(id.clone())),
                ("enrollee_id", SqlParam::Text(relation.enrollee_id.clone())),
                (
                    "target_enrollee_id",
                    SqlParam::Text(relation.target_enrollee_id.clone()),
                ),
                (
                    "relationship_type",
                    SqlParam::Text(relation.relationship_type.as_str().to_string()),
                ),
                ("created_at", SqlParam::Timestamp(relation.created_at)),
            ],
        )
        .await?;
        Ok(id)
    }

    pub async fn save_question(&self, question: &QuestionDefinition) -> BackendResult<String> {
        let id = record_id(&question.id);
        let choices = serde_json::to_string(&question.choices).map_err(|e| BackendError::Internal {
            backend_name: self.executor.dialect().to_string(),
            message: format!("failed to serialize question choices: {}", e),
            source: Some(Box::new(e)),
        })?;
        self.insert(
            "survey_question_definition",
            vec![
                ("id", SqlParam::Text(id.clone())),
                (
                    "study_environment_id",
                    SqlParam::Text(question.study_environment_id.as_str().to_string()),
                ),
                ("survey_stable_id", SqlParam::Text(question.survey_stable_id.clone())),
                (
                    "question_stable_id",
                    SqlParam::Text(question.question_stable_id.clone()),
                ),
                ("question_text", SqlParam::opt_text(question.question_text.as_deref())),
                ("choices", SqlParam::Text(choices)),
            ],
        )
        .await?;
        Ok(id)
    }
}
