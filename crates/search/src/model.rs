//! Records of the fixed participant schema.
//!
//! These mirror the rows the store reads and writes. They carry no behavior
//! beyond small conveniences; the search terms decide what each field means.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::value::FacetChoice;

/// Identifier of a study environment (sandbox, irb or live deployment of a
/// study). Every search is scoped to exactly one.
///
/// ```
/// use cohort_search::model::StudyEnvironmentId;
///
/// let env = StudyEnvironmentId::new("ourhealth-live");
/// assert_eq!(env.as_str(), "ourhealth-live");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudyEnvironmentId(String);

impl StudyEnvironmentId {
    /// Creates a new study environment id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudyEnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudyEnvironmentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A study participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollee {
    pub id: String,
    pub shortcode: String,
    pub study_environment_id: StudyEnvironmentId,
    pub participant_user_id: Option<String>,
    pub profile_id: Option<String>,
    /// Whether the enrollee is a study subject (as opposed to a proxy only).
    pub subject: bool,
    pub consented: bool,
    pub created_at: DateTime<Utc>,
}

/// Personal details of a participant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub contact_email: Option<String>,
    pub phone_number: Option<String>,
    pub do_not_email: bool,
    pub sex_at_birth: Option<String>,
    pub mailing_address_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailingAddress {
    pub id: String,
    pub street1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// The account a participant signs in with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUser {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// A participant account's registration with one portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalParticipantUser {
    pub id: String,
    pub participant_user_id: String,
    pub profile_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// A survey answer, unique per enrollee, survey and question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: String,
    pub enrollee_id: String,
    pub survey_stable_id: String,
    pub question_stable_id: String,
    pub string_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    Viewed,
    InProgress,
    Complete,
    Rejected,
    Removed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::New,
        TaskStatus::Viewed,
        TaskStatus::InProgress,
        TaskStatus::Complete,
        TaskStatus::Rejected,
        TaskStatus::Removed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "NEW",
            TaskStatus::Viewed => "VIEWED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Complete => "COMPLETE",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::Removed => "REMOVED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

/// A task assigned to an enrollee, such as a survey or consent form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantTask {
    pub id: String,
    pub enrollee_id: String,
    pub target_stable_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KitRequestStatus {
    Created,
    Queued,
    Sent,
    Received,
    Errored,
    Deactivated,
}

impl KitRequestStatus {
    pub const ALL: [KitRequestStatus; 6] = [
        KitRequestStatus::Created,
        KitRequestStatus::Queued,
        KitRequestStatus::Sent,
        KitRequestStatus::Received,
        KitRequestStatus::Errored,
        KitRequestStatus::Deactivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KitRequestStatus::Created => "CREATED",
            KitRequestStatus::Queued => "QUEUED",
            KitRequestStatus::Sent => "SENT",
            KitRequestStatus::Received => "RECEIVED",
            KitRequestStatus::Errored => "ERRORED",
            KitRequestStatus::Deactivated => "DEACTIVATED",
        }
    }
}

impl FromStr for KitRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KitRequestStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown kit request status: {}", s))
    }
}

/// A request to ship a sample collection kit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KitRequest {
    pub id: String,
    pub enrollee_id: String,
    pub kit_type: String,
    pub status: KitRequestStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: String,
    pub shortcode: String,
    pub study_environment_id: StudyEnvironmentId,
    pub proband_enrollee_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Membership of an enrollee in a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyEnrollee {
    pub id: String,
    pub family_id: String,
    pub enrollee_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Proxy,
    FamilyMember,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Proxy => "PROXY",
            RelationshipType::FamilyMember => "FAMILY_MEMBER",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROXY" => Ok(RelationshipType::Proxy),
            "FAMILY_MEMBER" => Ok(RelationshipType::FamilyMember),
            _ => Err(format!("unknown relationship type: {}", s)),
        }
    }
}

/// A directed relation between two enrollees; for proxies, `enrollee_id` is
/// the proxy and `target_enrollee_id` the governed participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolleeRelation {
    pub id: String,
    pub enrollee_id: String,
    pub target_enrollee_id: String,
    pub relationship_type: RelationshipType,
    pub created_at: DateTime<Utc>,
}

/// A survey question known to a study environment, used for answer facets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDefinition {
    pub id: String,
    pub study_environment_id: StudyEnvironmentId,
    pub survey_stable_id: String,
    pub question_stable_id: String,
    pub question_text: Option<String>,
    #[serde(default)]
    pub choices: Vec<FacetChoice>,
}

/// Per-environment metadata feeding facet generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyEnvironmentCatalog {
    pub questions: Vec<QuestionDefinition>,
    /// Distinct task target stable ids used in the environment.
    pub task_targets: Vec<String>,
}
