//! A small cohort written through the store so both execution strategies can
//! be checked against the same data.

use chrono::{DateTime, Days, Months, NaiveDate, TimeZone, Utc};

use cohort_search::model::{
    Answer, Enrollee, EnrolleeRelation, Family, FamilyEnrollee, KitRequest, KitRequestStatus,
    MailingAddress, ParticipantTask, ParticipantUser, PortalParticipantUser, Profile,
    QuestionDefinition, RelationshipType, StudyEnvironmentId, TaskStatus,
};
use cohort_search::store::{ParticipantWriter, SqlExecutor};
use cohort_search::value::FacetChoice;

pub const JONAS: &str = "e-jonas";
pub const EVE: &str = "e-eve";
pub const MIRA: &str = "e-mira";
pub const JOSEPHINE: &str = "e-josephine";
pub const OUTSIDER: &str = "e-outsider";

pub fn instant(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// A birth date that makes the person `years` old today, a month clear of
/// their birthday.
pub fn birth_date_for_age(years: u32) -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_months(Months::new(years * 12))
        .and_then(|d| d.checked_sub_days(Days::new(30)))
        .unwrap()
}

/// One enrollee with the records hanging off it.
#[derive(Debug, Clone)]
pub struct EnrolleeFixture {
    pub id: String,
    pub shortcode: String,
    pub consented: bool,
    pub created_at: DateTime<Utc>,
    pub profile: Option<Profile>,
    pub address: Option<MailingAddress>,
    pub user: Option<ParticipantUser>,
    pub portal_users: Vec<PortalParticipantUser>,
    pub answers: Vec<(String, String, Option<String>)>,
    pub tasks: Vec<(String, String, TaskStatus, DateTime<Utc>)>,
    pub kits: Vec<(String, KitRequestStatus, DateTime<Utc>)>,
}

impl EnrolleeFixture {
    pub fn new(id: &str, shortcode: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            shortcode: shortcode.to_string(),
            consented: false,
            created_at,
            profile: None,
            address: None,
            user: None,
            portal_users: Vec::new(),
            answers: Vec::new(),
            tasks: Vec::new(),
            kits: Vec::new(),
        }
    }

    pub fn consented(mut self) -> Self {
        self.consented = true;
        self
    }

    pub fn with_profile(mut self, given: &str, family: &str, age: u32) -> Self {
        self.profile = Some(Profile {
            id: format!("p-{}", self.id),
            given_name: Some(given.to_string()),
            family_name: Some(family.to_string()),
            birth_date: Some(birth_date_for_age(age)),
            ..Default::default()
        });
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        if let Some(profile) = self.profile.as_mut() {
            profile.contact_email = Some(email.to_string());
        }
        self
    }

    pub fn do_not_email(mut self) -> Self {
        if let Some(profile) = self.profile.as_mut() {
            profile.do_not_email = true;
        }
        self
    }

    pub fn with_address(mut self, city: &str, state: &str) -> Self {
        let address = MailingAddress {
            id: format!("a-{}", self.id),
            street1: Some("1 Main St".to_string()),
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            postal_code: Some("02115".to_string()),
            country: Some("US".to_string()),
        };
        if let Some(profile) = self.profile.as_mut() {
            profile.mailing_address_id = Some(address.id.clone());
        }
        self.address = Some(address);
        self
    }

    pub fn with_user(
        mut self,
        username: &str,
        created_at: DateTime<Utc>,
        last_login: Option<DateTime<Utc>>,
    ) -> Self {
        self.user = Some(ParticipantUser {
            id: format!("u-{}", self.id),
            username: username.to_string(),
            created_at,
            last_login,
        });
        self
    }

    /// Adds a portal registration; requires a user and a profile.
    pub fn with_portal_user(
        mut self,
        created_at: DateTime<Utc>,
        last_login: Option<DateTime<Utc>>,
    ) -> Self {
        let n = self.portal_users.len();
        self.portal_users.push(PortalParticipantUser {
            id: format!("ppu-{}-{}", self.id, n),
            participant_user_id: format!("u-{}", self.id),
            profile_id: self.profile.as_ref().map(|p| p.id.clone()),
            created_at,
            last_login,
        });
        self
    }

    pub fn with_answer(mut self, survey: &str, question: &str, value: Option<&str>) -> Self {
        self.answers.push((
            survey.to_string(),
            question.to_string(),
            value.map(str::to_string),
        ));
        self
    }

    pub fn with_task(
        mut self,
        target: &str,
        task_type: &str,
        status: TaskStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        self.tasks
            .push((target.to_string(), task_type.to_string(), status, created_at));
        self
    }

    pub fn with_kit(
        mut self,
        kit_type: &str,
        status: KitRequestStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        self.kits.push((kit_type.to_string(), status, created_at));
        self
    }

    pub async fn save<E: SqlExecutor>(
        &self,
        writer: &ParticipantWriter<'_, E>,
        study_env: &StudyEnvironmentId,
    ) {
        if let Some(address) = &self.address {
            writer.save_mailing_address(address).await.unwrap();
        }
        if let Some(profile) = &self.profile {
            writer.save_profile(profile).await.unwrap();
        }
        if let Some(user) = &self.user {
            writer.save_participant_user(user).await.unwrap();
        }
        for portal_user in &self.portal_users {
            writer.save_portal_participant_user(portal_user).await.unwrap();
        }

        writer
            .save_enrollee(&Enrollee {
                id: self.id.clone(),
                shortcode: self.shortcode.clone(),
                study_environment_id: study_env.clone(),
                participant_user_id: self.user.as_ref().map(|u| u.id.clone()),
                profile_id: self.profile.as_ref().map(|p| p.id.clone()),
                subject: true,
                consented: self.consented,
                created_at: self.created_at,
            })
            .await
            .unwrap();

        for (survey, question, value) in &self.answers {
            writer
                .save_answer(&Answer {
                    id: String::new(),
                    enrollee_id: self.id.clone(),
                    survey_stable_id: survey.clone(),
                    question_stable_id: question.clone(),
                    string_value: value.clone(),
                    created_at: self.created_at,
                })
                .await
                .unwrap();
        }
        for (target, task_type, status, created_at) in &self.tasks {
            writer
                .save_task(&ParticipantTask {
                    id: String::new(),
                    enrollee_id: self.id.clone(),
                    target_stable_id: target.clone(),
                    task_type: task_type.clone(),
                    status: *status,
                    created_at: *created_at,
                })
                .await
                .unwrap();
        }
        for (kit_type, status, created_at) in &self.kits {
            writer
                .save_kit_request(&KitRequest {
                    id: String::new(),
                    enrollee_id: self.id.clone(),
                    kit_type: kit_type.clone(),
                    status: *status,
                    created_at: *created_at,
                })
                .await
                .unwrap();
        }
    }
}

/// Writes the shared cohort into `study_env`, plus one enrollee in a
/// different environment that no search may return.
///
/// - Jonas Salk: 20, consented, Boston MA, complete demographics, kit sent,
///   proband of the Salk family.
/// - Eve Curie: 15, do-not-email, lives in Évry, no login yet, demographics
///   task removed.
/// - Mira: no profile and no account, a visit date answer that is not a date.
/// - Josephine Salk: 45, proxy for Jonas, enrolled at the same instant as him,
///   hometown answered in capitals with an umlaut.
pub async fn seed_cohort<E: SqlExecutor>(
    writer: &ParticipantWriter<'_, E>,
    study_env: &StudyEnvironmentId,
) {
    EnrolleeFixture::new(JONAS, "JOSALK", instant(2024, 3, 1, 10, 0, 0))
        .consented()
        .with_profile("Jonas", "Salk", 20)
        .with_email("jonas@example.com")
        .with_address("Boston", "MA")
        .with_user("jsalk", instant(2024, 2, 28, 9, 0, 0), Some(instant(2024, 5, 1, 8, 0, 0)))
        .with_portal_user(instant(2024, 2, 28, 9, 5, 0), Some(instant(2024, 5, 1, 8, 0, 0)))
        .with_portal_user(instant(2024, 4, 1, 0, 0, 0), None)
        .with_answer("basics", "diet", Some("vegan"))
        .with_answer("basics", "visitDate", Some("2024-02-10"))
        .with_task("demographics", "SURVEY", TaskStatus::Complete, instant(2024, 3, 2, 0, 0, 0))
        .with_task("consent", "CONSENT", TaskStatus::New, instant(2024, 3, 1, 10, 0, 0))
        .with_kit("SALIVA", KitRequestStatus::Created, instant(2024, 3, 3, 0, 0, 0))
        .with_kit("SALIVA", KitRequestStatus::Sent, instant(2024, 3, 5, 0, 0, 0))
        .save(writer, study_env)
        .await;

    EnrolleeFixture::new(EVE, "EVECUR", instant(2024, 4, 10, 14, 30, 0))
        .with_profile("Eve", "Curie", 15)
        .do_not_email()
        .with_address("Évry", "IDF")
        .with_user("ecurie", instant(2024, 4, 10, 14, 0, 0), None)
        .with_portal_user(instant(2024, 4, 10, 14, 1, 0), None)
        .with_answer("basics", "diet", Some("Omnivore"))
        .with_answer("basics", "visitDate", None)
        .with_task("demographics", "SURVEY", TaskStatus::Complete, instant(2024, 4, 11, 0, 0, 0))
        .with_task("demographics", "SURVEY", TaskStatus::Removed, instant(2024, 4, 12, 0, 0, 0))
        .save(writer, study_env)
        .await;

    EnrolleeFixture::new(MIRA, "MIRAXX", instant(2023, 12, 31, 23, 59, 59))
        .consented()
        .with_answer("basics", "visitDate", Some("soon"))
        .with_task("consent", "CONSENT", TaskStatus::New, instant(2024, 1, 1, 0, 0, 0))
        .save(writer, study_env)
        .await;

    EnrolleeFixture::new(JOSEPHINE, "JOSEPH", instant(2024, 3, 1, 10, 0, 0))
        .consented()
        .with_profile("JOSEPHINE", "Salk", 45)
        .with_email("Jo@Example.com")
        .with_user("jo_salk_100%", instant(2024, 3, 1, 9, 0, 0), Some(instant(2024, 3, 20, 0, 0, 0)))
        .with_answer("basics", "hometown", Some("ZÜRICH"))
        .with_kit("BLOOD", KitRequestStatus::Received, instant(2024, 3, 10, 0, 0, 0))
        .save(writer, study_env)
        .await;

    writer
        .save_family(&Family {
            id: "f-salk".to_string(),
            shortcode: "FAMSALK".to_string(),
            study_environment_id: study_env.clone(),
            proband_enrollee_id: Some(JONAS.to_string()),
            created_at: instant(2024, 3, 6, 0, 0, 0),
        })
        .await
        .unwrap();
    for (id, enrollee) in [("fe-jonas", JONAS), ("fe-josephine", JOSEPHINE)] {
        writer
            .save_family_enrollee(&FamilyEnrollee {
                id: id.to_string(),
                family_id: "f-salk".to_string(),
                enrollee_id: enrollee.to_string(),
                created_at: instant(2024, 3, 6, 0, 0, 0),
            })
            .await
            .unwrap();
    }
    writer
        .save_relation(&EnrolleeRelation {
            id: "r-proxy".to_string(),
            enrollee_id: JOSEPHINE.to_string(),
            target_enrollee_id: JONAS.to_string(),
            relationship_type: RelationshipType::Proxy,
            created_at: instant(2024, 3, 6, 0, 0, 0),
        })
        .await
        .unwrap();

    writer
        .save_question(&QuestionDefinition {
            id: String::new(),
            study_environment_id: study_env.clone(),
            survey_stable_id: "basics".to_string(),
            question_stable_id: "diet".to_string(),
            question_text: Some("What best describes your diet?".to_string()),
            choices: vec![
                FacetChoice::plain("vegan"),
                FacetChoice {
                    value: "Omnivore".to_string(),
                    label: "Omnivore (eats everything)".to_string(),
                },
            ],
        })
        .await
        .unwrap();

    let elsewhere = StudyEnvironmentId::new(format!("{}-other", study_env));
    EnrolleeFixture::new(OUTSIDER, "OUTSDR", instant(2024, 6, 1, 0, 0, 0))
        .consented()
        .with_profile("Jonas", "Outsider", 30)
        .save(writer, &elsewhere)
        .await;
}

/// Rules covering every expression variant, operator, function and
/// resolver, temporal/string coercion in both directions (including stored
/// text that is not a date), and case folding beyond ASCII.
pub const EQUIVALENCE_RULES: &[&str] = &[
    "",
    "()",
    "{enrollee.consented} = true",
    "{enrollee.consented} != true",
    "{enrollee.shortcode} = 'JOSALK'",
    "{enrollee.createdAt} > '2024-03-01'",
    "'2024-03-01' < {enrollee.createdAt}",
    "{enrollee.createdAt} >= '2024-03-01T10:00:00Z'",
    "{enrollee.createdAt} <= '2024-03-01 10:00:00'",
    "{enrolledDate} = '2024-03-01'",
    "'2024-01-01' > {enrolledDate}",
    "{age} > 18",
    "{age} >= 15 and {age} < 21",
    "{age} = null",
    "{profile.givenName} contains 'jo'",
    "{profile.givenName} contains 'JO' and {age} > 30",
    "{profile.name} = 'Jonas Salk'",
    "{profile.familyName} = {profile.familyName}",
    "{profile.contactEmail} = null",
    "{profile.contactEmail} != null",
    "{profile.contactEmail} contains '@example.'",
    "{profile.doNotEmail} = true",
    "{profile.birthDate} < '2010-01-01'",
    "{profile.mailingAddress.state} = 'MA'",
    "lower({profile.mailingAddress.city}) = 'évry'",
    "lower({profile.mailingAddress.city}) = 'Évry'",
    "{profile.mailingAddress.city} contains 'ÉV'",
    "{profile.mailingAddress.city} contains 'évr'",
    "trim(' MA ') = {profile.mailingAddress.state}",
    "{answer.basics.diet} = 'vegan'",
    "lower({answer.basics.diet}) = 'omnivore'",
    "{answer.basics.visitDate} = null",
    "{answer.basics.visitDate} > '2024-01-01'",
    "{answer.basics.visitDate} > {enrolledDate}",
    "{answer.basics.visitDate} < {enrolledDate}",
    "not {answer.basics.visitDate} < {enrolledDate}",
    "{enrollee.createdAt} > {answer.basics.visitDate}",
    "{answer.basics.visitDate} != {enrollee.createdAt}",
    "{answer.basics.hometown} contains 'zürich'",
    "{answer.basics.hometown} contains 'Zür'",
    "lower({answer.basics.hometown}) = 'zürich'",
    "{answer.basics.unknownQuestion} = null",
    "{task.demographics.status} = 'COMPLETE'",
    "not {task.demographics.status} = 'COMPLETE'",
    "{task.demographics.assigned} = true",
    "{task.consent.assigned} = true and {task.consent.status} = 'NEW'",
    "{task.demographics.createdAt} > '2024-03-01'",
    "{task.demographics.taskType} != 'SURVEY'",
    "{kit.latest.status} = 'SENT'",
    "{kit.latest.status} != null",
    "{kit.latest.kitType} = 'BLOOD' or {kit.latest.createdAt} < '2024-03-04'",
    "{family.shortcode} = 'FAMSALK'",
    "{family.count} > 0",
    "{family.count} = 0",
    "{family.isProband} = true",
    "{family.isProxy} = true",
    "{family.hasProxy} = true",
    "{user.username} contains '100%'",
    "{user.username} contains '_salk'",
    "{user.lastLogin} = null",
    "{user.createdAt} < {enrollee.createdAt}",
    "{portalUser.createdAt} < '2024-03-01'",
    "{portalUser.lastLogin} != null",
    "max({user.lastLogin}, {portalUser.lastLogin}) > '2024-04-01'",
    "min({age}, 18) = 18",
    "include 'e-eve, e-mira e-outsider'",
    "include ''",
    "not include 'e-eve'",
    "not ({age} > 18 or {enrollee.consented} = true)",
    "not {age} > 18 and not {enrollee.consented} = true",
    "({profile.givenName} = 'Eve' or {profile.givenName} = 'Jonas') and {enrollee.consented} = true",
    "{profile.givenName} = 'Eve' or {profile.givenName} = 'Jonas' and {enrollee.consented} = true",
    "not not {enrollee.consented} = true",
];
