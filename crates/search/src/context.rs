//! The per-participant data bundle used for in-memory evaluation.

use serde::Serialize;

use crate::model::{
    Answer, Enrollee, EnrolleeRelation, Family, FamilyEnrollee, KitRequest, MailingAddress,
    ParticipantTask, ParticipantUser, PortalParticipantUser, Profile,
};

/// A family membership together with the family it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyMembership {
    pub membership: FamilyEnrollee,
    pub family: Family,
}

/// Everything the expression tree may read about one enrollee.
///
/// Assembled by the store for a single evaluation and never mutated by it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrolleeSearchContext {
    pub enrollee: Enrollee,
    pub profile: Option<Profile>,
    pub mailing_address: Option<MailingAddress>,
    pub participant_user: Option<ParticipantUser>,
    pub portal_participant_user: Option<PortalParticipantUser>,
    pub answers: Vec<Answer>,
    pub tasks: Vec<ParticipantTask>,
    pub kit_requests: Vec<KitRequest>,
    pub family_memberships: Vec<FamilyMembership>,
    /// Relations where the enrollee is either side.
    pub relations: Vec<EnrolleeRelation>,
}

impl EnrolleeSearchContext {
    /// A context holding only the enrollee record.
    pub fn new(enrollee: Enrollee) -> Self {
        Self {
            enrollee,
            profile: None,
            mailing_address: None,
            participant_user: None,
            portal_participant_user: None,
            answers: Vec::new(),
            tasks: Vec::new(),
            kit_requests: Vec::new(),
            family_memberships: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn answer(&self, survey_stable_id: &str, question_stable_id: &str) -> Option<&Answer> {
        self.answers.iter().find(|a| {
            a.survey_stable_id == survey_stable_id && a.question_stable_id == question_stable_id
        })
    }

    /// The most recently created task for a target, of any status. Ties on
    /// creation time go to the greatest id.
    pub fn latest_task(&self, target_stable_id: &str) -> Option<&ParticipantTask> {
        self.tasks
            .iter()
            .filter(|t| t.target_stable_id == target_stable_id)
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.as_bytes().cmp(b.id.as_bytes()))
            })
    }

    /// The most recently created kit request.
    pub fn latest_kit(&self) -> Option<&KitRequest> {
        self.kit_requests.iter().max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_bytes().cmp(b.id.as_bytes()))
        })
    }

    /// The earliest family membership. Ties go to the smallest id.
    pub fn first_membership(&self) -> Option<&FamilyMembership> {
        self.family_memberships.iter().min_by(|a, b| {
            a.membership
                .created_at
                .cmp(&b.membership.created_at)
                .then_with(|| a.membership.id.as_bytes().cmp(b.membership.id.as_bytes()))
        })
    }
}
