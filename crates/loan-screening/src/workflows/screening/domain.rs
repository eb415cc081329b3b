use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Fresh time-ordered identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::now_v7().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

entity_id!(
    /// Identifier of a question node (template-owned or screening-owned clone).
    QuestionId
);
entity_id!(SectionId);
entity_id!(FormId);
entity_id!(ScreeningId);
entity_id!(ClientId);
entity_id!(BranchId);
entity_id!(
    /// Officer or reviewer account acting on the workflow.
    AccountId
);
entity_id!(LoanId);
entity_id!(AcatId);
entity_id!(TaskId);
entity_id!(NotificationId);
entity_id!(HistoryId);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    #[default]
    YesNo,
    FillInBlank,
    MultipleChoice,
    SingleChoice,
    Grouped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationFactor {
    #[default]
    None,
    Alphanumeric,
    Numeric,
    Alphabetic,
}

/// Conditional-visibility rule: the owning question is relevant only when
/// `question` was answered with `answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub question: QuestionId,
    pub answer: String,
}

/// Node of a questionnaire tree. Sub-questions are owned exclusively by their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    pub question_text: String,
    #[serde(default)]
    pub remark: String,
    #[serde(rename = "type", default)]
    pub question_type: QuestionType,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation_factor: ValidationFactor,
    #[serde(default)]
    pub measurement_unit: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(default)]
    pub sub_questions: Vec<QuestionId>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    pub show: bool,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Question {
    pub fn new(question_text: impl Into<String>, question_type: QuestionType) -> Self {
        let now = Utc::now();
        Self {
            id: QuestionId::generate(),
            question_text: question_text.into(),
            remark: String::new(),
            question_type,
            number: 1,
            required: false,
            validation_factor: ValidationFactor::None,
            measurement_unit: String::new(),
            options: Vec::new(),
            values: Vec::new(),
            sub_questions: Vec::new(),
            prerequisites: Vec::new(),
            show: true,
            date_created: now,
            last_modified: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "_id")]
    pub id: SectionId,
    pub title: String,
    pub number: u32,
    #[serde(default)]
    pub questions: Vec<QuestionId>,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Section {
    pub fn new(title: impl Into<String>, number: u32) -> Self {
        let now = Utc::now();
        Self {
            id: SectionId::generate(),
            title: title.into(),
            number,
            questions: Vec::new(),
            date_created: now,
            last_modified: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormType {
    Screening,
    LoanApplication,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FormLayout {
    #[default]
    TwoColumns,
    ThreeColumns,
}

/// Reusable blueprint. Screenings clone from it and never mutate its questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormTemplate {
    #[serde(rename = "_id")]
    pub id: FormId,
    #[serde(rename = "type")]
    pub form_type: FormType,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub layout: FormLayout,
    #[serde(default)]
    pub has_sections: bool,
    #[serde(default)]
    pub questions: Vec<QuestionId>,
    #[serde(default)]
    pub sections: Vec<SectionId>,
    #[serde(default)]
    pub disclaimer: String,
    #[serde(default)]
    pub signatures: Vec<String>,
    pub created_by: Option<AccountId>,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Screening lifecycle. Transitions are closed over [`ScreeningStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStatus {
    New,
    ScreeningInprogress,
    Submitted,
    Approved,
    DeclinedFinal,
    DeclinedUnderReview,
}

impl ScreeningStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ScreeningInprogress => "screening_inprogress",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::DeclinedFinal => "declined_final",
            Self::DeclinedUnderReview => "declined_under_review",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "screening_inprogress" => Some(Self::ScreeningInprogress),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "declined_final" => Some(Self::DeclinedFinal),
            "declined_under_review" => Some(Self::DeclinedUnderReview),
            _ => None,
        }
    }

    /// A live screening blocks the start of another cycle for the same client.
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            Self::New | Self::ScreeningInprogress | Self::Submitted
        )
    }

    /// Decisions on a submitted screening need the `AUTHORIZE` capability.
    pub const fn requires_authorization(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::DeclinedFinal | Self::DeclinedUnderReview
        )
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::New, Self::ScreeningInprogress)
                | (Self::New, Self::Submitted)
                | (Self::ScreeningInprogress, Self::Submitted)
                | (Self::Submitted, Self::Approved)
                | (Self::Submitted, Self::DeclinedFinal)
                | (Self::Submitted, Self::DeclinedUnderReview)
                | (Self::DeclinedUnderReview, Self::ScreeningInprogress)
                | (Self::DeclinedUnderReview, Self::Submitted)
        )
    }
}

impl fmt::Display for ScreeningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One loan-cycle's questionnaire instance. Owns its question and section clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screening {
    #[serde(rename = "_id")]
    pub id: ScreeningId,
    pub client: ClientId,
    pub branch: BranchId,
    pub created_by: AccountId,
    pub status: ScreeningStatus,
    pub title: String,
    pub subtitle: String,
    pub purpose: String,
    pub layout: FormLayout,
    pub has_sections: bool,
    pub disclaimer: String,
    pub signatures: Vec<String>,
    pub questions: Vec<QuestionId>,
    pub sections: Vec<SectionId>,
    pub comment: String,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    New,
    ScreeningInprogress,
    Submitted,
    Eligible,
    Ineligible,
    LoanApplicationInprogress,
    LoanApplicationAccepted,
    AcatInprogress,
    LoanGranted,
    LoanPaid,
}

impl ClientStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ScreeningInprogress => "screening_inprogress",
            Self::Submitted => "submitted",
            Self::Eligible => "eligible",
            Self::Ineligible => "ineligible",
            Self::LoanApplicationInprogress => "loan_application_inprogress",
            Self::LoanApplicationAccepted => "loan_application_accepted",
            Self::AcatInprogress => "acat_inprogress",
            Self::LoanGranted => "loan_granted",
            Self::LoanPaid => "loan_paid",
        }
    }

    /// Clients accepted by screening (or further down the pipeline) may be pushed to the CBS.
    pub const fn is_cbs_eligible(self) -> bool {
        matches!(
            self,
            Self::Eligible
                | Self::LoanApplicationInprogress
                | Self::LoanApplicationAccepted
                | Self::AcatInprogress
                | Self::LoanGranted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CbsStatus {
    Pending,
    Accepted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spouse {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub grandfather_name: String,
    #[serde(default)]
    pub national_id_no: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Farm or residence parcel outline captured at intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub points: Vec<GeoPoint>,
}

/// Client record. Owned by client management; the screening workflow only issues
/// status, cycle-number and CBS updates against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    #[serde(rename = "_id")]
    pub id: ClientId,
    pub first_name: String,
    pub last_name: String,
    pub grandfather_name: String,
    pub gender: String,
    pub national_id_no: String,
    pub national_id_card: Option<String>,
    pub picture: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub civil_status: String,
    pub woreda: String,
    pub kebele: String,
    pub house_no: String,
    pub spouse: Option<Spouse>,
    pub email: Option<String>,
    pub phone: String,
    pub household_members_count: u32,
    pub branch: BranchId,
    pub created_by: AccountId,
    pub status: ClientStatus,
    pub loan_cycle_number: u32,
    pub cbs_status: Option<CbsStatus>,
    pub cbs_reference: Option<String>,
    pub geolocation: Option<GeoPolygon>,
    pub parcel_result: Option<serde_json::Value>,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Client {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    New,
    Submitted,
    Inprogress,
    Accepted,
    DeclinedFinal,
    DeclinedUnderReview,
    Closed,
}

impl LoanStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Submitted => "submitted",
            Self::Inprogress => "inprogress",
            Self::Accepted => "accepted",
            Self::DeclinedFinal => "declined_final",
            Self::DeclinedUnderReview => "declined_under_review",
            Self::Closed => "closed",
        }
    }

    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::New | Self::Submitted | Self::Inprogress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcatStatus {
    New,
    Submitted,
    Resubmitted,
    Inprogress,
    Authorized,
    Declined,
    Closed,
}

impl AcatStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Submitted => "submitted",
            Self::Resubmitted => "resubmitted",
            Self::Inprogress => "inprogress",
            Self::Authorized => "authorized",
            Self::Declined => "declined",
            Self::Closed => "closed",
        }
    }

    pub const fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::New | Self::Submitted | Self::Resubmitted | Self::Inprogress
        )
    }
}

/// Loan application as reported by the loan module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSummary {
    #[serde(rename = "_id")]
    pub id: LoanId,
    pub client: ClientId,
    pub status: LoanStatus,
    pub date_created: DateTime<Utc>,
}

/// ACAT application as reported by the ACAT module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcatSummary {
    #[serde(rename = "_id")]
    pub id: AcatId,
    pub client: ClientId,
    pub status: AcatStatus,
    pub date_created: DateTime<Utc>,
}

/// The three applications making up one loan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationKind {
    Screening,
    Loan,
    Acat,
}

impl ApplicationKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Screening => "Screening",
            Self::Loan => "Loan",
            Self::Acat => "ACAT",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "screening" => Some(Self::Screening),
            "loan" => Some(Self::Loan),
            "acat" => Some(Self::Acat),
            _ => None,
        }
    }
}

impl fmt::Display for ApplicationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanCycle {
    pub cycle_number: u32,
    pub screening: Option<ScreeningId>,
    pub loan: Option<LoanId>,
    pub acat: Option<AcatId>,
    pub started_by: AccountId,
    pub last_edit_by: AccountId,
}

impl LoanCycle {
    /// First application of the cycle that has not been recorded yet.
    pub fn first_missing(&self) -> Option<ApplicationKind> {
        if self.screening.is_none() {
            Some(ApplicationKind::Screening)
        } else if self.loan.is_none() {
            Some(ApplicationKind::Loan)
        } else if self.acat.is_none() {
            Some(ApplicationKind::Acat)
        } else {
            None
        }
    }
}

/// Append-only per-client ledger of loan cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: HistoryId,
    pub client: ClientId,
    pub branch: BranchId,
    pub cycle_number: u32,
    pub cycles: Vec<LoanCycle>,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn cycle(&self, cycle_number: u32) -> Option<&LoanCycle> {
        self.cycles
            .iter()
            .find(|cycle| cycle.cycle_number == cycle_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Approve,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
}

/// Approval work routed to an actor. Linked to the screening through `entity_ref`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: TaskId,
    pub task: String,
    pub task_type: TaskType,
    pub entity_ref: String,
    pub entity_type: String,
    pub status: TaskStatus,
    pub created_by: AccountId,
    pub user: Option<AccountId>,
    pub branch: BranchId,
    pub comment: String,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: NotificationId,
    pub message: String,
    pub task_ref: TaskId,
    pub for_user: AccountId,
    pub date_created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Create,
    Update,
    View,
    Authorize,
}

impl Capability {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "VIEW" => Some(Self::View),
            "AUTHORIZE" => Some(Self::Authorize),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::View => "VIEW",
            Self::Authorize => "AUTHORIZE",
        }
    }
}

/// Authenticated caller as resolved by the (external) auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub account: AccountId,
    pub capabilities: BTreeSet<Capability>,
}

impl Actor {
    pub fn new(account: AccountId, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            account,
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ScreeningStatus; 6] = [
        ScreeningStatus::New,
        ScreeningStatus::ScreeningInprogress,
        ScreeningStatus::Submitted,
        ScreeningStatus::Approved,
        ScreeningStatus::DeclinedFinal,
        ScreeningStatus::DeclinedUnderReview,
    ];

    #[test]
    fn status_labels_round_trip_through_parse() {
        for status in ALL {
            assert_eq!(ScreeningStatus::parse(status.label()), Some(status));
        }
        assert_eq!(ScreeningStatus::parse("incomplete"), None);
    }

    #[test]
    fn terminal_statuses_allow_no_transition() {
        for next in ALL {
            assert!(!ScreeningStatus::Approved.can_transition_to(next));
            assert!(!ScreeningStatus::DeclinedFinal.can_transition_to(next));
        }
    }

    #[test]
    fn no_status_transitions_to_itself() {
        for status in ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn decisions_only_follow_submission() {
        for from in ALL {
            let allowed = from.can_transition_to(ScreeningStatus::Approved);
            assert_eq!(allowed, from == ScreeningStatus::Submitted, "{from}");
        }
    }

    #[test]
    fn first_missing_reports_in_pipeline_order() {
        let mut cycle = LoanCycle {
            cycle_number: 1,
            screening: Some(ScreeningId::from("s-1")),
            loan: None,
            acat: None,
            started_by: AccountId::from("officer"),
            last_edit_by: AccountId::from("officer"),
        };
        assert_eq!(cycle.first_missing(), Some(ApplicationKind::Loan));
        cycle.loan = Some(LoanId::from("l-1"));
        assert_eq!(cycle.first_missing(), Some(ApplicationKind::Acat));
        cycle.acat = Some(AcatId::from("a-1"));
        assert_eq!(cycle.first_missing(), None);
    }
}
