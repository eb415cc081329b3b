use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    AccountId, BranchId, CbsStatus, Client, ClientId, ClientStatus, FormId, FormLayout,
    FormTemplate, FormType, Prerequisite, Question, QuestionId, QuestionType, Screening,
    ScreeningId, ScreeningStatus, Section, SectionId, ValidationFactor,
};
use super::repository::{ClientDirectory, QuestionStore, RepositoryError, SectionStore};

/// Question with its sub-question tree resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    pub question_text: String,
    pub remark: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub number: u32,
    pub required: bool,
    pub validation_factor: ValidationFactor,
    pub measurement_unit: String,
    pub options: Vec<String>,
    pub values: Vec<String>,
    pub sub_questions: Vec<QuestionView>,
    pub prerequisites: Vec<Prerequisite>,
    pub show: bool,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl QuestionView {
    pub(crate) fn assemble(question: Question, sub_questions: Vec<QuestionView>) -> Self {
        Self {
            id: question.id,
            question_text: question.question_text,
            remark: question.remark,
            question_type: question.question_type,
            number: question.number,
            required: question.required,
            validation_factor: question.validation_factor,
            measurement_unit: question.measurement_unit,
            options: question.options,
            values: question.values,
            sub_questions,
            prerequisites: question.prerequisites,
            show: question.show,
            date_created: question.date_created,
            last_modified: question.last_modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionView {
    #[serde(rename = "_id")]
    pub id: SectionId,
    pub title: String,
    pub number: u32,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSummary {
    #[serde(rename = "_id")]
    pub id: ClientId,
    pub first_name: String,
    pub last_name: String,
    pub grandfather_name: String,
    pub phone: String,
    pub status: ClientStatus,
    pub loan_cycle_number: u32,
    pub cbs_status: Option<CbsStatus>,
}

impl From<&Client> for ClientSummary {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.clone(),
            first_name: client.first_name.clone(),
            last_name: client.last_name.clone(),
            grandfather_name: client.grandfather_name.clone(),
            phone: client.phone.clone(),
            status: client.status,
            loan_cycle_number: client.loan_cycle_number,
            cbs_status: client.cbs_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningView {
    #[serde(rename = "_id")]
    pub id: ScreeningId,
    pub client: Option<ClientSummary>,
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
    pub questions: Vec<QuestionView>,
    pub sections: Vec<SectionView>,
    pub comment: String,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormView {
    #[serde(rename = "_id")]
    pub id: FormId,
    #[serde(rename = "type")]
    pub form_type: FormType,
    pub title: String,
    pub subtitle: String,
    pub purpose: String,
    pub layout: FormLayout,
    pub has_sections: bool,
    pub questions: Vec<QuestionView>,
    pub sections: Vec<SectionView>,
    pub disclaimer: String,
    pub signatures: Vec<String>,
    pub created_by: Option<AccountId>,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Resolves stored id lists into nested views. Dangling ids are left out.
pub struct Populator<'a, R: ?Sized> {
    repository: &'a R,
}

impl<'a, R> Populator<'a, R>
where
    R: QuestionStore + SectionStore + ClientDirectory + ?Sized,
{
    pub fn new(repository: &'a R) -> Self {
        Self { repository }
    }

    pub fn question(&self, id: &QuestionId) -> Result<Option<QuestionView>, RepositoryError> {
        let Some(question) = self.repository.fetch_question(id)? else {
            return Ok(None);
        };
        let sub_questions = self.questions(&question.sub_questions)?;
        Ok(Some(QuestionView::assemble(question, sub_questions)))
    }

    pub fn questions(&self, ids: &[QuestionId]) -> Result<Vec<QuestionView>, RepositoryError> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = self.question(id)? {
                views.push(view);
            }
        }
        views.sort_by_key(|view| view.number);
        Ok(views)
    }

    pub fn section(&self, id: &SectionId) -> Result<Option<SectionView>, RepositoryError> {
        let Some(section) = self.repository.fetch_section(id)? else {
            return Ok(None);
        };
        Ok(Some(self.section_view(section)?))
    }

    fn section_view(&self, section: Section) -> Result<SectionView, RepositoryError> {
        Ok(SectionView {
            questions: self.questions(&section.questions)?,
            id: section.id,
            title: section.title,
            number: section.number,
        })
    }

    fn sections(&self, ids: &[SectionId]) -> Result<Vec<SectionView>, RepositoryError> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = self.section(id)? {
                views.push(view);
            }
        }
        views.sort_by_key(|view| view.number);
        Ok(views)
    }

    pub fn screening(&self, screening: Screening) -> Result<ScreeningView, RepositoryError> {
        let client = self
            .repository
            .fetch_client(&screening.client)?
            .as_ref()
            .map(ClientSummary::from);

        Ok(ScreeningView {
            questions: self.questions(&screening.questions)?,
            sections: self.sections(&screening.sections)?,
            id: screening.id,
            client,
            branch: screening.branch,
            created_by: screening.created_by,
            status: screening.status,
            title: screening.title,
            subtitle: screening.subtitle,
            purpose: screening.purpose,
            layout: screening.layout,
            has_sections: screening.has_sections,
            disclaimer: screening.disclaimer,
            signatures: screening.signatures,
            comment: screening.comment,
            date_created: screening.date_created,
            last_modified: screening.last_modified,
        })
    }

    pub fn form(&self, form: FormTemplate) -> Result<FormView, RepositoryError> {
        Ok(FormView {
            questions: self.questions(&form.questions)?,
            sections: self.sections(&form.sections)?,
            id: form.id,
            form_type: form.form_type,
            title: form.title,
            subtitle: form.subtitle,
            purpose: form.purpose,
            layout: form.layout,
            has_sections: form.has_sections,
            disclaimer: form.disclaimer,
            signatures: form.signatures,
            created_by: form.created_by,
            date_created: form.date_created,
            last_modified: form.last_modified,
        })
    }
}

/// Every question id reachable from `roots` through `sub_questions`, parents first.
pub fn question_tree<R>(
    repository: &R,
    roots: &[QuestionId],
) -> Result<Vec<QuestionId>, RepositoryError>
where
    R: QuestionStore + ?Sized,
{
    let mut collected = Vec::new();
    let mut stack: Vec<QuestionId> = roots.iter().rev().cloned().collect();
    while let Some(id) = stack.pop() {
        if collected.contains(&id) {
            continue;
        }
        if let Some(question) = repository.fetch_question(&id)? {
            stack.extend(question.sub_questions.iter().rev().cloned());
            collected.push(id);
        }
    }
    Ok(collected)
}
