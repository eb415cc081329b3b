//! Question, form and section bookkeeping behind the template routes.

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::domain::{
    AccountId, FormId, FormLayout, FormTemplate, FormType, Prerequisite, Question, QuestionId,
    QuestionType, Section, SectionId, ValidationFactor,
};
use super::error::ScreeningError;
use super::repository::{Page, PageRequest, RepositoryError, ScreeningRepository};
use super::views::{question_tree, FormView, Populator, QuestionView, SectionView};

/// Prerequisite naming another question of the same draft by its text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DraftPrerequisite {
    pub question_text: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionDraft {
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub remark: String,
    #[serde(rename = "type", default)]
    pub question_type: QuestionType,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation_factor: ValidationFactor,
    #[serde(default)]
    pub measurement_unit: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub show: Option<bool>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub depends_on: Vec<DraftPrerequisite>,
    #[serde(default)]
    pub sub_questions: Vec<QuestionDraft>,
    /// Attach the new question to a form's top level.
    #[serde(default)]
    pub form: Option<FormId>,
    /// Attach the new question to a section.
    #[serde(default)]
    pub section: Option<SectionId>,
}

impl QuestionDraft {
    pub fn new(question_text: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            question_text: question_text.into(),
            question_type,
            ..Self::default()
        }
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|option| option.to_string()).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.show = Some(false);
        self
    }

    pub fn depends_on(mut self, question_text: &str, answer: &str) -> Self {
        self.depends_on.push(DraftPrerequisite {
            question_text: question_text.to_string(),
            answer: answer.to_string(),
        });
        self
    }

    pub fn sub_question(mut self, draft: QuestionDraft) -> Self {
        self.sub_questions.push(draft);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionPatch {
    pub question_text: Option<String>,
    pub remark: Option<String>,
    #[serde(rename = "type")]
    pub question_type: Option<QuestionType>,
    pub number: Option<u32>,
    pub required: Option<bool>,
    pub validation_factor: Option<ValidationFactor>,
    pub measurement_unit: Option<String>,
    pub options: Option<Vec<String>>,
    pub values: Option<Vec<String>>,
    pub show: Option<bool>,
    pub prerequisites: Option<Vec<Prerequisite>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionPatch {
    pub title: Option<String>,
    pub number: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormDraft {
    #[serde(rename = "type")]
    pub form_type: FormType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub layout: FormLayout,
    #[serde(default)]
    pub disclaimer: String,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default)]
    pub questions: Vec<QuestionDraft>,
    #[serde(default)]
    pub sections: Vec<SectionDraft>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormPatch {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub purpose: Option<String>,
    pub layout: Option<FormLayout>,
    pub disclaimer: Option<String>,
    pub signatures: Option<Vec<String>>,
}

/// Questions created from one draft, with the text-based prerequisites still to resolve.
#[derive(Debug, Default)]
struct DraftBatch {
    created: Vec<QuestionId>,
    by_text: Vec<(String, QuestionId)>,
    pending: Vec<(QuestionId, Vec<DraftPrerequisite>)>,
}

pub struct FormCatalog<'a, R: ?Sized> {
    repository: &'a R,
}

impl<'a, R> FormCatalog<'a, R>
where
    R: ScreeningRepository + ?Sized,
{
    pub fn new(repository: &'a R) -> Self {
        Self { repository }
    }

    fn populator(&self) -> Populator<'a, R> {
        Populator::new(self.repository)
    }

    fn question_view(&self, id: &QuestionId) -> Result<QuestionView, ScreeningError> {
        self.populator()
            .question(id)?
            .ok_or_else(|| ScreeningError::not_found("question", id))
    }

    fn section_view(&self, id: &SectionId) -> Result<SectionView, ScreeningError> {
        self.populator()
            .section(id)?
            .ok_or_else(|| ScreeningError::not_found("section", id))
    }

    fn fetch_form(&self, id: &FormId) -> Result<FormTemplate, ScreeningError> {
        self.repository
            .fetch_form(id)?
            .ok_or_else(|| ScreeningError::not_found("form", id))
    }

    fn fetch_section(&self, id: &SectionId) -> Result<Section, ScreeningError> {
        self.repository
            .fetch_section(id)?
            .ok_or_else(|| ScreeningError::not_found("section", id))
    }

    // questions

    pub fn create_question(&self, draft: QuestionDraft) -> Result<QuestionView, ScreeningError> {
        validate_question(&draft)?;
        let form = draft.form.as_ref().map(|id| self.fetch_form(id)).transpose()?;
        let section = draft
            .section
            .as_ref()
            .map(|id| self.fetch_section(id))
            .transpose()?;
        let siblings = match (&section, &form) {
            (Some(section), _) => section.questions.len(),
            (None, Some(form)) => form.questions.len(),
            (None, None) => 0,
        };

        let mut batch = DraftBatch::default();
        let id = self.guarded(&mut batch, |catalog, batch| {
            let id = catalog.insert_draft(&draft, siblings as u32 + 1, batch)?;
            catalog.resolve_drafts(batch)?;
            if let Some(mut form) = form {
                form.questions.push(id.clone());
                form.last_modified = Utc::now();
                catalog.repository.update_form(form)?;
            }
            if let Some(mut section) = section {
                section.questions.push(id.clone());
                section.last_modified = Utc::now();
                catalog.repository.update_section(section)?;
            }
            Ok(id)
        })?;

        info!(question = %id, "question created");
        self.question_view(&id)
    }

    pub fn get_question(&self, id: &QuestionId) -> Result<QuestionView, ScreeningError> {
        self.question_view(id)
    }

    pub fn update_question(
        &self,
        id: &QuestionId,
        patch: QuestionPatch,
    ) -> Result<QuestionView, ScreeningError> {
        let mut question = self
            .repository
            .fetch_question(id)?
            .ok_or_else(|| ScreeningError::not_found("question", id))?;

        if let Some(text) = patch.question_text {
            if text.trim().is_empty() {
                return Err(ScreeningError::Validation(vec![
                    "Question Text is Empty".to_string(),
                ]));
            }
            question.question_text = text;
        }
        if let Some(prerequisites) = patch.prerequisites {
            for prerequisite in &prerequisites {
                if self.repository.fetch_question(&prerequisite.question)?.is_none() {
                    return Err(ScreeningError::Validation(vec![format!(
                        "Prerequisite question {} does not exist",
                        prerequisite.question
                    )]));
                }
            }
            question.prerequisites = prerequisites;
        }
        if let Some(remark) = patch.remark {
            question.remark = remark;
        }
        if let Some(question_type) = patch.question_type {
            question.question_type = question_type;
        }
        if let Some(number) = patch.number {
            question.number = number;
        }
        if let Some(required) = patch.required {
            question.required = required;
        }
        if let Some(factor) = patch.validation_factor {
            question.validation_factor = factor;
        }
        if let Some(unit) = patch.measurement_unit {
            question.measurement_unit = unit;
        }
        if let Some(options) = patch.options {
            question.options = options;
        }
        if let Some(values) = patch.values {
            question.values = values;
        }
        if let Some(show) = patch.show {
            question.show = show;
        }
        question.last_modified = Utc::now();
        self.repository.update_question(question)?;

        self.question_view(id)
    }

    /// Delete a question with its sub-questions and drop every reference to it.
    pub fn delete_question(&self, id: &QuestionId) -> Result<(), ScreeningError> {
        if self.repository.fetch_question(id)?.is_none() {
            return Err(ScreeningError::not_found("question", id));
        }
        let removed = question_tree(self.repository, std::slice::from_ref(id))?;
        for question in &removed {
            self.repository.delete_question(question)?;
        }

        for mut parent in self.repository.list_questions()? {
            if parent.sub_questions.contains(id) {
                parent.sub_questions.retain(|child| child != id);
                parent.last_modified = Utc::now();
                self.repository.update_question(parent)?;
            }
        }
        for mut form in self.repository.list_forms()? {
            if form.questions.contains(id) {
                form.questions.retain(|question| question != id);
                form.last_modified = Utc::now();
                self.repository.update_form(form)?;
            }
        }
        for mut section in self.repository.list_sections()? {
            if section.questions.contains(id) {
                section.questions.retain(|question| question != id);
                section.last_modified = Utc::now();
                self.repository.update_section(section)?;
            }
        }

        info!(question = %id, removed = removed.len(), "question deleted");
        Ok(())
    }

    pub fn list_questions(
        &self,
        request: PageRequest,
    ) -> Result<Page<QuestionView>, ScreeningError> {
        let page = Page::newest_first(self.repository.list_questions()?, request);
        let populator = self.populator();
        Ok(page.try_map(|question| {
            let sub_questions = populator.questions(&question.sub_questions)?;
            Ok::<_, RepositoryError>(QuestionView::assemble(question, sub_questions))
        })?)
    }

    // forms

    pub fn create_form(
        &self,
        draft: FormDraft,
        created_by: Option<AccountId>,
    ) -> Result<FormView, ScreeningError> {
        let mut errors = Vec::new();
        if draft.title.trim().is_empty() {
            errors.push("Form Title is Empty".to_string());
        }
        for question in draft
            .questions
            .iter()
            .chain(draft.sections.iter().flat_map(|section| &section.questions))
        {
            if let Err(ScreeningError::Validation(messages)) = validate_question(question) {
                errors.extend(messages);
            }
        }
        if !errors.is_empty() {
            return Err(ScreeningError::Validation(errors));
        }
        if self.repository.find_form_by_type(draft.form_type)?.is_some() {
            return Err(ScreeningError::Conflict(format!(
                "a {:?} form already exists",
                draft.form_type
            )));
        }

        let mut batch = DraftBatch::default();
        let mut sections_created = Vec::new();
        let outcome = (|| {
            let questions = self.insert_drafts(&draft.questions, &mut batch)?;
            let mut sections = Vec::with_capacity(draft.sections.len());
            for (index, section) in draft.sections.iter().enumerate() {
                let created = self.insert_section(section, index as u32 + 1, &mut batch)?;
                sections_created.push(created.clone());
                sections.push(created);
            }
            self.resolve_drafts(&batch)?;

            let now = Utc::now();
            let form = self.repository.insert_form(FormTemplate {
                id: FormId::generate(),
                form_type: draft.form_type,
                title: draft.title.clone(),
                subtitle: draft.subtitle.clone(),
                purpose: draft.purpose.clone(),
                layout: draft.layout,
                has_sections: !sections.is_empty(),
                questions,
                sections,
                disclaimer: draft.disclaimer.clone(),
                signatures: draft.signatures.clone(),
                created_by,
                date_created: now,
                last_modified: now,
            })?;
            Ok::<_, ScreeningError>(form)
        })();

        match outcome {
            Ok(form) => {
                info!(form = %form.id, questions = batch.created.len(), "form created");
                Ok(self.populator().form(form)?)
            }
            Err(err) => {
                for section in &sections_created {
                    let _ = self.repository.delete_section(section);
                }
                self.discard(&batch);
                Err(err)
            }
        }
    }

    pub fn get_form(&self, id: &FormId) -> Result<FormView, ScreeningError> {
        let form = self.fetch_form(id)?;
        Ok(self.populator().form(form)?)
    }

    pub fn find_form(&self, form_type: FormType) -> Result<FormView, ScreeningError> {
        let form = self
            .repository
            .find_form_by_type(form_type)?
            .ok_or_else(|| ScreeningError::not_found("form", format!("{form_type:?}")))?;
        Ok(self.populator().form(form)?)
    }

    pub fn update_form(&self, id: &FormId, patch: FormPatch) -> Result<FormView, ScreeningError> {
        let mut form = self.fetch_form(id)?;
        if let Some(title) = patch.title {
            form.title = title;
        }
        if let Some(subtitle) = patch.subtitle {
            form.subtitle = subtitle;
        }
        if let Some(purpose) = patch.purpose {
            form.purpose = purpose;
        }
        if let Some(layout) = patch.layout {
            form.layout = layout;
        }
        if let Some(disclaimer) = patch.disclaimer {
            form.disclaimer = disclaimer;
        }
        if let Some(signatures) = patch.signatures {
            form.signatures = signatures;
        }
        form.last_modified = Utc::now();
        self.repository.update_form(form.clone())?;
        Ok(self.populator().form(form)?)
    }

    /// Delete a form with its sections and every question it owns.
    pub fn delete_form(&self, id: &FormId) -> Result<(), ScreeningError> {
        let form = self.fetch_form(id)?;
        let mut roots = form.questions.clone();
        for section_id in &form.sections {
            if let Some(section) = self.repository.fetch_section(section_id)? {
                roots.extend(section.questions);
                self.repository.delete_section(section_id)?;
            }
        }
        for question in question_tree(self.repository, &roots)? {
            self.repository.delete_question(&question)?;
        }
        self.repository.delete_form(id)?;
        info!(form = %id, "form deleted");
        Ok(())
    }

    pub fn list_forms(&self, request: PageRequest) -> Result<Page<FormView>, ScreeningError> {
        let page = Page::newest_first(self.repository.list_forms()?, request);
        let populator = self.populator();
        Ok(page.try_map(|form| populator.form(form))?)
    }

    // sections

    pub fn create_section(
        &self,
        form_id: &FormId,
        draft: SectionDraft,
    ) -> Result<SectionView, ScreeningError> {
        if draft.title.trim().is_empty() {
            return Err(ScreeningError::Validation(vec![
                "Section Title is Empty".to_string(),
            ]));
        }
        let mut form = self.fetch_form(form_id)?;

        let mut batch = DraftBatch::default();
        let number = form.sections.len() as u32 + 1;
        let id = self.guarded(&mut batch, |catalog, batch| {
            let id = catalog.insert_section(&draft, number, batch)?;
            catalog.resolve_drafts(batch)?;
            Ok(id)
        })?;

        form.sections.push(id.clone());
        form.has_sections = true;
        form.last_modified = Utc::now();
        self.repository.update_form(form)?;

        info!(form = %form_id, section = %id, "section created");
        self.section_view(&id)
    }

    pub fn get_section(&self, id: &SectionId) -> Result<SectionView, ScreeningError> {
        self.section_view(id)
    }

    pub fn update_section(
        &self,
        id: &SectionId,
        patch: SectionPatch,
    ) -> Result<SectionView, ScreeningError> {
        let mut section = self.fetch_section(id)?;
        if let Some(title) = patch.title {
            section.title = title;
        }
        if let Some(number) = patch.number {
            section.number = number;
        }
        section.last_modified = Utc::now();
        self.repository.update_section(section)?;
        self.section_view(id)
    }

    pub fn delete_section(&self, id: &SectionId) -> Result<(), ScreeningError> {
        let section = self.fetch_section(id)?;
        for question in question_tree(self.repository, &section.questions)? {
            self.repository.delete_question(&question)?;
        }
        self.repository.delete_section(id)?;

        for mut form in self.repository.list_forms()? {
            if form.sections.contains(id) {
                form.sections.retain(|section| section != id);
                form.has_sections = !form.sections.is_empty();
                form.last_modified = Utc::now();
                self.repository.update_form(form)?;
            }
        }
        info!(section = %id, "section deleted");
        Ok(())
    }

    // draft plumbing

    fn guarded<T>(
        &self,
        batch: &mut DraftBatch,
        step: impl FnOnce(&Self, &mut DraftBatch) -> Result<T, ScreeningError>,
    ) -> Result<T, ScreeningError> {
        match step(self, batch) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.discard(batch);
                Err(err)
            }
        }
    }

    fn insert_drafts(
        &self,
        drafts: &[QuestionDraft],
        batch: &mut DraftBatch,
    ) -> Result<Vec<QuestionId>, ScreeningError> {
        drafts
            .iter()
            .enumerate()
            .map(|(index, draft)| self.insert_draft(draft, index as u32 + 1, batch))
            .collect()
    }

    fn insert_draft(
        &self,
        draft: &QuestionDraft,
        position: u32,
        batch: &mut DraftBatch,
    ) -> Result<QuestionId, ScreeningError> {
        let sub_questions = self.insert_drafts(&draft.sub_questions, batch)?;

        let mut question = Question::new(draft.question_text.trim(), draft.question_type);
        question.remark = draft.remark.clone();
        question.number = draft.number.unwrap_or(position);
        question.required = draft.required;
        question.validation_factor = draft.validation_factor;
        question.measurement_unit = draft.measurement_unit.clone();
        question.options = draft.options.clone();
        question.show = draft.show.unwrap_or(true);
        question.prerequisites = draft.prerequisites.clone();
        question.sub_questions = sub_questions;

        let question = self.repository.insert_question(question)?;
        batch.created.push(question.id.clone());
        batch
            .by_text
            .push((question.question_text.clone(), question.id.clone()));
        if !draft.depends_on.is_empty() {
            batch
                .pending
                .push((question.id.clone(), draft.depends_on.clone()));
        }
        debug!(question = %question.id, "draft question stored");
        Ok(question.id)
    }

    fn insert_section(
        &self,
        draft: &SectionDraft,
        position: u32,
        batch: &mut DraftBatch,
    ) -> Result<SectionId, ScreeningError> {
        let questions = self.insert_drafts(&draft.questions, batch)?;
        let mut section = Section::new(draft.title.trim(), draft.number.unwrap_or(position));
        section.questions = questions;
        Ok(self.repository.insert_section(section)?.id)
    }

    fn resolve_drafts(&self, batch: &DraftBatch) -> Result<(), ScreeningError> {
        for (id, depends_on) in &batch.pending {
            let mut resolved = Vec::with_capacity(depends_on.len());
            for dependency in depends_on {
                let target = batch
                    .by_text
                    .iter()
                    .find(|(text, _)| text == dependency.question_text.trim())
                    .map(|(_, target)| target.clone());
                match target {
                    Some(question) => resolved.push(Prerequisite {
                        question,
                        answer: dependency.answer.clone(),
                    }),
                    None => {
                        return Err(ScreeningError::Validation(vec![format!(
                            "Prerequisite question '{}' is not part of the draft",
                            dependency.question_text
                        )]))
                    }
                }
            }

            let mut question = self
                .repository
                .fetch_question(id)?
                .ok_or_else(|| ScreeningError::not_found("question", id))?;
            question.prerequisites.extend(resolved);
            self.repository.update_question(question)?;
        }
        Ok(())
    }

    fn discard(&self, batch: &DraftBatch) {
        for id in &batch.created {
            match self.repository.delete_question(id) {
                Ok(()) | Err(RepositoryError::NotFound) => {}
                Err(err) => warn!(question = %id, error = %err, "failed to remove draft question"),
            }
        }
    }
}

fn validate_question(draft: &QuestionDraft) -> Result<(), ScreeningError> {
    let mut errors = Vec::new();
    collect_question_errors(draft, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ScreeningError::Validation(errors))
    }
}

fn collect_question_errors(draft: &QuestionDraft, errors: &mut Vec<String>) {
    if draft.question_text.trim().is_empty() {
        errors.push("Question Text is Empty".to_string());
    }
    if matches!(
        draft.question_type,
        QuestionType::MultipleChoice | QuestionType::SingleChoice
    ) && draft.options.is_empty()
    {
        errors.push(format!(
            "Question '{}' needs options",
            draft.question_text.trim()
        ));
    }
    for sub_question in &draft.sub_questions {
        collect_question_errors(sub_question, errors);
    }
}
