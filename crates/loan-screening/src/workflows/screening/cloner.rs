//! Deep-copies a template (or a previous cycle's screening) into fresh,
//! screening-owned questions and sections.
//!
//! Cloning runs in batches: the top-level questions form one batch and every
//! section forms its own. Within a batch each clone is persisted with empty
//! prerequisites and a note is left in the batch's [`PrerequisiteLedger`]; once
//! the whole batch exists, [`FormCloner::relink_prerequisites`] rewrites the
//! original prerequisites onto the clones. References that leave the batch are
//! dropped.

use chrono::Utc;
use tracing::{debug, warn};

use super::domain::{
    FormTemplate, Prerequisite, Question, QuestionId, Screening, Section, SectionId,
};
use super::error::ScreeningError;
use super::repository::{QuestionStore, RepositoryError, SectionStore};

/// How a batch maps original prerequisite targets onto their clones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelinkStrategy {
    /// Match the referenced question's text against the batch's sources; the
    /// first clone in batch order wins. Sibling questions sharing a wording are
    /// indistinguishable.
    #[default]
    QuestionText,
    /// Follow the source id recorded for every clone.
    SourceId,
}

impl RelinkStrategy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "question_text" | "text" => Some(Self::QuestionText),
            "source_id" | "id" => Some(Self::SourceId),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::QuestionText => "question_text",
            Self::SourceId => "source_id",
        }
    }
}

/// Prerequisites a clone still has to receive once its batch is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPrerequisites {
    pub clone_id: QuestionId,
    pub source_id: QuestionId,
    pub source_text: String,
    pub original: Vec<Prerequisite>,
}

/// Scratch space owned by exactly one clone batch.
#[derive(Debug, Default)]
pub struct PrerequisiteLedger {
    notes: Vec<PendingPrerequisites>,
}

impl PrerequisiteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, note: PendingPrerequisites) {
        self.notes.push(note);
    }

    pub fn notes(&self) -> &[PendingPrerequisites] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Every clone created in this batch, sub-questions included.
    pub fn clone_ids(&self) -> impl Iterator<Item = &QuestionId> {
        self.notes.iter().map(|note| &note.clone_id)
    }

    pub fn clone_of_text(&self, text: &str) -> Option<&QuestionId> {
        self.notes
            .iter()
            .find(|note| note.source_text == text)
            .map(|note| &note.clone_id)
    }

    pub fn clone_of_source(&self, source: &QuestionId) -> Option<&QuestionId> {
        self.notes
            .iter()
            .find(|note| &note.source_id == source)
            .map(|note| &note.clone_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CloneError {
    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<CloneError> for ScreeningError {
    fn from(value: CloneError) -> Self {
        match value {
            CloneError::QuestionNotFound(id) => ScreeningError::not_found("question", id),
            CloneError::Repository(err) => ScreeningError::Repository(err),
        }
    }
}

/// The question/section skeleton a clone starts from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormOutline {
    pub questions: Vec<QuestionId>,
    pub sections: Vec<SectionId>,
}

impl From<&FormTemplate> for FormOutline {
    fn from(form: &FormTemplate) -> Self {
        Self {
            questions: form.questions.clone(),
            sections: form.sections.clone(),
        }
    }
}

impl From<&Screening> for FormOutline {
    fn from(screening: &Screening) -> Self {
        Self {
            questions: screening.questions.clone(),
            sections: screening.sections.clone(),
        }
    }
}

/// Result of [`FormCloner::clone_form`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClonedForm {
    /// Top-level question clones, in outline order.
    pub questions: Vec<QuestionId>,
    pub sections: Vec<SectionId>,
    /// Every question created by the call, nested clones included.
    pub created_questions: Vec<QuestionId>,
}

pub struct FormCloner<'a, R: ?Sized> {
    repository: &'a R,
    strategy: RelinkStrategy,
}

impl<'a, R> FormCloner<'a, R>
where
    R: QuestionStore + SectionStore + ?Sized,
{
    pub fn new(repository: &'a R, strategy: RelinkStrategy) -> Self {
        Self {
            repository,
            strategy,
        }
    }

    /// Clone one question and, recursively, its sub-questions. Missing
    /// sub-questions are skipped; a missing `source` is reported to the caller.
    pub fn clone_question(
        &self,
        source: &QuestionId,
        ledger: &mut PrerequisiteLedger,
    ) -> Result<Question, CloneError> {
        let original = self
            .repository
            .fetch_question(source)?
            .ok_or_else(|| CloneError::QuestionNotFound(source.clone()))?;

        let mut sub_questions = Vec::with_capacity(original.sub_questions.len());
        for child in &original.sub_questions {
            match self.clone_question(child, ledger) {
                Ok(clone) => sub_questions.push(clone.id),
                Err(CloneError::QuestionNotFound(missing)) => {
                    warn!(
                        parent = %original.id,
                        question = %missing,
                        "sub-question missing, skipped"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let now = Utc::now();
        let mut clone = original.clone();
        clone.id = QuestionId::generate();
        clone.sub_questions = sub_questions;
        clone.prerequisites = Vec::new();
        clone.values = Vec::new();
        clone.date_created = now;
        clone.last_modified = now;

        let clone = self.repository.insert_question(clone)?;
        ledger.record(PendingPrerequisites {
            clone_id: clone.id.clone(),
            source_id: original.id,
            source_text: original.question_text,
            original: original.prerequisites,
        });

        Ok(clone)
    }

    /// Rewrite every pending note's prerequisites onto clones of the same batch.
    pub fn relink_prerequisites(&self, ledger: &PrerequisiteLedger) -> Result<(), CloneError> {
        for note in ledger.notes() {
            if note.original.is_empty() {
                continue;
            }

            let mut relinked = Vec::with_capacity(note.original.len());
            for prerequisite in &note.original {
                match self.resolve(prerequisite, ledger)? {
                    Some(target) => relinked.push(Prerequisite {
                        question: target,
                        answer: prerequisite.answer.clone(),
                    }),
                    None => debug!(
                        clone = %note.clone_id,
                        target = %prerequisite.question,
                        "prerequisite outside clone batch, dropped"
                    ),
                }
            }

            if relinked.is_empty() {
                continue;
            }

            let mut clone = self
                .repository
                .fetch_question(&note.clone_id)?
                .ok_or(RepositoryError::NotFound)?;
            clone.prerequisites = relinked;
            clone.last_modified = Utc::now();
            self.repository.update_question(clone)?;
        }

        Ok(())
    }

    fn resolve(
        &self,
        prerequisite: &Prerequisite,
        ledger: &PrerequisiteLedger,
    ) -> Result<Option<QuestionId>, CloneError> {
        match self.strategy {
            RelinkStrategy::SourceId => Ok(ledger.clone_of_source(&prerequisite.question).cloned()),
            RelinkStrategy::QuestionText => {
                let Some(target) = self.repository.fetch_question(&prerequisite.question)? else {
                    return Ok(None);
                };
                Ok(ledger.clone_of_text(&target.question_text).cloned())
            }
        }
    }

    /// Clone an outline: top-level questions as one batch, then each section as
    /// its own batch. On a persistence failure everything created so far is
    /// removed before the error is returned.
    pub fn clone_form(&self, outline: &FormOutline) -> Result<ClonedForm, CloneError> {
        let mut form = ClonedForm::default();
        match self.clone_outline(outline, &mut form) {
            Ok(()) => Ok(form),
            Err(err) => {
                warn!(error = %err, "form clone failed, removing partial clones");
                self.discard(&form);
                Err(err)
            }
        }
    }

    fn clone_outline(
        &self,
        outline: &FormOutline,
        form: &mut ClonedForm,
    ) -> Result<(), CloneError> {
        let top_level = self.clone_batch(&outline.questions, form)?;
        form.questions = top_level;

        for section_id in &outline.sections {
            let Some(section) = self.repository.fetch_section(section_id)? else {
                warn!(section = %section_id, "section missing, skipped");
                continue;
            };

            let questions = self.clone_batch(&section.questions, form)?;
            let now = Utc::now();
            let clone = self.repository.insert_section(Section {
                id: SectionId::generate(),
                title: section.title,
                number: section.number,
                questions,
                date_created: now,
                last_modified: now,
            })?;
            form.sections.push(clone.id);
        }

        Ok(())
    }

    fn clone_batch(
        &self,
        sources: &[QuestionId],
        form: &mut ClonedForm,
    ) -> Result<Vec<QuestionId>, CloneError> {
        let mut ledger = PrerequisiteLedger::new();
        let mut cloned = Vec::with_capacity(sources.len());
        let mut outcome = Ok(());

        for source in sources {
            match self.clone_question(source, &mut ledger) {
                Ok(clone) => cloned.push(clone.id),
                Err(CloneError::QuestionNotFound(missing)) => {
                    warn!(question = %missing, "question missing, skipped");
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        form.created_questions.extend(ledger.clone_ids().cloned());
        outcome?;
        self.relink_prerequisites(&ledger)?;
        Ok(cloned)
    }

    /// Best-effort removal of everything a clone created.
    pub fn discard(&self, form: &ClonedForm) {
        for section in &form.sections {
            match self.repository.delete_section(section) {
                Ok(()) | Err(RepositoryError::NotFound) => {}
                Err(err) => {
                    warn!(section = %section, error = %err, "failed to remove cloned section")
                }
            }
        }
        for question in &form.created_questions {
            match self.repository.delete_question(question) {
                Ok(()) | Err(RepositoryError::NotFound) => {}
                Err(err) => {
                    warn!(question = %question, error = %err, "failed to remove cloned question")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(clone: &str, source: &str, text: &str) -> PendingPrerequisites {
        PendingPrerequisites {
            clone_id: QuestionId::from(clone),
            source_id: QuestionId::from(source),
            source_text: text.to_string(),
            original: Vec::new(),
        }
    }

    #[test]
    fn text_lookup_returns_first_match_in_batch_order() {
        let mut ledger = PrerequisiteLedger::new();
        ledger.record(note("clone-1", "src-1", "Is the farm irrigated?"));
        ledger.record(note("clone-2", "src-2", "Is the farm irrigated?"));

        assert_eq!(
            ledger.clone_of_text("Is the farm irrigated?"),
            Some(&QuestionId::from("clone-1"))
        );
        assert_eq!(
            ledger.clone_of_source(&QuestionId::from("src-2")),
            Some(&QuestionId::from("clone-2"))
        );
        assert_eq!(ledger.clone_of_text("Owns cattle?"), None);
    }

    #[test]
    fn strategy_parse_accepts_config_values() {
        assert_eq!(
            RelinkStrategy::parse("Question_Text"),
            Some(RelinkStrategy::QuestionText)
        );
        assert_eq!(RelinkStrategy::parse(" source_id "), Some(RelinkStrategy::SourceId));
        assert_eq!(RelinkStrategy::parse("fuzzy"), None);
        assert_eq!(RelinkStrategy::default().label(), "question_text");
    }
}
