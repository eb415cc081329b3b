use std::collections::HashSet;

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::domain::{
    AccountId, Actor, Capability, Client, ClientStatus, Notification, NotificationId, QuestionId,
    Screening, ScreeningId, ScreeningStatus, SectionId, Task, TaskId, TaskStatus, TaskType,
};
use super::error::ScreeningError;
use super::repository::{RepositoryError, ScreeningRepository};
use super::views::question_tree;

pub(crate) const SCREENING_ENTITY: &str = "screening";

/// Body of `PUT /screenings/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreeningUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub questions: Vec<AnswerUpdate>,
    #[serde(default)]
    pub sections: Vec<SectionAnswers>,
}

/// Answer edit for one cloned question.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerUpdate {
    #[serde(rename = "_id")]
    pub id: QuestionId,
    #[serde(default)]
    pub values: Option<Vec<String>>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub show: Option<bool>,
    #[serde(default)]
    pub sub_questions: Vec<AnswerUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionAnswers {
    #[serde(rename = "_id", default)]
    pub id: Option<SectionId>,
    #[serde(default)]
    pub questions: Vec<AnswerUpdate>,
}

/// Reject transitions outside the table and decisions made without `AUTHORIZE`.
pub fn check_transition(
    current: ScreeningStatus,
    next: ScreeningStatus,
    actor: &Actor,
) -> Result<(), ScreeningError> {
    if current == next {
        return Err(ScreeningError::RedundantTransition(next));
    }
    if next.requires_authorization() && !actor.can(Capability::Authorize) {
        return Err(ScreeningError::PermissionDenied {
            capability: Capability::Authorize,
        });
    }
    if !current.can_transition_to(next) {
        return Err(ScreeningError::InvalidTransition {
            from: current,
            to: next,
        });
    }
    Ok(())
}

/// Drives screening status changes and the client/task/notification effects
/// attached to them.
pub struct WorkflowCoordinator<'a, R: ?Sized> {
    repository: &'a R,
}

impl<'a, R> WorkflowCoordinator<'a, R>
where
    R: ScreeningRepository + ?Sized,
{
    pub fn new(repository: &'a R) -> Self {
        Self { repository }
    }

    pub fn apply_update(
        &self,
        id: &ScreeningId,
        update: ScreeningUpdate,
        actor: &Actor,
    ) -> Result<Screening, ScreeningError> {
        let mut screening = self
            .repository
            .fetch_screening(id)?
            .ok_or_else(|| ScreeningError::not_found("screening", id))?;

        let target = match update.status.as_deref() {
            Some(raw) => Some(ScreeningStatus::parse(raw).ok_or_else(|| {
                ScreeningError::Validation(vec![format!("unknown screening status '{raw}'")])
            })?),
            None => None,
        };
        if let Some(next) = target {
            check_transition(screening.status, next, actor)?;
        }

        if !update.questions.is_empty() || !update.sections.is_empty() {
            let owned = self.owned_questions(&screening)?;
            let mut applied = self.apply_answers(&update.questions, &owned)?;
            for section in &update.sections {
                if let Some(section_id) = &section.id {
                    if !screening.sections.contains(section_id) {
                        warn!(
                            screening = %id,
                            section = %section_id,
                            "section not part of screening, skipped"
                        );
                        continue;
                    }
                }
                applied += self.apply_answers(&section.questions, &owned)?;
            }
            info!(screening = %id, answers = applied, "screening answers updated");
        }

        if let Some(comment) = update.comment {
            screening.comment = comment;
        }
        let previous = screening.status;
        if let Some(next) = target {
            screening.status = next;
        }
        screening.last_modified = Utc::now();
        self.repository.update_screening(screening.clone())?;

        if let Some(next) = target {
            info!(
                screening = %id,
                client = %screening.client,
                from = previous.label(),
                to = next.label(),
                "screening status changed"
            );
            self.fire_side_effects(&screening, next, actor)?;
        }

        Ok(screening)
    }

    /// Question clones reachable from the screening's top level and sections.
    fn owned_questions(
        &self,
        screening: &Screening,
    ) -> Result<HashSet<QuestionId>, ScreeningError> {
        let mut roots = screening.questions.clone();
        for section_id in &screening.sections {
            if let Some(section) = self.repository.fetch_section(section_id)? {
                roots.extend(section.questions);
            }
        }
        Ok(question_tree(self.repository, &roots)?.into_iter().collect())
    }

    fn apply_answers(
        &self,
        updates: &[AnswerUpdate],
        owned: &HashSet<QuestionId>,
    ) -> Result<usize, ScreeningError> {
        let mut applied = 0;
        for update in updates {
            if !owned.contains(&update.id) {
                warn!(question = %update.id, "answer for question outside screening, skipped");
                continue;
            }
            let Some(mut question) = self.repository.fetch_question(&update.id)? else {
                warn!(question = %update.id, "answered question missing, skipped");
                continue;
            };

            if let Some(values) = &update.values {
                question.values = values.clone();
            }
            if let Some(remark) = &update.remark {
                question.remark = remark.clone();
            }
            if let Some(show) = update.show {
                question.show = show;
            }
            question.last_modified = Utc::now();
            self.repository.update_question(question)?;
            applied += 1;

            applied += self.apply_answers(&update.sub_questions, owned)?;
        }
        Ok(applied)
    }

    fn fire_side_effects(
        &self,
        screening: &Screening,
        status: ScreeningStatus,
        actor: &Actor,
    ) -> Result<(), ScreeningError> {
        let mut client = self
            .repository
            .fetch_client(&screening.client)?
            .ok_or_else(|| ScreeningError::not_found("client", &screening.client))?;
        let name = client.full_name();

        match status {
            ScreeningStatus::Submitted => {
                self.set_client_status(&mut client, ClientStatus::ScreeningInprogress)?;
                let task = self.repository.insert_task(new_task(
                    format!("Approve Submitted Screening Form of {name}"),
                    TaskType::Approve,
                    screening,
                    actor,
                    None,
                ))?;
                info!(screening = %screening.id, task = %task.id, "approval task created");
            }
            ScreeningStatus::Approved => {
                self.set_client_status(&mut client, ClientStatus::Eligible)?;
                if let Some(task) = self.complete_pending_task(screening)? {
                    self.notify(
                        format!("Screening Application of {name} has been approved"),
                        &task.id,
                        &task.created_by,
                    )?;
                }
            }
            ScreeningStatus::DeclinedFinal => {
                self.set_client_status(&mut client, ClientStatus::Ineligible)?;
                if let Some(task) = self.complete_pending_task(screening)? {
                    self.notify(
                        format!("Screening Application of {name} has been declined in final"),
                        &task.id,
                        &task.created_by,
                    )?;
                }
            }
            ScreeningStatus::DeclinedUnderReview => {
                self.set_client_status(&mut client, ClientStatus::ScreeningInprogress)?;
                if let Some(task) = self.complete_pending_task(screening)? {
                    let review = self.repository.insert_task(new_task(
                        format!("Review Declined Screening Form of {name}"),
                        TaskType::Review,
                        screening,
                        actor,
                        Some(task.created_by.clone()),
                    ))?;
                    self.notify(
                        format!(
                            "Screening Application of {name} has been declined for further review"
                        ),
                        &review.id,
                        &actor.account,
                    )?;
                }
            }
            ScreeningStatus::New | ScreeningStatus::ScreeningInprogress => {}
        }

        Ok(())
    }

    fn set_client_status(
        &self,
        client: &mut Client,
        status: ClientStatus,
    ) -> Result<(), ScreeningError> {
        client.status = status;
        client.last_modified = Utc::now();
        self.repository.update_client(client.clone())?;
        info!(client = %client.id, status = status.label(), "client status updated");
        Ok(())
    }

    fn complete_pending_task(
        &self,
        screening: &Screening,
    ) -> Result<Option<Task>, ScreeningError> {
        let Some(mut task) = self.repository.pending_task_for(screening.id.as_str())? else {
            warn!(screening = %screening.id, "no pending task for screening decision");
            return Ok(None);
        };
        task.status = TaskStatus::Completed;
        task.comment = screening.comment.clone();
        task.last_modified = Utc::now();
        self.repository.update_task(task.clone())?;
        Ok(Some(task))
    }

    fn notify(
        &self,
        message: String,
        task: &TaskId,
        recipient: &AccountId,
    ) -> Result<(), ScreeningError> {
        self.repository.insert_notification(Notification {
            id: NotificationId::generate(),
            message,
            task_ref: task.clone(),
            for_user: recipient.clone(),
            date_created: Utc::now(),
        })?;
        Ok(())
    }

    /// Remove a screening with its sections and every question clone it owns.
    pub fn delete_screening(&self, id: &ScreeningId) -> Result<Screening, ScreeningError> {
        let screening = self
            .repository
            .fetch_screening(id)?
            .ok_or_else(|| ScreeningError::not_found("screening", id))?;

        let mut roots = screening.questions.clone();
        for section_id in &screening.sections {
            if let Some(section) = self.repository.fetch_section(section_id)? {
                roots.extend(section.questions);
                self.repository.delete_section(section_id)?;
            }
        }
        for question in question_tree(self.repository, &roots)? {
            match self.repository.delete_question(&question) {
                Ok(()) | Err(RepositoryError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.repository.delete_screening(id)?;

        info!(screening = %id, client = %screening.client, "screening deleted");
        Ok(screening)
    }
}

fn new_task(
    text: String,
    task_type: TaskType,
    screening: &Screening,
    actor: &Actor,
    assignee: Option<AccountId>,
) -> Task {
    let now = Utc::now();
    Task {
        id: TaskId::generate(),
        task: text,
        task_type,
        entity_ref: screening.id.as_str().to_string(),
        entity_type: SCREENING_ENTITY.to_string(),
        status: TaskStatus::Pending,
        created_by: actor.account.clone(),
        user: assignee,
        branch: screening.branch.clone(),
        comment: String::new(),
        date_created: now,
        last_modified: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn officer() -> Actor {
        Actor::new(
            AccountId::from("officer"),
            [Capability::Create, Capability::Update, Capability::View],
        )
    }

    fn supervisor() -> Actor {
        Actor::new(
            AccountId::from("supervisor"),
            [Capability::Update, Capability::Authorize],
        )
    }

    #[test]
    fn redundant_transition_is_checked_before_permissions() {
        let err = check_transition(ScreeningStatus::Approved, ScreeningStatus::Approved, &officer())
            .expect_err("same status rejected");
        assert!(matches!(
            err,
            ScreeningError::RedundantTransition(ScreeningStatus::Approved)
        ));
    }

    #[test]
    fn decisions_require_authorize() {
        for decision in [
            ScreeningStatus::Approved,
            ScreeningStatus::DeclinedFinal,
            ScreeningStatus::DeclinedUnderReview,
        ] {
            let err = check_transition(ScreeningStatus::Submitted, decision, &officer())
                .expect_err("officer cannot decide");
            assert!(matches!(err, ScreeningError::PermissionDenied { .. }));
            check_transition(ScreeningStatus::Submitted, decision, &supervisor())
                .expect("supervisor decides");
        }
    }

    #[test]
    fn transitions_outside_the_table_are_rejected() {
        let err = check_transition(ScreeningStatus::New, ScreeningStatus::Approved, &supervisor())
            .expect_err("cannot approve unsubmitted screening");
        assert!(matches!(
            err,
            ScreeningError::InvalidTransition {
                from: ScreeningStatus::New,
                to: ScreeningStatus::Approved
            }
        ));
        check_transition(
            ScreeningStatus::DeclinedUnderReview,
            ScreeningStatus::Submitted,
            &officer(),
        )
        .expect("resubmission after review");
    }
}
