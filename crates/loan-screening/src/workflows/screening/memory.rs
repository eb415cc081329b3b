use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use super::domain::{
    AcatId, AcatSummary, AccountId, Client, ClientId, FormId, FormTemplate, FormType,
    HistoryEntry, LoanId, LoanSummary, Notification, NotificationId, Question, QuestionId,
    Screening, ScreeningId, Section, SectionId, Task, TaskId, TaskStatus,
};
use super::repository::{
    ApplicationDirectory, ClientDirectory, FormTemplateStore, HistoryStore, NotificationStore,
    QuestionStore, RepositoryError, ScreeningStore, SectionStore, TaskStore,
};

struct Table<K, V> {
    rows: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Table<K, V> {
    fn insert(&self, key: K, value: V) -> Result<V, RepositoryError> {
        let mut guard = self.rows.lock().expect("repository mutex poisoned");
        if guard.contains_key(&key) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(key, value.clone());
        Ok(value)
    }

    fn update(&self, key: K, value: V) -> Result<(), RepositoryError> {
        let mut guard = self.rows.lock().expect("repository mutex poisoned");
        match guard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn upsert(&self, key: K, value: V) {
        let mut guard = self.rows.lock().expect("repository mutex poisoned");
        guard.insert(key, value);
    }

    fn fetch(&self, key: &K) -> Option<V> {
        let guard = self.rows.lock().expect("repository mutex poisoned");
        guard.get(key).cloned()
    }

    fn remove(&self, key: &K) -> Result<(), RepositoryError> {
        let mut guard = self.rows.lock().expect("repository mutex poisoned");
        guard.remove(key).map(|_| ()).ok_or(RepositoryError::NotFound)
    }

    fn filter(&self, predicate: impl Fn(&V) -> bool) -> Vec<V> {
        let guard = self.rows.lock().expect("repository mutex poisoned");
        guard
            .values()
            .filter(|value| predicate(value))
            .cloned()
            .collect()
    }

    fn values(&self) -> Vec<V> {
        self.filter(|_| true)
    }

    fn len(&self) -> usize {
        self.rows.lock().expect("repository mutex poisoned").len()
    }
}

/// Mutex-guarded maps implementing every store the workflow needs. Backs the
/// API service and the test suites; clones share the same underlying tables.
#[derive(Default, Clone)]
pub struct InMemoryScreeningStore {
    questions: Table<QuestionId, Question>,
    sections: Table<SectionId, Section>,
    forms: Table<FormId, FormTemplate>,
    screenings: Table<ScreeningId, Screening>,
    histories: Table<ClientId, HistoryEntry>,
    clients: Table<ClientId, Client>,
    loans: Table<LoanId, LoanSummary>,
    acats: Table<AcatId, AcatSummary>,
    tasks: Table<TaskId, Task>,
    notifications: Table<NotificationId, Notification>,
}

impl InMemoryScreeningStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stand-in for the loan module reporting a loan application.
    pub fn upsert_loan(&self, loan: LoanSummary) {
        self.loans.upsert(loan.id.clone(), loan);
    }

    /// Stand-in for the ACAT module reporting an assessment.
    pub fn upsert_acat(&self, acat: AcatSummary) {
        self.acats.upsert(acat.id.clone(), acat);
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl QuestionStore for InMemoryScreeningStore {
    fn insert_question(&self, question: Question) -> Result<Question, RepositoryError> {
        tracing::debug!(question = %question.id, "insert question");
        self.questions.insert(question.id.clone(), question)
    }

    fn update_question(&self, question: Question) -> Result<(), RepositoryError> {
        self.questions.update(question.id.clone(), question)
    }

    fn fetch_question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError> {
        Ok(self.questions.fetch(id))
    }

    fn delete_question(&self, id: &QuestionId) -> Result<(), RepositoryError> {
        tracing::debug!(question = %id, "delete question");
        self.questions.remove(id)
    }

    fn list_questions(&self) -> Result<Vec<Question>, RepositoryError> {
        Ok(self.questions.values())
    }
}

impl SectionStore for InMemoryScreeningStore {
    fn insert_section(&self, section: Section) -> Result<Section, RepositoryError> {
        tracing::debug!(section = %section.id, "insert section");
        self.sections.insert(section.id.clone(), section)
    }

    fn update_section(&self, section: Section) -> Result<(), RepositoryError> {
        self.sections.update(section.id.clone(), section)
    }

    fn fetch_section(&self, id: &SectionId) -> Result<Option<Section>, RepositoryError> {
        Ok(self.sections.fetch(id))
    }

    fn delete_section(&self, id: &SectionId) -> Result<(), RepositoryError> {
        self.sections.remove(id)
    }

    fn list_sections(&self) -> Result<Vec<Section>, RepositoryError> {
        Ok(self.sections.values())
    }
}

impl FormTemplateStore for InMemoryScreeningStore {
    fn insert_form(&self, form: FormTemplate) -> Result<FormTemplate, RepositoryError> {
        self.forms.insert(form.id.clone(), form)
    }

    fn update_form(&self, form: FormTemplate) -> Result<(), RepositoryError> {
        self.forms.update(form.id.clone(), form)
    }

    fn fetch_form(&self, id: &FormId) -> Result<Option<FormTemplate>, RepositoryError> {
        Ok(self.forms.fetch(id))
    }

    fn delete_form(&self, id: &FormId) -> Result<(), RepositoryError> {
        self.forms.remove(id)
    }

    fn list_forms(&self) -> Result<Vec<FormTemplate>, RepositoryError> {
        Ok(self.forms.values())
    }

    fn find_form_by_type(
        &self,
        form_type: FormType,
    ) -> Result<Option<FormTemplate>, RepositoryError> {
        Ok(self
            .forms
            .filter(|form| form.form_type == form_type)
            .into_iter()
            .min_by_key(|form| form.date_created))
    }
}

impl ScreeningStore for InMemoryScreeningStore {
    fn insert_screening(&self, screening: Screening) -> Result<Screening, RepositoryError> {
        tracing::debug!(screening = %screening.id, client = %screening.client, "insert screening");
        self.screenings.insert(screening.id.clone(), screening)
    }

    fn update_screening(&self, screening: Screening) -> Result<(), RepositoryError> {
        self.screenings.update(screening.id.clone(), screening)
    }

    fn fetch_screening(&self, id: &ScreeningId) -> Result<Option<Screening>, RepositoryError> {
        Ok(self.screenings.fetch(id))
    }

    fn delete_screening(&self, id: &ScreeningId) -> Result<(), RepositoryError> {
        self.screenings.remove(id)
    }

    fn list_screenings(&self) -> Result<Vec<Screening>, RepositoryError> {
        Ok(self.screenings.values())
    }

    fn screenings_for_client(&self, client: &ClientId) -> Result<Vec<Screening>, RepositoryError> {
        Ok(self.screenings.filter(|screening| &screening.client == client))
    }
}

impl HistoryStore for InMemoryScreeningStore {
    fn insert_history(&self, entry: HistoryEntry) -> Result<HistoryEntry, RepositoryError> {
        self.histories.insert(entry.client.clone(), entry)
    }

    fn update_history(&self, entry: HistoryEntry) -> Result<(), RepositoryError> {
        self.histories.update(entry.client.clone(), entry)
    }

    fn history_for_client(
        &self,
        client: &ClientId,
    ) -> Result<Option<HistoryEntry>, RepositoryError> {
        Ok(self.histories.fetch(client))
    }

    fn delete_history(&self, client: &ClientId) -> Result<(), RepositoryError> {
        self.histories.remove(client)
    }

    fn list_histories(&self) -> Result<Vec<HistoryEntry>, RepositoryError> {
        Ok(self.histories.values())
    }
}

impl ClientDirectory for InMemoryScreeningStore {
    fn insert_client(&self, client: Client) -> Result<Client, RepositoryError> {
        self.clients.insert(client.id.clone(), client)
    }

    fn update_client(&self, client: Client) -> Result<(), RepositoryError> {
        self.clients.update(client.id.clone(), client)
    }

    fn fetch_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError> {
        Ok(self.clients.fetch(id))
    }

    fn delete_client(&self, id: &ClientId) -> Result<(), RepositoryError> {
        self.clients.remove(id)
    }

    fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError> {
        Ok(self
            .clients
            .filter(|client| client.phone == phone)
            .into_iter()
            .next())
    }
}

impl ApplicationDirectory for InMemoryScreeningStore {
    fn loans_for_client(&self, client: &ClientId) -> Result<Vec<LoanSummary>, RepositoryError> {
        Ok(self.loans.filter(|loan| &loan.client == client))
    }

    fn acats_for_client(&self, client: &ClientId) -> Result<Vec<AcatSummary>, RepositoryError> {
        Ok(self.acats.filter(|acat| &acat.client == client))
    }

    fn fetch_loan(&self, id: &LoanId) -> Result<Option<LoanSummary>, RepositoryError> {
        Ok(self.loans.fetch(id))
    }

    fn fetch_acat(&self, id: &AcatId) -> Result<Option<AcatSummary>, RepositoryError> {
        Ok(self.acats.fetch(id))
    }
}

impl TaskStore for InMemoryScreeningStore {
    fn insert_task(&self, task: Task) -> Result<Task, RepositoryError> {
        self.tasks.insert(task.id.clone(), task)
    }

    fn update_task(&self, task: Task) -> Result<(), RepositoryError> {
        self.tasks.update(task.id.clone(), task)
    }

    fn pending_task_for(&self, entity_ref: &str) -> Result<Option<Task>, RepositoryError> {
        Ok(self
            .tasks
            .filter(|task| task.entity_ref == entity_ref && task.status == TaskStatus::Pending)
            .into_iter()
            .max_by_key(|task| task.date_created))
    }

    fn tasks_for_entity(&self, entity_ref: &str) -> Result<Vec<Task>, RepositoryError> {
        let mut tasks = self.tasks.filter(|task| task.entity_ref == entity_ref);
        tasks.sort_by_key(|task| task.date_created);
        Ok(tasks)
    }
}

impl NotificationStore for InMemoryScreeningStore {
    fn insert_notification(
        &self,
        notification: Notification,
    ) -> Result<Notification, RepositoryError> {
        self.notifications
            .insert(notification.id.clone(), notification)
    }

    fn notifications_for(&self, account: &AccountId) -> Result<Vec<Notification>, RepositoryError> {
        let mut notifications = self
            .notifications
            .filter(|notification| &notification.for_user == account);
        notifications.sort_by_key(|notification| notification.date_created);
        Ok(notifications)
    }

    fn list_notifications(&self) -> Result<Vec<Notification>, RepositoryError> {
        Ok(self.notifications.values())
    }
}
