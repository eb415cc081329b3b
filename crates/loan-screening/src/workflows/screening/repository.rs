use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AcatId, AcatSummary, AccountId, Client, ClientId, FormId, FormTemplate, FormType,
    HistoryEntry, LoanId, LoanSummary, Notification, Question, QuestionId, Screening,
    ScreeningId, Section, SectionId, Task,
};

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

pub trait QuestionStore: Send + Sync {
    fn insert_question(&self, question: Question) -> Result<Question, RepositoryError>;
    fn update_question(&self, question: Question) -> Result<(), RepositoryError>;
    fn fetch_question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError>;
    fn delete_question(&self, id: &QuestionId) -> Result<(), RepositoryError>;
    fn list_questions(&self) -> Result<Vec<Question>, RepositoryError>;
}

pub trait SectionStore: Send + Sync {
    fn insert_section(&self, section: Section) -> Result<Section, RepositoryError>;
    fn update_section(&self, section: Section) -> Result<(), RepositoryError>;
    fn fetch_section(&self, id: &SectionId) -> Result<Option<Section>, RepositoryError>;
    fn delete_section(&self, id: &SectionId) -> Result<(), RepositoryError>;
    fn list_sections(&self) -> Result<Vec<Section>, RepositoryError>;
}

pub trait FormTemplateStore: Send + Sync {
    fn insert_form(&self, form: FormTemplate) -> Result<FormTemplate, RepositoryError>;
    fn update_form(&self, form: FormTemplate) -> Result<(), RepositoryError>;
    fn fetch_form(&self, id: &FormId) -> Result<Option<FormTemplate>, RepositoryError>;
    fn delete_form(&self, id: &FormId) -> Result<(), RepositoryError>;
    fn list_forms(&self) -> Result<Vec<FormTemplate>, RepositoryError>;
    /// Oldest template of the given type, when several exist.
    fn find_form_by_type(&self, form_type: FormType)
        -> Result<Option<FormTemplate>, RepositoryError>;
}

pub trait ScreeningStore: Send + Sync {
    fn insert_screening(&self, screening: Screening) -> Result<Screening, RepositoryError>;
    fn update_screening(&self, screening: Screening) -> Result<(), RepositoryError>;
    fn fetch_screening(&self, id: &ScreeningId) -> Result<Option<Screening>, RepositoryError>;
    fn delete_screening(&self, id: &ScreeningId) -> Result<(), RepositoryError>;
    fn list_screenings(&self) -> Result<Vec<Screening>, RepositoryError>;
    fn screenings_for_client(&self, client: &ClientId) -> Result<Vec<Screening>, RepositoryError>;
}

pub trait HistoryStore: Send + Sync {
    fn insert_history(&self, entry: HistoryEntry) -> Result<HistoryEntry, RepositoryError>;
    fn update_history(&self, entry: HistoryEntry) -> Result<(), RepositoryError>;
    fn history_for_client(&self, client: &ClientId)
        -> Result<Option<HistoryEntry>, RepositoryError>;
    fn delete_history(&self, client: &ClientId) -> Result<(), RepositoryError>;
    fn list_histories(&self) -> Result<Vec<HistoryEntry>, RepositoryError>;
}

/// Client records are owned by client management; the workflow reads them and
/// issues narrow updates.
pub trait ClientDirectory: Send + Sync {
    fn insert_client(&self, client: Client) -> Result<Client, RepositoryError>;
    fn update_client(&self, client: Client) -> Result<(), RepositoryError>;
    fn fetch_client(&self, id: &ClientId) -> Result<Option<Client>, RepositoryError>;
    fn delete_client(&self, id: &ClientId) -> Result<(), RepositoryError>;
    fn find_client_by_phone(&self, phone: &str) -> Result<Option<Client>, RepositoryError>;
}

/// Read-only view onto the loan and ACAT modules.
pub trait ApplicationDirectory: Send + Sync {
    fn loans_for_client(&self, client: &ClientId) -> Result<Vec<LoanSummary>, RepositoryError>;
    fn acats_for_client(&self, client: &ClientId) -> Result<Vec<AcatSummary>, RepositoryError>;
    fn fetch_loan(&self, id: &LoanId) -> Result<Option<LoanSummary>, RepositoryError>;
    fn fetch_acat(&self, id: &AcatId) -> Result<Option<AcatSummary>, RepositoryError>;
}

pub trait TaskStore: Send + Sync {
    fn insert_task(&self, task: Task) -> Result<Task, RepositoryError>;
    fn update_task(&self, task: Task) -> Result<(), RepositoryError>;
    /// Most recent pending task referencing the entity, if any.
    fn pending_task_for(&self, entity_ref: &str) -> Result<Option<Task>, RepositoryError>;
    fn tasks_for_entity(&self, entity_ref: &str) -> Result<Vec<Task>, RepositoryError>;
}

pub trait NotificationStore: Send + Sync {
    fn insert_notification(
        &self,
        notification: Notification,
    ) -> Result<Notification, RepositoryError>;
    fn notifications_for(&self, account: &AccountId) -> Result<Vec<Notification>, RepositoryError>;
    fn list_notifications(&self) -> Result<Vec<Notification>, RepositoryError>;
}

/// Everything the screening workflow needs from persistence.
pub trait ScreeningRepository:
    QuestionStore
    + SectionStore
    + FormTemplateStore
    + ScreeningStore
    + HistoryStore
    + ClientDirectory
    + ApplicationDirectory
    + TaskStore
    + NotificationStore
{
}

impl<T> ScreeningRepository for T where
    T: QuestionStore
        + SectionStore
        + FormTemplateStore
        + ScreeningStore
        + HistoryStore
        + ClientDirectory
        + ApplicationDirectory
        + TaskStore
        + NotificationStore
{
}

const DEFAULT_PER_PAGE: u32 = 10;

/// `?page=&per_page=` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PageRequest {
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn first_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: first_page(),
            per_page: default_per_page(),
        }
    }
}

/// Records that can be listed newest first.
pub trait Dated {
    fn date_created(&self) -> DateTime<Utc>;
}

macro_rules! dated {
    ($($ty:ty),* $(,)?) => {
        $(impl Dated for $ty {
            fn date_created(&self) -> DateTime<Utc> {
                self.date_created
            }
        })*
    };
}

dated!(Question, Section, FormTemplate, Screening, HistoryEntry, Client, Task);

/// Pagination envelope shared by every `/paginate` route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total_pages: u32,
    pub total_docs_count: usize,
    pub current_page: u32,
    pub docs: Vec<T>,
}

impl<T: Dated> Page<T> {
    pub fn newest_first(mut records: Vec<T>, request: PageRequest) -> Self {
        records.sort_by(|left, right| right.date_created().cmp(&left.date_created()));
        Self::slice(records, request)
    }
}

impl<T> Page<T> {
    fn slice(records: Vec<T>, request: PageRequest) -> Self {
        let per_page = if request.per_page == 0 {
            DEFAULT_PER_PAGE
        } else {
            request.per_page
        };
        let current_page = request.page.max(1);
        let total_docs_count = records.len();
        let total_pages = total_docs_count.div_ceil(per_page as usize) as u32;
        let skip = (current_page as usize - 1).saturating_mul(per_page as usize);

        Self {
            total_pages,
            total_docs_count,
            current_page,
            docs: records
                .into_iter()
                .skip(skip)
                .take(per_page as usize)
                .collect(),
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            total_pages: self.total_pages,
            total_docs_count: self.total_docs_count,
            current_page: self.current_page,
            docs: self.docs.into_iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, PartialEq)]
    struct Stamp(DateTime<Utc>);

    impl Dated for Stamp {
        fn date_created(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn pages_newest_first_with_counts() {
        let base = Utc::now();
        let records: Vec<Stamp> = (0..23)
            .map(|offset| Stamp(base + Duration::seconds(offset)))
            .collect();

        let page = Page::newest_first(records, PageRequest { page: 3, per_page: 10 });

        assert_eq!(page.total_pages, 3);
        assert_eq!(page.total_docs_count, 23);
        assert_eq!(page.current_page, 3);
        assert_eq!(
            page.docs,
            vec![
                Stamp(base + Duration::seconds(2)),
                Stamp(base + Duration::seconds(1)),
                Stamp(base),
            ]
        );
    }

    #[test]
    fn zero_page_and_per_page_fall_back_to_defaults() {
        let base = Utc::now();
        let records: Vec<Stamp> = (0..4)
            .map(|offset| Stamp(base + Duration::seconds(offset)))
            .collect();

        let page = Page::newest_first(records, PageRequest { page: 0, per_page: 0 });

        assert_eq!(page.current_page, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.docs.first(), Some(&Stamp(base + Duration::seconds(3))));
    }
}
