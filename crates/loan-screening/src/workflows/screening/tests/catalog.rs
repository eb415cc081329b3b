use super::common::*;
use crate::workflows::screening::catalog::{QuestionPatch, SectionPatch};
use crate::workflows::screening::domain::{FormType, Prerequisite, QuestionId, QuestionType};
use crate::workflows::screening::repository::{FormTemplateStore, PageRequest, QuestionStore};
use crate::workflows::screening::{
    standard_screening_template, FormCatalog, FormDraft, InMemoryScreeningStore, QuestionDraft,
    ScreeningError, SectionDraft,
};

fn loan_form() -> FormDraft {
    FormDraft {
        form_type: FormType::LoanApplication,
        title: "Loan Application".to_string(),
        ..standard_screening_template()
    }
}

#[test]
fn question_drafts_are_validated_together() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);

    let err = catalog
        .create_question(
            QuestionDraft::new("  ", QuestionType::YesNo)
                .sub_question(QuestionDraft::new("Crop", QuestionType::SingleChoice)),
        )
        .expect_err("invalid draft");
    match err {
        ScreeningError::Validation(messages) => assert_eq!(
            messages,
            vec![
                "Question Text is Empty".to_string(),
                "Question 'Crop' needs options".to_string(),
            ]
        ),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(store.question_count(), 0);
}

#[test]
fn created_question_is_attached_to_its_section() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let form = catalog
        .create_form(standard_screening_template(), None)
        .expect("form");
    let section = form.sections[1].id.clone();

    let mut draft = QuestionDraft::new("Number of children in school", QuestionType::FillInBlank);
    draft.section = Some(section.clone());
    let question = catalog.create_question(draft).expect("question");

    let section = catalog.get_section(&section).expect("section");
    assert_eq!(question.number as usize, section.questions.len());
    assert_eq!(
        section.questions.last().map(|view| &view.id),
        Some(&question.id)
    );
}

#[test]
fn question_added_to_a_form_is_numbered_after_its_siblings() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let form = catalog
        .create_form(standard_screening_template(), None)
        .expect("form");
    let existing = form.questions.len();

    let mut draft = QuestionDraft::new("Distance to the nearest market", QuestionType::FillInBlank);
    draft.form = Some(form.id.clone());
    let question = catalog.create_question(draft).expect("question");

    assert_eq!(question.number as usize, existing + 1);
    let form = catalog.get_form(&form.id).expect("form");
    assert_eq!(form.questions.len(), existing + 1);
    assert_eq!(form.questions.last().map(|view| &view.id), Some(&question.id));

    let loose = catalog
        .create_question(QuestionDraft::new("Standalone", QuestionType::YesNo))
        .expect("question");
    assert_eq!(loose.number, 1);
}

#[test]
fn unresolved_draft_dependency_rolls_back() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);

    let err = catalog
        .create_question(
            QuestionDraft::new("Plot size", QuestionType::FillInBlank)
                .sub_question(QuestionDraft::new("Unit", QuestionType::FillInBlank))
                .depends_on("Owns land?", "yes"),
        )
        .expect_err("dependency not in draft");
    assert!(matches!(err, ScreeningError::Validation(_)));
    assert_eq!(store.question_count(), 0);
}

#[test]
fn prerequisite_updates_must_reference_existing_questions() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let question = catalog
        .create_question(QuestionDraft::new("Irrigated?", QuestionType::YesNo))
        .expect("question");

    let err = catalog
        .update_question(
            &question.id,
            QuestionPatch {
                prerequisites: Some(vec![Prerequisite {
                    question: QuestionId::from("missing"),
                    answer: "yes".to_string(),
                }]),
                ..QuestionPatch::default()
            },
        )
        .expect_err("unknown prerequisite");
    assert!(matches!(err, ScreeningError::Validation(_)));

    let updated = catalog
        .update_question(
            &question.id,
            QuestionPatch {
                remark: Some("ask the development agent".to_string()),
                required: Some(true),
                ..QuestionPatch::default()
            },
        )
        .expect("patched");
    assert_eq!(updated.remark, "ask the development agent");
    assert!(updated.required);
}

#[test]
fn deleting_a_question_removes_its_subtree_and_references() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let form = catalog
        .create_form(standard_screening_template(), None)
        .expect("form");
    let before = store.question_count();
    let grouped = form.sections[0]
        .questions
        .iter()
        .find(|question| question.question_type == QuestionType::Grouped)
        .expect("grouped question");

    catalog.delete_question(&grouped.id).expect("deleted");

    assert_eq!(store.question_count(), before - 3);
    let section = catalog.get_section(&form.sections[0].id).expect("section");
    assert!(section.questions.iter().all(|question| question.id != grouped.id));

    let err = catalog
        .delete_question(&grouped.id)
        .expect_err("already deleted");
    assert!(matches!(err, ScreeningError::NotFound { .. }));
}

#[test]
fn one_form_per_type() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    catalog
        .create_form(standard_screening_template(), None)
        .expect("screening form");
    let questions = store.question_count();

    let err = catalog
        .create_form(standard_screening_template(), None)
        .expect_err("duplicate type");
    assert!(matches!(err, ScreeningError::Conflict(_)));
    assert_eq!(store.question_count(), questions);

    let loan = catalog.create_form(loan_form(), None).expect("loan form");
    assert_eq!(catalog.find_form(FormType::LoanApplication).unwrap().id, loan.id);
    assert_eq!(catalog.list_forms(PageRequest::default()).unwrap().total_docs_count, 2);
}

#[test]
fn form_title_is_required() {
    let store = InMemoryScreeningStore::new();
    let err = FormCatalog::new(&store)
        .create_form(
            FormDraft {
                title: String::new(),
                ..standard_screening_template()
            },
            None,
        )
        .expect_err("title missing");
    assert!(matches!(
        err,
        ScreeningError::Validation(messages) if messages == vec!["Form Title is Empty".to_string()]
    ));
}

#[test]
fn sections_are_numbered_and_cascade_on_delete() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let form = catalog
        .create_form(
            FormDraft {
                sections: Vec::new(),
                ..standard_screening_template()
            },
            None,
        )
        .expect("form");
    assert!(!form.has_sections);
    let before = store.question_count();

    let section = catalog
        .create_section(
            &form.id,
            SectionDraft {
                title: "Livestock".to_string(),
                number: None,
                questions: vec![
                    QuestionDraft::new("Owns cattle?", QuestionType::YesNo),
                    QuestionDraft::new("Head of cattle", QuestionType::FillInBlank)
                        .depends_on("Owns cattle?", "yes"),
                ],
            },
        )
        .expect("section");
    assert_eq!(section.number, 1);
    assert_eq!(section.questions[1].prerequisites[0].question, section.questions[0].id);
    assert!(catalog.get_form(&form.id).unwrap().has_sections);

    let renamed = catalog
        .update_section(
            &section.id,
            SectionPatch {
                title: Some("Animals".to_string()),
                number: None,
            },
        )
        .expect("renamed");
    assert_eq!(renamed.title, "Animals");

    catalog.delete_section(&section.id).expect("deleted");
    assert_eq!(store.question_count(), before);
    let form = store.fetch_form(&form.id).unwrap().unwrap();
    assert!(form.sections.is_empty());
    assert!(!form.has_sections);
}

#[test]
fn deleting_a_form_removes_everything_it_owns() {
    let store = InMemoryScreeningStore::new();
    let catalog = FormCatalog::new(&store);
    let form = catalog
        .create_form(standard_screening_template(), None)
        .expect("form");

    catalog.delete_form(&form.id).expect("deleted");

    assert_eq!(store.question_count(), 0);
    assert_eq!(store.section_count(), 0);
    assert!(store.list_forms().unwrap().is_empty());
    assert!(store.list_questions().unwrap().is_empty());
}

#[test]
fn seeded_store_clones_cleanly_into_screenings() {
    let (service, store) = build_service();
    let template = service.catalog().find_form(FormType::Screening).expect("template");
    let registration = register(&service, "0933000001");

    assert_eq!(registration.screening.title, template.title);
    assert_eq!(
        registration.screening.sections.len(),
        template.sections.len()
    );
    for (clone, source) in registration
        .screening
        .questions
        .iter()
        .zip(&template.questions)
    {
        assert_ne!(clone.id, source.id);
        assert_eq!(clone.question_text, source.question_text);
    }
    let dependent = &registration.screening.questions[1];
    assert_eq!(
        dependent.prerequisites[0].question,
        registration.screening.questions[0].id
    );
    assert!(store.fetch_question(&template.questions[0].id).unwrap().is_some());
}
