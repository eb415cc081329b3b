use super::common::*;
use crate::workflows::screening::domain::QuestionType;
use crate::workflows::screening::repository::{QuestionStore, SectionStore};
use crate::workflows::screening::{
    FormCloner, FormOutline, InMemoryScreeningStore, PrerequisiteLedger, RelinkStrategy,
};

#[test]
fn clones_are_fresh_and_leave_the_source_untouched() {
    let store = InMemoryScreeningStore::new();
    let child = seed_question(&store, "Size in hectares", Vec::new(), Vec::new());
    let parent = seed_question(&store, "Farm land size", vec![child.clone()], Vec::new());

    let mut answered = store.fetch_question(&parent).unwrap().unwrap();
    answered.values = vec!["yes".to_string()];
    store.update_question(answered).unwrap();

    let cloner = FormCloner::new(&store, RelinkStrategy::QuestionText);
    let mut ledger = PrerequisiteLedger::new();
    let clone = cloner.clone_question(&parent, &mut ledger).expect("cloned");

    assert_ne!(clone.id, parent);
    assert!(clone.values.is_empty(), "answers are not carried over");
    assert_eq!(clone.sub_questions.len(), 1);
    assert_ne!(clone.sub_questions[0], child);
    assert_eq!(ledger.len(), 2, "sub-question noted in the same batch");

    let source = store.fetch_question(&parent).unwrap().unwrap();
    assert_eq!(source.values, vec!["yes".to_string()]);
    assert_eq!(source.sub_questions, vec![child]);
    assert_eq!(store.question_count(), 4);
}

#[test]
fn prerequisites_are_relinked_inside_the_batch() {
    let store = InMemoryScreeningStore::new();
    let b = seed_question(&store, "B", Vec::new(), Vec::new());
    let a = seed_question(&store, "A", vec![b], Vec::new());
    let c = seed_question(&store, "C", Vec::new(), vec![(&a, "yes")]);

    let cloner = FormCloner::new(&store, RelinkStrategy::QuestionText);
    let cloned = cloner
        .clone_form(&FormOutline {
            questions: vec![a.clone(), c.clone()],
            sections: Vec::new(),
        })
        .expect("form cloned");

    assert_eq!(cloned.questions.len(), 2);
    assert_eq!(cloned.created_questions.len(), 3);

    let a_clone = store.fetch_question(&cloned.questions[0]).unwrap().unwrap();
    let c_clone = store.fetch_question(&cloned.questions[1]).unwrap().unwrap();
    assert_eq!(c_clone.prerequisites.len(), 1);
    assert_eq!(c_clone.prerequisites[0].question, a_clone.id);
    assert_eq!(c_clone.prerequisites[0].answer, "yes");

    let c_source = store.fetch_question(&c).unwrap().unwrap();
    assert_eq!(c_source.prerequisites[0].question, a, "template keeps its links");
}

#[test]
fn prerequisites_never_cross_section_batches() {
    let store = InMemoryScreeningStore::new();
    let top = seed_question(&store, "Owns land?", Vec::new(), Vec::new());
    let in_section = seed_question(&store, "Plot size", Vec::new(), vec![(&top, "yes")]);
    let section = seed_section(&store, "Farm", 1, vec![in_section]);

    let cloner = FormCloner::new(&store, RelinkStrategy::QuestionText);
    let cloned = cloner
        .clone_form(&FormOutline {
            questions: vec![top],
            sections: vec![section],
        })
        .expect("form cloned");

    let section_clone = store.fetch_section(&cloned.sections[0]).unwrap().unwrap();
    assert_eq!(section_clone.title, "Farm");
    let question = store
        .fetch_question(&section_clone.questions[0])
        .unwrap()
        .unwrap();
    assert!(question.prerequisites.is_empty());
}

#[test]
fn text_strategy_binds_duplicate_wording_to_the_first_clone() {
    let store = InMemoryScreeningStore::new();
    let first = seed_question(&store, "Irrigated?", Vec::new(), Vec::new());
    let second = seed_question(&store, "Irrigated?", Vec::new(), Vec::new());
    let dependent = seed_question(&store, "Water source", Vec::new(), vec![(&second, "yes")]);
    let outline = FormOutline {
        questions: vec![first, second, dependent],
        sections: Vec::new(),
    };

    let by_text = FormCloner::new(&store, RelinkStrategy::QuestionText)
        .clone_form(&outline)
        .expect("cloned by text");
    let linked = store.fetch_question(&by_text.questions[2]).unwrap().unwrap();
    assert_eq!(linked.prerequisites[0].question, by_text.questions[0]);

    let by_id = FormCloner::new(&store, RelinkStrategy::SourceId)
        .clone_form(&outline)
        .expect("cloned by id");
    let linked = store.fetch_question(&by_id.questions[2]).unwrap().unwrap();
    assert_eq!(linked.prerequisites[0].question, by_id.questions[1]);
}

#[test]
fn missing_questions_and_sections_are_skipped() {
    let store = InMemoryScreeningStore::new();
    let present = seed_question(&store, "Present", Vec::new(), Vec::new());

    let cloned = FormCloner::new(&store, RelinkStrategy::default())
        .clone_form(&FormOutline {
            questions: vec![present, "gone".into()],
            sections: vec!["gone-section".into()],
        })
        .expect("cloned");

    assert_eq!(cloned.questions.len(), 1);
    assert!(cloned.sections.is_empty());
}

#[test]
fn failed_clone_removes_partial_questions() {
    let inner = InMemoryScreeningStore::new();
    let ids: Vec<_> = ["One", "Two", "Three"]
        .into_iter()
        .map(|text| seed_question(&inner, text, Vec::new(), Vec::new()))
        .collect();
    let store = FailingStore::new(inner, FailPoint::QuestionInsertsAfter(2));

    let err = FormCloner::new(&store, RelinkStrategy::default())
        .clone_form(&FormOutline {
            questions: ids,
            sections: Vec::new(),
        })
        .expect_err("third insert fails");

    assert!(err.to_string().contains("store offline"));
    assert_eq!(store.inner.question_count(), 3, "only the sources remain");
}

#[test]
fn grouped_sub_questions_keep_their_type() {
    let store = InMemoryScreeningStore::new();
    let mut grouped = crate::workflows::screening::domain::Question::new(
        "Livestock",
        QuestionType::Grouped,
    );
    grouped.sub_questions = vec![seed_question(&store, "Cattle", Vec::new(), Vec::new())];
    let grouped = store.insert_question(grouped).unwrap();

    let mut ledger = PrerequisiteLedger::new();
    let clone = FormCloner::new(&store, RelinkStrategy::default())
        .clone_question(&grouped.id, &mut ledger)
        .expect("cloned");

    assert_eq!(clone.question_type, QuestionType::Grouped);
    let sub = store.fetch_question(&clone.sub_questions[0]).unwrap().unwrap();
    assert_eq!(sub.question_text, "Cattle");
}
