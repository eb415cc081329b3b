use super::catalog::{FormCatalog, FormDraft, QuestionDraft, SectionDraft};
use super::domain::{AccountId, FormLayout, FormType, QuestionType};
use super::error::ScreeningError;
use super::repository::ScreeningRepository;
use super::views::FormView;

/// Screening questionnaire installed on a fresh deployment.
pub fn standard_screening_template() -> FormDraft {
    use QuestionType::*;

    FormDraft {
        form_type: FormType::Screening,
        title: "Client Screening Form".to_string(),
        subtitle: "Eligibility screening for agricultural loans".to_string(),
        purpose: "Determine whether the client qualifies for a new loan cycle".to_string(),
        layout: FormLayout::TwoColumns,
        disclaimer: "The information given above is true and complete to the best of my \
                     knowledge."
            .to_string(),
        signatures: vec![
            "Filled By".to_string(),
            "Checked By".to_string(),
            "Approved By".to_string(),
        ],
        questions: vec![
            QuestionDraft::new("Is the client a resident of the kebele?", YesNo).required(),
            QuestionDraft::new("How many years has the client lived in the kebele?", FillInBlank)
                .depends_on("Is the client a resident of the kebele?", "yes"),
            QuestionDraft::new("Does the client have an outstanding loan?", YesNo).required(),
            QuestionDraft::new("Name of the lending institution", FillInBlank)
                .depends_on("Does the client have an outstanding loan?", "yes"),
        ],
        sections: vec![
            SectionDraft {
                title: "Farm Information".to_string(),
                number: Some(1),
                questions: vec![
                    QuestionDraft::new("Does the client own farm land?", YesNo).required(),
                    QuestionDraft::new("Farm land size", Grouped)
                        .depends_on("Does the client own farm land?", "yes")
                        .sub_question(QuestionDraft::new("Size in hectares", FillInBlank))
                        .sub_question(
                            QuestionDraft::new("Land holding type", SingleChoice)
                                .options(&["owned", "rented", "shared"]),
                        ),
                    QuestionDraft::new("Main crops grown", MultipleChoice)
                        .options(&["teff", "maize", "wheat", "barley", "vegetables"]),
                ],
            },
            SectionDraft {
                title: "Household".to_string(),
                number: Some(2),
                questions: vec![
                    QuestionDraft::new("Does the household have another income source?", YesNo),
                    QuestionDraft::new("Monthly income from other sources", FillInBlank)
                        .depends_on("Does the household have another income source?", "yes")
                        .hidden(),
                ],
            },
        ],
    }
}

/// Install the standard template unless a screening form already exists.
pub fn seed_standard_template<R>(
    catalog: &FormCatalog<'_, R>,
    created_by: Option<AccountId>,
) -> Result<Option<FormView>, ScreeningError>
where
    R: ScreeningRepository + ?Sized,
{
    match catalog.create_form(standard_screening_template(), created_by) {
        Ok(form) => Ok(Some(form)),
        Err(ScreeningError::Conflict(_)) => Ok(None),
        Err(err) => Err(err),
    }
}
