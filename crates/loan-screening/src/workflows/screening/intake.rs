//! Client registration payloads. The create route accepts either a JSON body
//! or a multipart form with document uploads; both are normalised into one
//! [`ClientIntake`] before any business rule runs.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use super::domain::{
    AccountId, BranchId, Client, ClientId, ClientStatus, GeoPolygon, Spouse,
};
use super::error::ScreeningError;
use crate::integrations::AssetUpload;

/// National ID card or client picture, either already hosted or uploaded with the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeDocument {
    Link(String),
    Upload(AssetUpload),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientIntake {
    pub first_name: String,
    pub last_name: String,
    pub grandfather_name: String,
    pub gender: String,
    pub national_id_no: String,
    pub date_of_birth: Option<NaiveDate>,
    pub civil_status: String,
    pub woreda: String,
    pub kebele: String,
    pub house_no: String,
    pub phone: String,
    pub email: Option<String>,
    pub household_members_count: Option<u32>,
    pub spouse: Option<Spouse>,
    pub branch: Option<BranchId>,
    pub created_by: Option<AccountId>,
    pub national_id_card: Option<IntakeDocument>,
    pub picture: Option<IntakeDocument>,
    pub geolocation: Option<GeoPolygon>,
}

/// JSON shape of the registration body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientIntakeBody {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub grandfather_name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub national_id_no: String,
    #[serde(default)]
    pub date_of_birth: Option<NaiveDate>,
    #[serde(default)]
    pub civil_status: String,
    #[serde(default)]
    pub woreda: String,
    #[serde(default)]
    pub kebele: String,
    #[serde(default)]
    pub house_no: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub household_members_count: Option<u32>,
    #[serde(default)]
    pub spouse: Option<Spouse>,
    #[serde(default)]
    pub branch: Option<BranchId>,
    #[serde(default)]
    pub created_by: Option<AccountId>,
    #[serde(default)]
    pub national_id_card: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub geolocation: Option<GeoPolygon>,
}

/// Registration payload as received on the wire.
#[derive(Debug, Clone)]
pub enum IntakePayload {
    Json(ClientIntakeBody),
    Multipart {
        fields: BTreeMap<String, String>,
        files: BTreeMap<String, AssetUpload>,
    },
}

impl IntakePayload {
    pub fn normalize(self) -> Result<ClientIntake, ScreeningError> {
        match self {
            IntakePayload::Json(body) => Ok(ClientIntake {
                first_name: body.first_name,
                last_name: body.last_name,
                grandfather_name: body.grandfather_name,
                gender: body.gender,
                national_id_no: body.national_id_no,
                date_of_birth: body.date_of_birth,
                civil_status: body.civil_status,
                woreda: body.woreda,
                kebele: body.kebele,
                house_no: body.house_no,
                phone: body.phone,
                email: non_empty(body.email),
                household_members_count: body.household_members_count,
                spouse: body.spouse,
                branch: body.branch,
                created_by: body.created_by,
                national_id_card: non_empty(body.national_id_card).map(IntakeDocument::Link),
                picture: non_empty(body.picture).map(IntakeDocument::Link),
                geolocation: body.geolocation,
            }),
            IntakePayload::Multipart { fields, files } => from_form(fields, files),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn from_form(
    mut fields: BTreeMap<String, String>,
    mut files: BTreeMap<String, AssetUpload>,
) -> Result<ClientIntake, ScreeningError> {
    let mut errors = Vec::new();
    let mut text = |name: &str| fields.remove(name).map(|value| value.trim().to_string());

    let first_name = text("first_name").unwrap_or_default();
    let last_name = text("last_name").unwrap_or_default();
    let grandfather_name = text("grandfather_name").unwrap_or_default();
    let gender = text("gender").unwrap_or_default();
    let national_id_no = text("national_id_no").unwrap_or_default();
    let civil_status = text("civil_status").unwrap_or_default();
    let woreda = text("woreda").unwrap_or_default();
    let kebele = text("kebele").unwrap_or_default();
    let house_no = text("house_no").unwrap_or_default();
    let phone = text("phone").unwrap_or_default();
    let email = non_empty(text("email"));
    let branch = non_empty(text("branch")).map(BranchId);
    let created_by = non_empty(text("created_by")).map(AccountId);

    let date_of_birth = match non_empty(text("date_of_birth")) {
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                errors.push(format!("Client Date of Birth '{raw}' is not a YYYY-MM-DD date"));
                None
            }
        },
        None => None,
    };

    let household_members_count = match non_empty(text("household_members_count")) {
        Some(raw) => match raw.parse::<u32>() {
            Ok(count) => Some(count),
            Err(_) => {
                errors.push(format!("Client household_members_count '{raw}' is not a number"));
                None
            }
        },
        None => None,
    };

    let spouse = parse_json::<Spouse>(text("spouse"), "Spouse Info", &mut errors);
    let geolocation = parse_json::<GeoPolygon>(text("geolocation"), "Geolocation", &mut errors);

    let mut document = |name: &str| match files.remove(name) {
        Some(mut upload) => {
            upload.owner = first_name.clone();
            Some(IntakeDocument::Upload(upload))
        }
        None => non_empty(text(name)).map(IntakeDocument::Link),
    };
    let national_id_card = document("national_id_card");
    let picture = document("picture");

    if !errors.is_empty() {
        return Err(ScreeningError::Validation(errors));
    }

    Ok(ClientIntake {
        first_name,
        last_name,
        grandfather_name,
        gender,
        national_id_no,
        date_of_birth,
        civil_status,
        woreda,
        kebele,
        house_no,
        phone,
        email,
        household_members_count,
        spouse,
        branch,
        created_by,
        national_id_card,
        picture,
        geolocation,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
    label: &str,
    errors: &mut Vec<String>,
) -> Option<T> {
    let raw = non_empty(raw)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            errors.push(format!("Client {label} is malformed: {err}"));
            None
        }
    }
}

impl ClientIntake {
    pub fn validate(&self) -> Result<(), ScreeningError> {
        let mut errors = Vec::new();
        let blank = |value: &str| value.trim().is_empty();

        if blank(&self.first_name) {
            errors.push("Client First Name is Empty".to_string());
        }
        if blank(&self.last_name) {
            errors.push("Client Last Name is Empty".to_string());
        }
        if blank(&self.grandfather_name) {
            errors.push("Client Grandfather name is Empty".to_string());
        }
        if blank(&self.gender) {
            errors.push("Client Gender is Empty".to_string());
        }
        if blank(&self.national_id_no) {
            errors.push("Client National Id No is Empty".to_string());
        }
        if self.branch.as_ref().map_or(true, |branch| blank(branch.as_str())) {
            errors.push("Client Related Branch is Empty".to_string());
        }
        if self.created_by.as_ref().map_or(true, |account| blank(account.as_str())) {
            errors.push("Client Created By is Empty".to_string());
        }
        if blank(&self.civil_status) {
            errors.push("Client Civil Status is Empty".to_string());
        }
        if self.household_members_count.unwrap_or(0) == 0 {
            errors.push("Client household_members_count is Empty".to_string());
        }
        if !self.civil_status.trim().eq_ignore_ascii_case("single") && self.spouse.is_none() {
            errors.push("Client Spouse Info is Empty!!".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScreeningError::Validation(errors))
        }
    }

    /// Build the client record once documents are hosted. Call after [`ClientIntake::validate`].
    pub fn into_client(
        self,
        branch: BranchId,
        created_by: AccountId,
        national_id_card: Option<String>,
        picture: Option<String>,
    ) -> Client {
        let now = Utc::now();
        Client {
            id: ClientId::generate(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            grandfather_name: self.grandfather_name.trim().to_string(),
            gender: self.gender,
            national_id_no: self.national_id_no,
            national_id_card,
            picture,
            date_of_birth: self.date_of_birth,
            civil_status: self.civil_status,
            woreda: self.woreda,
            kebele: self.kebele,
            house_no: self.house_no,
            spouse: self.spouse,
            email: self.email,
            phone: self.phone,
            household_members_count: self.household_members_count.unwrap_or(0),
            branch,
            created_by,
            status: ClientStatus::New,
            loan_cycle_number: 0,
            cbs_status: None,
            cbs_reference: None,
            geolocation: self.geolocation,
            parcel_result: None,
            date_created: now,
            last_modified: now,
        }
    }
}
