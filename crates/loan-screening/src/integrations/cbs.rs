use std::fmt::{self, Debug};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::{engine::general_purpose, Engine as _};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::CbsConfig;
use crate::workflows::screening::domain::Client;

#[derive(Debug, thiserror::Error)]
pub enum CbsRequestError {
    #[error("core banking integration is not configured")]
    NotConfigured,
    #[error("core banking session has not been established")]
    NotAuthenticated,
    #[error("core banking request to {endpoint} failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },
    #[error("core banking response from {endpoint} was malformed: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Customer record in the shape the core banking system onboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbsCustomer {
    pub branch_id: String,
    pub title: String,
    pub male: bool,
    pub first_name: String,
    pub last_name: String,
    pub grandfather_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: String,
    pub woreda: String,
    pub kebele: String,
    pub house_no: String,
    pub picture_id: String,
    pub card_id: String,
    pub date_joined: NaiveDate,
}

const CBS_DATE_FORMAT: &str = "%d/%m/%Y";

impl CbsCustomer {
    pub fn from_client(client: &Client, picture_id: String, card_id: String) -> Self {
        let male = client.gender.trim().eq_ignore_ascii_case("male");
        Self {
            branch_id: client.branch.to_string(),
            title: if male { "Ato" } else { "W/ro" }.to_string(),
            male,
            first_name: client.first_name.clone(),
            last_name: client.last_name.clone(),
            grandfather_name: client.grandfather_name.clone(),
            date_of_birth: client.date_of_birth,
            phone: client.phone.clone(),
            woreda: client.woreda.clone(),
            kebele: client.kebele.clone(),
            house_no: client.house_no.clone(),
            picture_id,
            card_id,
            date_joined: client.date_created.date_naive(),
        }
    }

    pub fn payload(&self) -> Value {
        let joined = self.date_joined.format(CBS_DATE_FORMAT).to_string();
        json!({
            "customerType": 1,
            "name": format!("{}, {}", self.last_name, self.first_name),
            "branchID": self.branch_id,
            "persons": [{
                "title": self.title,
                "gender": if self.male { 0 } else { 1 },
                "forenamePartOne": self.first_name,
                "forenamePartTwo": self.last_name,
                "surname": self.grandfather_name,
                "dateOfBirth": self
                    .date_of_birth
                    .map(|date| date.format(CBS_DATE_FORMAT).to_string()),
                "telephone1": self.phone,
                "pictureID": self.picture_id,
                "cardPictureID": self.card_id,
            }],
            "customerAddress": [{
                "address": {
                    "address1": self.woreda,
                    "address2": self.kebele,
                    "address3": self.house_no,
                    "country": "Ethiopia",
                    "townCity": self.woreda,
                },
                "addressTypeID": 1,
                "dateMovedIn": joined,
                "dateMovedOut": null,
                "isPrimary": true,
            }],
            "DateJoined": joined,
        })
    }
}

pub trait CoreBankingGateway: Send + Sync + Debug {
    fn login(&self) -> Result<(), CbsRequestError>;
    fn upload_picture(&self, path: &Path) -> Result<String, CbsRequestError>;
    fn upload_id(&self, path: &Path) -> Result<String, CbsRequestError>;
    /// Onboard the customer, returning the core banking reference.
    fn create_client(&self, customer: &CbsCustomer) -> Result<String, CbsRequestError>;
}

#[derive(Debug, Clone, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(rename = "userID", default)]
    user_id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct PictureResponse {
    #[serde(rename = "pictureId", alias = "pictureID")]
    picture_id: Value,
}

/// Blocking client for the Abacus core banking API.
pub struct AbacusCbsClient {
    agent: ureq::Agent,
    config: CbsConfig,
    token: Mutex<Option<String>>,
}

impl AbacusCbsClient {
    pub fn new(config: CbsConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();
        Self {
            agent,
            config,
            token: Mutex::new(None),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), endpoint)
    }

    fn session_token(&self) -> Result<String, CbsRequestError> {
        self.token
            .lock()
            .expect("cbs session mutex poisoned")
            .clone()
            .ok_or(CbsRequestError::NotAuthenticated)
    }

    fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: &Value,
        token: Option<&str>,
    ) -> Result<T, CbsRequestError> {
        let mut request = self
            .agent
            .post(&self.url(endpoint))
            .header("content-type", "application/json");
        if let Some(token) = token {
            request = request.header("X-Fern-Token", token);
        }

        let response = request
            .send_json(body)
            .map_err(|err| CbsRequestError::Transport {
                endpoint,
                message: err.to_string(),
            })?;

        response
            .into_body()
            .read_json::<T>()
            .map_err(|err| CbsRequestError::Decode {
                endpoint,
                message: err.to_string(),
            })
    }

    fn upload_image(&self, path: &Path) -> Result<String, CbsRequestError> {
        let token = self.session_token()?;
        let bytes = fs::read(path).map_err(|source| CbsRequestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let body = json!({ "image": general_purpose::STANDARD.encode(bytes) });
        let response: PictureResponse = self.post("/picture", &body, Some(&token))?;
        Ok(scalar_to_string(&response.picture_id))
    }
}

impl Debug for AbacusCbsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbacusCbsClient")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl CoreBankingGateway for AbacusCbsClient {
    fn login(&self) -> Result<(), CbsRequestError> {
        let body = json!({
            "username": self.config.username,
            "password": self.config.password,
            "DeviceID": self.config.device_id,
        });
        let response: LoginResponse = self.post("/login", &body, None)?;
        tracing::debug!(user = ?response.user_id, "core banking session established");
        *self.token.lock().expect("cbs session mutex poisoned") = Some(response.token);
        Ok(())
    }

    fn upload_picture(&self, path: &Path) -> Result<String, CbsRequestError> {
        self.upload_image(path)
    }

    fn upload_id(&self, path: &Path) -> Result<String, CbsRequestError> {
        self.upload_image(path)
    }

    fn create_client(&self, customer: &CbsCustomer) -> Result<String, CbsRequestError> {
        let token = self.session_token()?;
        let response: Value = self.post("/customer", &customer.payload(), Some(&token))?;
        ["customerID", "customerId", "id"]
            .iter()
            .find_map(|key| response.get(*key))
            .map(scalar_to_string)
            .ok_or_else(|| CbsRequestError::Decode {
                endpoint: "/customer",
                message: "response carries no customer id".to_string(),
            })
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
