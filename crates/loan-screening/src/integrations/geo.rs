use std::fmt::Debug;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::GeoConfig;
use crate::workflows::screening::domain::GeoPolygon;

#[derive(Debug, thiserror::Error)]
pub enum GeoServiceError {
    #[error("parcel polygon needs at least three points, got {0}")]
    DegeneratePolygon(usize),
    #[error("parcel validation request failed: {0}")]
    Transport(String),
    #[error("parcel validation response was malformed: {0}")]
    Decode(String),
}

pub trait GeoValidationService: Send + Sync + Debug {
    /// Submit a parcel outline; `None` when the service has nothing to report.
    fn submit_parcel(
        &self,
        polygon: &GeoPolygon,
        tag: &str,
    ) -> Result<Option<Value>, GeoServiceError>;
}

/// Posts parcels to a WPS process endpoint.
#[derive(Debug)]
pub struct WpsGeoClient {
    agent: ureq::Agent,
    url: String,
}

impl WpsGeoClient {
    pub fn new(config: &GeoConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build()
            .into();
        Self {
            agent,
            url: config.url.clone(),
        }
    }
}

pub fn parcel_request(polygon: &GeoPolygon, tag: &str) -> Result<Value, GeoServiceError> {
    if polygon.points.len() < 3 {
        return Err(GeoServiceError::DegeneratePolygon(polygon.points.len()));
    }
    let mut ring: Vec<[f64; 2]> = polygon
        .points
        .iter()
        .map(|point| [point.longitude, point.latitude])
        .collect();
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }
    Ok(json!({
        "tag": tag,
        "geometry": {
            "type": "Polygon",
            "coordinates": [ring],
        },
    }))
}

impl GeoValidationService for WpsGeoClient {
    fn submit_parcel(
        &self,
        polygon: &GeoPolygon,
        tag: &str,
    ) -> Result<Option<Value>, GeoServiceError> {
        let body = parcel_request(polygon, tag)?;
        let response = self
            .agent
            .post(&self.url)
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(|err| GeoServiceError::Transport(err.to_string()))?;
        let result: Value = response
            .into_body()
            .read_json()
            .map_err(|err| GeoServiceError::Decode(err.to_string()))?;
        Ok((!result.is_null()).then_some(result))
    }
}
