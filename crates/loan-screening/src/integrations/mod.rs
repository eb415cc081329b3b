//! Clients for the services the screening workflow talks to but does not own.

pub mod assets;
pub mod cbs;
pub mod geo;

pub use assets::{AssetStore, AssetUpload, LocalAssetStore, UploadError};
pub use cbs::{AbacusCbsClient, CbsCustomer, CbsRequestError, CoreBankingGateway};
pub use geo::{GeoServiceError, GeoValidationService, WpsGeoClient};

/// Any collaborator failure, surfaced to callers as a bad-gateway outcome.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamServiceError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Cbs(#[from] CbsRequestError),
    #[error(transparent)]
    Geo(#[from] GeoServiceError),
}
