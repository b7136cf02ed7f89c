use thiserror::Error;

use crate::backup::resolver::ResolveError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Access token rejected (HTTP 401): re-authenticate")]
    AuthExpired,

    #[error("Media item not found")]
    NotFound,

    #[error("Catalog request failed with HTTP {0}")]
    Status(u16),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Unexpected catalog response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<CatalogError> for ResolveError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::AuthExpired => ResolveError::AuthExpired,
            CatalogError::NotFound => ResolveError::NotFound,
            CatalogError::Status(s) if s == 429 || s >= 500 => {
                ResolveError::Transient(format!("HTTP {}", s))
            }
            CatalogError::Status(s) => ResolveError::Rejected(s),
            CatalogError::Http(e) => ResolveError::Transient(e.to_string()),
            CatalogError::Decode(e) => ResolveError::Transient(e.to_string()),
        }
    }
}
