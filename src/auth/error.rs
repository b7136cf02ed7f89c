use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading the stored bearer credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "No access token found: pass --access-token, set GPHOTOS_ACCESS_TOKEN, \
         or authorize once to create {}",
        path.display()
    )]
    MissingToken { path: PathBuf },

    #[error("Token file {} has an empty `token` field", path.display())]
    EmptyToken { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid token file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}
