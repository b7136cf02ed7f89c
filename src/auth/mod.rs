//! Bearer credential for the Google Photos Library API.
//!
//! The OAuth consent flow and token refresh happen elsewhere; this module only
//! picks up an access token, either given directly or from the `token.json`
//! written by the Google auth libraries.

pub mod error;

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use self::error::AuthError;

pub const TOKEN_FILE: &str = "token.json";

/// An opaque OAuth access token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(default)]
    token: String,
    #[serde(default)]
    expiry: Option<String>,
}

/// Use `explicit` when given, else read `<credentials_dir>/token.json`.
pub fn load_token(explicit: Option<&str>, credentials_dir: &Path) -> Result<BearerToken, AuthError> {
    if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
        tracing::debug!("Using access token from the command line or environment");
        return Ok(BearerToken::new(token));
    }

    let path = credentials_dir.join(TOKEN_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::MissingToken { path });
        }
        Err(source) => return Err(AuthError::Io { path, source }),
    };
    let file: TokenFile =
        serde_json::from_str(&raw).map_err(|source| AuthError::Json {
            path: path.clone(),
            source,
        })?;
    if file.token.trim().is_empty() {
        return Err(AuthError::EmptyToken { path });
    }

    if let Some(expiry) = file.expiry.as_deref().and_then(parse_expiry) {
        if expiry <= Utc::now() {
            tracing::warn!(
                "Access token in {} expired at {}; the catalog will likely refuse it",
                path.display(),
                expiry.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
    tracing::debug!("Loaded access token from {}", path.display());
    Ok(BearerToken::new(file.token.trim()))
}

/// `expiry` as written by google-auth: ISO 8601, usually without an offset.
fn parse_expiry(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
