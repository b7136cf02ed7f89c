use std::time::{Duration, Instant};

use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::error::CatalogError;
use super::item::{ListMediaItemsResponse, RawMediaItem};
use crate::auth::BearerToken;
use crate::backup::item::{MediaItem, ResolvedUrl};
use crate::backup::resolver::{ResolveError, UrlResolver};

pub const API_BASE: &str = "https://photoslibrary.googleapis.com";

/// Largest page the Library API hands out.
const PAGE_SIZE: &str = "100";

/// Thin Google Photos Library API client: paged listing and per-item lookup.
#[derive(Clone)]
pub struct PhotosClient {
    http: Client,
    base: String,
    token: BearerToken,
}

impl std::fmt::Debug for PhotosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotosClient")
            .field("base", &self.base)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl PhotosClient {
    pub fn new(token: BearerToken, timeout: Duration) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: API_BASE.to_string(),
            token,
        })
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}{}", self.base, path);
        tracing::debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(self.token.secret())
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(CatalogError::AuthExpired),
            StatusCode::NOT_FOUND => return Err(CatalogError::NotFound),
            s if !s.is_success() => return Err(CatalogError::Status(s.as_u16())),
            _ => {}
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn list_page(
        &self,
        page_token: Option<&str>,
    ) -> Result<ListMediaItemsResponse, CatalogError> {
        let mut query = vec![("pageSize", PAGE_SIZE)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get_json("/v1/mediaItems", &query).await
    }

    /// Every item in the library, page by page. Stops after the first error.
    pub fn media_items(&self) -> impl Stream<Item = Result<MediaItem, CatalogError>> + '_ {
        // State: Some(next page token) while pages remain, None when done.
        stream::unfold(Some(None::<String>), move |state| async move {
            let page_token = state?;
            match self.list_page(page_token.as_deref()).await {
                Ok(page) => {
                    let fetched_at = Instant::now();
                    let next = page.next_page_token.filter(|t| !t.is_empty()).map(Some);
                    let items: Vec<Result<MediaItem, CatalogError>> = page
                        .media_items
                        .into_iter()
                        .map(|raw| Ok(raw.into_media_item(fetched_at)))
                        .collect();
                    Some((stream::iter(items), next))
                }
                Err(e) => Some((stream::iter(vec![Err(e)]), None)),
            }
        })
        .flatten()
    }

    /// Collect the whole library, logging progress every few hundred items.
    pub async fn list_all(&self) -> Result<Vec<MediaItem>, CatalogError> {
        let mut items = Vec::new();
        let mut stream = std::pin::pin!(self.media_items());
        while let Some(item) = stream.try_next().await? {
            items.push(item);
            if items.len() % 500 == 0 {
                tracing::info!("Fetched {} items so far...", items.len());
            }
        }
        Ok(items)
    }

    pub async fn get_media_item(&self, id: &str) -> Result<RawMediaItem, CatalogError> {
        self.get_json(&format!("/v1/mediaItems/{}", id), &[]).await
    }

    /// One minimal listing call to check that the token is accepted.
    pub async fn verify(&self) -> Result<(), CatalogError> {
        let _: ListMediaItemsResponse = self
            .get_json("/v1/mediaItems", &[("pageSize", "1")])
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UrlResolver for PhotosClient {
    async fn resolve(&self, item: &MediaItem) -> Result<ResolvedUrl, ResolveError> {
        let raw = self.get_media_item(&item.id).await?;
        let fetched_at = Instant::now();
        match raw.download_url() {
            Some(url) => Ok(ResolvedUrl::new(url, fetched_at)),
            None => {
                tracing::warn!("Catalog returned no baseUrl for {}", item.id);
                Err(ResolveError::Rejected(StatusCode::OK.as_u16()))
            }
        }
    }
}
