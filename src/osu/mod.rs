//! HTTP client for the osu! API v2 and the `.osu` file host.
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Request, StatusCode, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{CatalogPage, CatalogService};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::model::{Beatmap, RankedStatus, SyncCursor};
use crate::osu::model::{ApiBeatmap, SearchResponse, TokenResponse};

pub mod model;

const OSU_BASE: &str = "https://osu.ppy.sh/";

#[derive(Clone)]
pub struct OsuClient {
    http: Client,
    api_base: Url,
    files_base: Url,
    client_id: u64,
    client_secret: String,
    token: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for OsuClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsuClient")
            .field("api_base", &self.api_base)
            .field("files_base", &self.files_base)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl OsuClient {
    pub fn new(client_id: u64, client_secret: String) -> anyhow::Result<Self> {
        let base = Url::parse(OSU_BASE).context("invalid default osu! URL")?;
        Self::with_base_urls(
            client_id,
            client_secret,
            base.clone(),
            base,
            Duration::from_secs(30),
        )
    }

    pub fn with_base_urls(
        client_id: u64,
        client_secret: String,
        api_base: Url,
        files_base: Url,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("beatmap-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_base,
            files_base,
            client_id,
            client_secret,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let api_base = Url::parse(&cfg.osu.api_base).context("invalid osu.api_base")?;
        let files_base = Url::parse(&cfg.osu.files_base).context("invalid osu.files_base")?;
        Self::with_base_urls(
            cfg.osu.client_id,
            cfg.osu.client_secret.clone(),
            api_base,
            files_base,
            Duration::from_secs(cfg.osu.request_timeout_secs),
        )
    }

    fn endpoint(base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|err| SyncError::Transient(format!("invalid endpoint {}: {}", path, err)))
    }

    pub fn build_token_request(&self) -> Result<Request> {
        let endpoint = Self::endpoint(&self.api_base, "oauth/token")?;
        let client_id = self.client_id.to_string();
        let form = [
            ("client_id", client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", "public"),
        ];
        Ok(self
            .http
            .post(endpoint)
            .header("Accept", "application/json")
            .form(&form)
            .build()?)
    }

    pub fn build_search_request(&self, token: &str, cursor: &SyncCursor) -> Result<Request> {
        let endpoint = Self::endpoint(&self.api_base, "api/v2/beatmapsets/search")?;
        let approved_date = cursor.last_date.timestamp_millis().to_string();
        let id = cursor.last_beatmapset.to_string();
        Ok(self
            .http
            .get(endpoint)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .query(&[
                ("s", "ranked"),
                ("sort", "ranked_asc"),
                ("nsfw", "true"),
                ("cursor[approved_date]", approved_date.as_str()),
                ("cursor[id]", id.as_str()),
            ])
            .build()?)
    }

    pub fn build_beatmap_request(&self, token: &str, id: i64) -> Result<Request> {
        let endpoint = Self::endpoint(&self.api_base, &format!("api/v2/beatmaps/{}", id))?;
        Ok(self
            .http
            .get(endpoint)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .build()?)
    }

    pub fn build_source_request(&self, id: i64) -> Result<Request> {
        let endpoint = Self::endpoint(&self.files_base, &format!("osu/{}", id))?;
        Ok(self.http.get(endpoint).build()?)
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| SyncError::Auth("access token not acquired".into()))
    }
}

async fn remote_error(res: reqwest::Response, what: &str) -> SyncError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("rate limited by osu! while fetching {}", what);
    } else {
        warn!(%status, "osu! error while fetching {}: {}", what, body);
    }
    SyncError::Transient(format!("{} returned {}: {}", what, status, body))
}

#[async_trait]
impl CatalogService for OsuClient {
    async fn retrieve_token(&self) -> Result<()> {
        let request = self.build_token_request()?;
        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| SyncError::Auth(err.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SyncError::Auth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }
        let payload: TokenResponse = res
            .json()
            .await
            .map_err(|err| SyncError::Auth(format!("invalid token response: {}", err)))?;
        *self.token.write().await = Some(payload.access_token);
        info!(expires_in = payload.expires_in, "osu! token acquired");
        Ok(())
    }

    #[instrument(skip_all, fields(last_beatmapset = cursor.last_beatmapset))]
    async fn list_ranked(&self, cursor: &SyncCursor) -> Result<CatalogPage> {
        let token = self.bearer().await?;
        let request = self.build_search_request(&token, cursor)?;
        let res = self.http.execute(request).await?;
        if !res.status().is_success() {
            return Err(remote_error(res, "beatmapset search").await);
        }
        let payload: SearchResponse = res.json().await?;
        Ok(page_from_search(payload, cursor))
    }

    #[instrument(skip_all, fields(id = id))]
    async fn retrieve_beatmap(&self, id: i64) -> Result<Option<Beatmap>> {
        let token = self.bearer().await?;
        let request = self.build_beatmap_request(&token, id)?;
        let res = self.http.execute(request).await?;
        if res.status() == StatusCode::NOT_FOUND {
            debug!("beatmap not found upstream");
            return Ok(None);
        }
        if !res.status().is_success() {
            return Err(remote_error(res, "beatmap lookup").await);
        }
        let payload: ApiBeatmap = res.json().await?;
        Ok(Some(payload.into()))
    }

    #[instrument(skip_all, fields(id = id))]
    async fn retrieve_source_file(&self, id: i64) -> Result<Option<Vec<u8>>> {
        let request = self.build_source_request(id)?;
        let res = self.http.execute(request).await?;
        if !res.status().is_success() {
            return Err(remote_error(res, "source file").await);
        }
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}

/// Flatten a search response into ranked difficulties and the cursor to
/// resume from. Without a response cursor the last set's ranked date is used,
/// and failing that the request cursor is kept.
pub fn page_from_search(resp: SearchResponse, cursor: &SyncCursor) -> CatalogPage {
    let has_more = resp.cursor.is_some();
    let fallback = resp
        .beatmapsets
        .last()
        .and_then(|set| set.ranked_date.map(|date| SyncCursor::new(date, set.id)));
    let next_cursor = resp
        .cursor
        .as_ref()
        .and_then(|c| c.to_sync_cursor())
        .or(fallback)
        .unwrap_or_else(|| cursor.clone());

    let beatmaps = resp
        .beatmapsets
        .into_iter()
        .flat_map(|set| set.beatmaps)
        .filter(|b| b.status == RankedStatus::Ranked)
        .map(Beatmap::from)
        .collect();

    CatalogPage {
        beatmaps,
        next_cursor,
        has_more,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn client() -> OsuClient {
        let base = Url::parse("http://localhost:9/").unwrap();
        OsuClient::with_base_urls(7, "s3cret".into(), base.clone(), base, Duration::from_secs(5))
            .unwrap()
    }

    fn cursor() -> SyncCursor {
        SyncCursor::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1000)
    }

    fn search_fixture(cursor: serde_json::Value) -> SearchResponse {
        serde_json::from_value(json!({
            "beatmapsets": [{
                "id": 1001,
                "ranked_date": "2024-01-02T00:00:00Z",
                "beatmaps": [
                    {
                        "id": 11, "beatmapset_id": 1001, "mode": "osu", "status": "ranked",
                        "version": "Hard", "checksum": "aa", "total_length": 90,
                        "difficulty_rating": 3.2, "last_updated": "2024-01-01T12:00:00Z"
                    },
                    {
                        "id": 12, "beatmapset_id": 1001, "mode": "osu", "status": "loved",
                        "version": "Extra", "checksum": "bb", "total_length": 90,
                        "difficulty_rating": 5.9, "last_updated": "2024-01-01T12:00:00Z"
                    }
                ]
            }],
            "cursor": cursor
        }))
        .unwrap()
    }

    #[test]
    fn search_request_carries_cursor_and_token() {
        let req = client().build_search_request("tok", &cursor()).unwrap();
        assert_eq!(req.method(), reqwest::Method::GET);
        assert_eq!(req.url().path(), "/api/v2/beatmapsets/search");
        let query: Vec<(String, String)> = req
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("s".into(), "ranked".into())));
        assert!(query.contains(&("sort".into(), "ranked_asc".into())));
        assert!(query.contains(&("cursor[approved_date]".into(), "1704067200000".into())));
        assert!(query.contains(&("cursor[id]".into(), "1000".into())));
        assert_eq!(
            req.headers().get("authorization").unwrap().to_str().unwrap(),
            "Bearer tok"
        );
    }

    #[test]
    fn token_and_file_requests_hit_expected_paths() {
        let c = client();
        let token = c.build_token_request().unwrap();
        assert_eq!(token.method(), reqwest::Method::POST);
        assert_eq!(token.url().path(), "/oauth/token");

        let file = c.build_source_request(42).unwrap();
        assert_eq!(file.url().path(), "/osu/42");
        assert!(file.headers().get("authorization").is_none());

        let lookup = c.build_beatmap_request("tok", 42).unwrap();
        assert_eq!(lookup.url().path(), "/api/v2/beatmaps/42");
    }

    #[test]
    fn debug_hides_secret() {
        let dbg = format!("{:?}", client());
        assert!(!dbg.contains("s3cret"));
    }

    #[tokio::test]
    async fn listing_without_token_is_auth_error() {
        let err = client().list_ranked(&cursor()).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
    }

    #[test]
    fn page_keeps_ranked_difficulties_and_response_cursor() {
        let resp = search_fixture(json!({ "approved_date": 1704153600000i64, "id": "1001" }));
        let page = page_from_search(resp, &cursor());
        assert_eq!(page.beatmaps.len(), 1);
        assert_eq!(page.beatmaps[0].id, 11);
        assert!(page.has_more);
        assert_eq!(
            page.next_cursor,
            SyncCursor::new(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(), 1001)
        );
    }

    #[test]
    fn page_without_cursor_falls_back_to_last_set() {
        let resp = search_fixture(serde_json::Value::Null);
        let page = page_from_search(resp, &cursor());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor.last_beatmapset, 1001);
    }

    #[test]
    fn empty_page_keeps_request_cursor() {
        let resp: SearchResponse =
            serde_json::from_value(json!({ "beatmapsets": [], "cursor": null })).unwrap();
        let page = page_from_search(resp, &cursor());
        assert!(page.is_exhausted());
        assert_eq!(page.next_cursor, cursor());
    }
}
