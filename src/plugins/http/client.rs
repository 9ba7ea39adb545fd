use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::tracking::model::{Episode, HistoryUpdate, PlaySession, PlaybackHistory};
use crate::plugins::registry::{ClientContext, HistoryApi};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("api url cannot carry a path: {0}")]
    NotABase(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http status error: {0}")]
    Status(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// REST client for the podcast history backend.
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    ctx: ClientContext,
}

impl ApiClient {
    pub fn new(ctx: ClientContext) -> anyhow::Result<Self> {
        let base = Url::parse(&ctx.api_url)?;
        if base.cannot_be_a_base() {
            return Err(ApiError::NotABase(ctx.api_url.clone()).into());
        }
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(Self::build_headers(&ctx)?)
            .build()?;
        Ok(Self { client, base, ctx })
    }

    fn build_headers(ctx: &ClientContext) -> anyhow::Result<HeaderMap> {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_str(&ctx.user_agent)?);
        h.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(h)
    }

    /// `base/episodes/{id}[/tail]`, with the id escaped as a single path segment.
    pub fn episode_url(&self, episode_id: &str, tail: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| ApiError::NotABase(self.base.to_string()))?;
            segs.pop_if_empty().push("episodes").push(episode_id);
            if let Some(tail) = tail {
                segs.push(tail);
            }
        }
        Ok(url)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.ctx.timeout_secs.max(1))
    }

    fn should_retry_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
    }

    async fn sleep_backoff(&self, attempt: u32) {
        let base = self.ctx.retry_backoff_ms.max(1);
        let shift = attempt.min(16);
        let ms = base.saturating_mul(1u64 << shift).min(30_000);
        sleep(Duration::from_millis(ms)).await;
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T, ApiError> {
        let mut last_err: Option<ApiError> = None;
        for attempt in 0..=self.ctx.retries {
            if attempt > 0 {
                self.sleep_backoff(attempt - 1).await;
            }

            let resp = match self.client
                .get(url.clone())
                .query(query)
                .timeout(self.timeout())
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(%url, attempt, error = %e, "request failed");
                    last_err = Some(e.into());
                    continue;
                }
            };

            match resp.status() {
                s if s.is_success() => return Ok(resp.json::<T>().await?),
                StatusCode::NOT_FOUND => return Err(ApiError::NotFound(url.path().to_string())),
                s if Self::should_retry_status(s) => {
                    debug!(%url, attempt, status = %s, "transient status");
                    last_err = Some(ApiError::Status(s));
                    continue;
                }
                s => return Err(ApiError::Status(s)),
            }
        }

        let err = last_err.unwrap_or(ApiError::Status(StatusCode::REQUEST_TIMEOUT));
        warn!(%url, retries = self.ctx.retries, error = %err, "giving up");
        Err(err)
    }

    pub async fn get_episode(&self, episode_id: &str) -> Result<Episode, ApiError> {
        let url = self.episode_url(episode_id, None)?;
        self.get_json(url, &[]).await
    }

    /// `Ok(None)` when the episode has never been played.
    pub async fn get_history(&self, episode_id: &str) -> Result<Option<PlaybackHistory>, ApiError> {
        let url = self.episode_url(episode_id, Some("history"))?;
        match self.get_json(url, &[]).await {
            Ok(h) => Ok(Some(h)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_sessions(&self, episode_id: &str, limit: Option<u32>) -> Result<Vec<PlaySession>, ApiError> {
        let url = self.episode_url(episode_id, Some("sessions"))?;
        let query: Vec<(&str, String)> = limit.map(|n| vec![("limit", n.to_string())]).unwrap_or_default();
        self.get_json(url, &query).await
    }

    /// Single attempt; writes are never retried.
    pub async fn put_history(&self, episode_id: &str, update: &HistoryUpdate) -> Result<PlaybackHistory, ApiError> {
        let url = self.episode_url(episode_id, Some("history"))?;
        debug!(%url, played_up_to = update.played_up_to, status = ?update.playing_status, "put history");
        let resp = self.client
            .put(url.clone())
            .json(update)
            .timeout(self.timeout())
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json::<PlaybackHistory>().await?),
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(url.path().to_string())),
            s => Err(ApiError::Status(s)),
        }
    }
}

#[async_trait]
impl HistoryApi for ApiClient {
    async fn update_history(&self, episode_id: &str, update: &HistoryUpdate) -> anyhow::Result<PlaybackHistory> {
        Ok(self.put_history(episode_id, update).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str) -> ApiClient {
        ApiClient::new(ClientContext { api_url: api_url.to_string(), ..ClientContext::default() }).unwrap()
    }

    #[test]
    fn builds_episode_urls_under_base_path() {
        let c = client("http://localhost:8000/api");
        assert_eq!(
            c.episode_url("abc-123", Some("history")).unwrap().as_str(),
            "http://localhost:8000/api/episodes/abc-123/history"
        );
        let c = client("http://localhost:8000/api/");
        assert_eq!(
            c.episode_url("abc-123", None).unwrap().as_str(),
            "http://localhost:8000/api/episodes/abc-123"
        );
    }

    #[test]
    fn escapes_episode_id_as_one_segment() {
        let c = client("https://pods.example.org/api");
        let url = c.episode_url("a/b c", Some("sessions")).unwrap();
        assert_eq!(url.path(), "/api/episodes/a%2Fb%20c/sessions");
    }

    #[test]
    fn rejects_non_base_urls() {
        let err = ApiClient::new(ClientContext { api_url: "mailto:me@example.org".into(), ..ClientContext::default() });
        assert!(err.is_err());
    }

    #[test]
    fn retries_only_transient_statuses() {
        assert!(ApiClient::should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(ApiClient::should_retry_status(StatusCode::BAD_GATEWAY));
        assert!(ApiClient::should_retry_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!ApiClient::should_retry_status(StatusCode::NOT_FOUND));
        assert!(!ApiClient::should_retry_status(StatusCode::UNPROCESSABLE_ENTITY));
    }
}
