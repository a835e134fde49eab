//! Microsoft Graph connector
//!
//! Implements the `CloudProvider` trait against the OneDrive surface of
//! Microsoft Graph. Delta queries carry the sync cursor as a full
//! `deltaLink` URL, which is stored opaquely by the sync controller.

use async_trait::async_trait;
use bytes::Bytes;
use core_auth::TokenCache;
use frame_traits::{
    ChangeEvent, ChangePage, CloudProvider, FrameError, HttpClient, HttpMethod, HttpRequest,
    HttpResponse, PhotoRecord, Result, RetryPolicy, UNBOUNDED_DEPTH,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::OneDriveError;
use crate::types::{DriveItem, DriveItemPage};

/// Microsoft Graph API base URL
const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Canonical host, probed by `is_reachable`
const GRAPH_HOST: &str = "graph.microsoft.com";

/// Microsoft identity platform token endpoint (consumer accounts)
pub const TOKEN_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";

/// Item fields requested on listings
const ITEM_SELECT: &str = "id,name,createdDateTime,file,folder,image,photo,parentReference";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between successive list pages
const PAGE_PACING: Duration = Duration::from_millis(500);

/// OneDrive conformance of the cloud provider contract.
pub struct OneDriveProvider {
    http_client: Arc<dyn HttpClient>,
    token_cache: Arc<TokenCache>,
    retry: RetryPolicy,
}

impl OneDriveProvider {
    pub fn new(http_client: Arc<dyn HttpClient>, token_cache: Arc<TokenCache>) -> Self {
        Self {
            http_client,
            token_cache,
            retry: RetryPolicy::default(),
        }
    }

    /// Execute a GET with auth, retry, and refresh-on-401.
    ///
    /// Graph throttling responses carry `Retry-After`; the wait honors it
    /// when present, otherwise the exponential backoff schedule applies.
    /// A body ceiling makes the transport abort mid-stream on exceed.
    async fn execute_with_retry(
        &self,
        url: String,
        timeout: Duration,
        max_body_bytes: Option<u64>,
    ) -> Result<HttpResponse> {
        let mut attempt = 0u32;
        let mut refreshed = false;

        loop {
            let token = self.token_cache.get().await.map_err(FrameError::from)?;
            let mut request = HttpRequest::new(HttpMethod::Get, url.clone())
                .bearer_token(token)
                .header("Accept", "application/json")
                .timeout(timeout);
            if let Some(limit) = max_body_bytes {
                request = request.limit_body(limit);
            }

            match self.http_client.execute(request).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) if response.status == 401 && !refreshed => {
                    info!("Access token rejected, refreshing once");
                    refreshed = true;
                    self.token_cache.refresh().await.map_err(FrameError::from)?;
                }
                Ok(response) if response.status == 429 || response.is_server_error() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            status = response.status,
                            attempts = attempt,
                            "Graph request exhausted retries"
                        );
                        if response.status == 429 {
                            let secs = retry_after_secs(&response).unwrap_or(0);
                            return Err(OneDriveError::Throttled(secs).into());
                        }
                        return Err(OneDriveError::ApiError {
                            status_code: response.status,
                            message: format!("request failed after {} retries", attempt),
                        }
                        .into());
                    }
                    let delay = retry_after_secs(&response)
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.retry.backoff_delay(attempt));
                    warn!(
                        status = response.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Graph throttle or server error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    return Err(OneDriveError::ApiError {
                        status_code: response.status,
                        message: String::from_utf8_lossy(&response.body).into_owned(),
                    }
                    .into());
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        warn!(error = %e, attempts = attempt, "Transport failure, retries exhausted");
                        return Err(e);
                    }
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drain a paged listing starting at `url`, following `nextLink`s.
    async fn drain_pages(&self, mut url: String) -> Result<(Vec<DriveItem>, Option<String>)> {
        let mut items = Vec::new();

        loop {
            let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
            let page: DriveItemPage = response
                .json()
                .map_err(|e| OneDriveError::ParseError(e.to_string()))?;

            items.extend(page.value);

            match page.next_link {
                Some(next) => {
                    url = next;
                    tokio::time::sleep(PAGE_PACING).await;
                }
                None => return Ok((items, page.delta_link)),
            }
        }
    }

    fn children_url(&self, folder_id: Option<&str>) -> String {
        match folder_id {
            Some(id) => format!(
                "{}/me/drive/items/{}/children?$select={}",
                GRAPH_API_BASE, id, ITEM_SELECT
            ),
            None => format!(
                "{}/me/drive/root/children?$select={}",
                GRAPH_API_BASE, ITEM_SELECT
            ),
        }
    }
}

fn retry_after_secs(response: &HttpResponse) -> Option<u64> {
    response
        .header("Retry-After")
        .and_then(|v| v.parse::<u64>().ok())
}

#[async_trait]
impl CloudProvider for OneDriveProvider {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        self.token_cache.get().await.map_err(FrameError::from)?;
        info!("OneDrive provider ready");
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        tokio::net::lookup_host((GRAPH_HOST, 443)).await.is_ok()
    }

    #[instrument(skip(self, folder_id))]
    async fn scan_folder(
        &self,
        folder_id: Option<&str>,
        max_depth: i32,
    ) -> Result<Vec<PhotoRecord>> {
        // The drive root has a real item id; `None` marks it in the
        // visited set.
        let mut visited: HashSet<Option<String>> = HashSet::new();
        let mut queue: VecDeque<(Option<String>, i32)> =
            VecDeque::from([(folder_id.map(str::to_string), 0)]);
        let mut photos = Vec::new();

        while let Some((folder, level)) = queue.pop_front() {
            if !visited.insert(folder.clone()) {
                debug!("Skipping already-visited folder");
                continue;
            }

            let url = self.children_url(folder.as_deref());
            let (items, _) = self.drain_pages(url).await?;

            for item in items {
                if item.is_folder() {
                    if max_depth == UNBOUNDED_DEPTH || level < max_depth {
                        queue.push_back((Some(item.id), level + 1));
                    }
                } else if item.is_image() {
                    photos.push(item.into_photo_record());
                }
            }
        }

        info!(count = photos.len(), "Folder scan complete");
        Ok(photos)
    }

    #[instrument(skip(self), fields(photo_id = %photo_id))]
    async fn download_content(
        &self,
        photo_id: &str,
        timeout: Duration,
        max_bytes: u64,
    ) -> Result<Bytes> {
        // The content endpoint answers with a redirect to a
        // pre-authenticated URL; the transport follows it.
        let url = format!("{}/me/drive/items/{}/content", GRAPH_API_BASE, photo_id);

        let response = tokio::time::timeout(timeout, self.execute_with_retry(url, timeout, Some(max_bytes)))
            .await
            .map_err(|_| FrameError::Network(format!("download of {} timed out", photo_id)))??;

        if response.body.len() as u64 > max_bytes {
            return Err(FrameError::Validation(format!(
                "{} exceeds download ceiling: {} > {} bytes",
                photo_id,
                response.body.len(),
                max_bytes
            )));
        }

        debug!(bytes = response.body.len(), "Downloaded content");
        Ok(response.body)
    }

    #[instrument(skip(self, cursor))]
    async fn changes_since(&self, cursor: &str) -> Result<ChangePage> {
        // The cursor is the full deltaLink URL issued by the previous
        // drain.
        let (items, delta_link) = self.drain_pages(cursor.to_string()).await?;

        let mut changes = Vec::new();
        for item in items {
            if item.is_deleted() {
                changes.push(ChangeEvent::Deleted(item.id));
            } else if item.is_image() {
                changes.push(ChangeEvent::Updated(item.into_photo_record()));
            }
        }

        let next_cursor = delta_link.ok_or_else(|| {
            OneDriveError::ParseError("delta feed ended without deltaLink".to_string())
        })?;

        info!(count = changes.len(), "Delta feed drained");
        Ok(ChangePage {
            changes,
            next_cursor,
        })
    }

    async fn initial_cursor(&self) -> Result<String> {
        // `token=latest` yields an empty page whose deltaLink encodes
        // the current state.
        let url = format!("{}/me/drive/root/delta?token=latest", GRAPH_API_BASE);
        let (_, delta_link) = self.drain_pages(url).await?;
        delta_link.ok_or_else(|| {
            OneDriveError::ParseError("latest delta returned no deltaLink".to_string()).into()
        })
    }

    async fn folder_parent(&self, folder_id: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/me/drive/items/{}?$select=id,parentReference",
            GRAPH_API_BASE, folder_id
        );
        let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
        let item: DriveItem = response
            .json()
            .map_err(|e| OneDriveError::ParseError(e.to_string()))?;
        Ok(item.parent_reference.and_then(|p| p.id))
    }

    fn provider_name(&self) -> &'static str {
        "onedrive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_auth::TokenCacheConfig;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn json_response(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(body.as_bytes().to_vec()),
        }
    }

    async fn provider_with(http: MockHttp, dir: &tempfile::TempDir) -> OneDriveProvider {
        let credentials_path = dir.path().join("credentials.json");
        let token_path = dir.path().join("tokens.json");
        std::fs::write(&credentials_path, r#"{"clientId":"cid"}"#).unwrap();
        std::fs::write(
            &token_path,
            format!(
                r#"{{"accessToken":"at","refreshToken":"rt","expiry":{}}}"#,
                chrono::Utc::now().timestamp_millis() + 3_600_000
            ),
        )
        .unwrap();

        let token_cache = TokenCache::open(
            TokenCacheConfig {
                credentials_path,
                token_path,
                token_url: TOKEN_URL.to_string(),
            },
            Arc::new(MockHttp::new()),
        )
        .await
        .unwrap();

        OneDriveProvider::new(Arc::new(http), Arc::new(token_cache))
    }

    #[tokio::test(start_paused = true)]
    async fn scan_walks_children_and_filters_images() {
        let mut http = MockHttp::new();
        http.expect_execute().returning(|req| {
            if req.url.contains("/root/children") {
                Ok(json_response(
                    r#"{"value": [
                        {"id": "i1", "name": "a.jpg", "file": {"mimeType": "image/jpeg"}},
                        {"id": "d1", "name": "Docs", "folder": {}},
                        {"id": "x1", "name": "notes.txt", "file": {"mimeType": "text/plain"}}
                    ]}"#,
                ))
            } else if req.url.contains("/items/d1/children") {
                Ok(json_response(
                    r#"{"value": [{"id": "i2", "name": "b.png", "file": {"mimeType": "image/png"}}]}"#,
                ))
            } else {
                panic!("unexpected url: {}", req.url);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_with(http, &dir).await;

        let photos = provider.scan_folder(None, UNBOUNDED_DEPTH).await.unwrap();
        let ids: Vec<&str> = photos.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "i2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delta_maps_deletions_and_updates() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.contains("delta?token=abc"));
            Ok(json_response(
                r#"{
                    "value": [
                        {"id": "gone", "deleted": {"state": "deleted"}},
                        {"id": "i1", "name": "a.jpg", "file": {"mimeType": "image/jpeg"}},
                        {"id": "f1", "name": "Dir", "folder": {}}
                    ],
                    "@odata.deltaLink": "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=next"
                }"#,
            ))
        });

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_with(http, &dir).await;

        let page = provider
            .changes_since("https://graph.microsoft.com/v1.0/me/drive/root/delta?token=abc")
            .await
            .unwrap();
        assert_eq!(page.changes.len(), 2);
        assert!(matches!(&page.changes[0], ChangeEvent::Deleted(id) if id == "gone"));
        assert!(matches!(&page.changes[1], ChangeEvent::Updated(r) if r.id == "i1"));
        assert!(page.next_cursor.contains("token=next"));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_cursor_uses_latest_token() {
        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|req| {
            assert!(req.url.contains("delta?token=latest"));
            Ok(json_response(
                r#"{"value": [], "@odata.deltaLink": "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=seeded"}"#,
            ))
        });

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_with(http, &dir).await;

        let cursor = provider.initial_cursor().await.unwrap();
        assert!(cursor.contains("token=seeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_honors_retry_after_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_mock = calls.clone();

        let mut http = MockHttp::new();
        http.expect_execute().returning(move |_| {
            if calls_in_mock.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut headers = HashMap::new();
                headers.insert("Retry-After".to_string(), "7".to_string());
                Ok(HttpResponse {
                    status: 429,
                    headers,
                    body: Bytes::new(),
                })
            } else {
                Ok(json_response(r#"{"value": []}"#))
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let provider = provider_with(http, &dir).await;

        let start = tokio::time::Instant::now();
        let photos = provider.scan_folder(Some("f"), 0).await.unwrap();
        assert!(photos.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
