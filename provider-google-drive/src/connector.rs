//! Google Drive API connector
//!
//! Implements the `CloudProvider` trait for Google Drive API v3.

use async_trait::async_trait;
use bytes::Bytes;
use core_auth::TokenCache;
use frame_traits::{
    ChangeEvent, ChangePage, CloudProvider, FrameError, HttpClient, HttpMethod, HttpRequest,
    HttpResponse, PhotoRecord, Result, RetryPolicy,
};
use frame_traits::provider::UNBOUNDED_DEPTH;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::GoogleDriveError;
use crate::types::{
    ChangesListResponse, DriveFile, FilesListResponse, StartPageTokenResponse,
};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Canonical host, probed by `is_reachable`
const DRIVE_HOST: &str = "www.googleapis.com";

/// Google OAuth token endpoint, handed to the token cache
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Alias Drive accepts for the drive root folder
const ROOT_FOLDER_ID: &str = "root";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str =
    "id,name,mimeType,createdTime,parents,trashed,imageMediaMetadata(width,height)";

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between successive list pages
const PAGE_PACING: Duration = Duration::from_millis(500);

/// Google Drive conformance of the cloud provider contract.
///
/// Stateless apart from the shared token cache; every API call acquires a
/// fresh access token, retries transient failures with exponential
/// backoff, and refreshes the token once on a 401.
pub struct GoogleDriveProvider {
    http_client: Arc<dyn HttpClient>,
    token_cache: Arc<TokenCache>,
    retry: RetryPolicy,
}

impl GoogleDriveProvider {
    pub fn new(http_client: Arc<dyn HttpClient>, token_cache: Arc<TokenCache>) -> Self {
        Self {
            http_client,
            token_cache,
            retry: RetryPolicy::default(),
        }
    }

    /// Execute a GET with auth, retry, and refresh-on-401.
    ///
    /// Transient failures (transport errors, 429, 5xx) retry up to the
    /// policy's attempt count with exponential backoff; a 401 triggers a
    /// single token refresh before the request is repeated. A body
    /// ceiling makes the transport abort mid-stream on exceed.
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
                            "API request exhausted retries"
                        );
                        return Err(GoogleDriveError::ApiError {
                            status_code: response.status,
                            message: format!("request failed after {} retries", attempt),
                        }
                        .into());
                    }
                    let delay = retry_after(&response)
                        .unwrap_or_else(|| self.retry.backoff_delay(attempt));
                    warn!(
                        status = response.status,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transient API failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => {
                    return Err(GoogleDriveError::ApiError {
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

    /// List the direct children of a folder, draining all pages.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed=false", folder_id);
        let mut page_token: Option<String> = None;
        let mut files = Vec::new();

        loop {
            let mut url = format!(
                "{}/files?q={}&pageSize={}&fields=nextPageToken,files({})",
                DRIVE_API_BASE,
                urlencoding::encode(&query),
                MAX_PAGE_SIZE,
                FILE_FIELDS
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
            }

            let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
            let page: FilesListResponse = response
                .json()
                .map_err(|e| GoogleDriveError::ParseError(e.to_string()))?;

            files.extend(page.files);

            match page.next_page_token {
                Some(token) => {
                    page_token = Some(token);
                    tokio::time::sleep(PAGE_PACING).await;
                }
                None => break,
            }
        }

        Ok(files)
    }
}

fn retry_after(response: &HttpResponse) -> Option<Duration> {
    response
        .header("Retry-After")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl CloudProvider for GoogleDriveProvider {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<()> {
        self.token_cache.get().await.map_err(FrameError::from)?;
        info!("Google Drive provider ready");
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        tokio::net::lookup_host((DRIVE_HOST, 443)).await.is_ok()
    }

    #[instrument(skip(self, folder_id))]
    async fn scan_folder(
        &self,
        folder_id: Option<&str>,
        max_depth: i32,
    ) -> Result<Vec<PhotoRecord>> {
        let root = folder_id.unwrap_or(ROOT_FOLDER_ID).to_string();
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, i32)> = VecDeque::from([(root, 0)]);
        let mut photos = Vec::new();

        while let Some((folder, level)) = queue.pop_front() {
            // Cycle defense: a folder reachable through two paths is
            // listed once.
            if !visited.insert(folder.clone()) {
                debug!(folder_id = %folder, "Skipping already-visited folder");
                continue;
            }

            for file in self.list_children(&folder).await? {
                if file.is_folder() {
                    if max_depth == UNBOUNDED_DEPTH || level < max_depth {
                        queue.push_back((file.id, level + 1));
                    }
                } else if file.is_image() {
                    photos.push(file.into_photo_record());
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
        let url = format!("{}/files/{}?alt=media", DRIVE_API_BASE, photo_id);

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
        let mut page_token = cursor.to_string();
        let mut changes = Vec::new();

        loop {
            let url = format!(
                "{}/changes?pageToken={}&fields=nextPageToken,newStartPageToken,changes(removed,fileId,file({}))",
                DRIVE_API_BASE,
                urlencoding::encode(&page_token),
                FILE_FIELDS
            );

            let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
            let page: ChangesListResponse = response
                .json()
                .map_err(|e| GoogleDriveError::ParseError(e.to_string()))?;

            for change in page.changes {
                match change.file {
                    Some(file) if file.trashed => changes.push(ChangeEvent::Deleted(file.id)),
                    Some(file) if file.is_image() => {
                        changes.push(ChangeEvent::Updated(file.into_photo_record()))
                    }
                    // Folders and non-image files do not reach the frame.
                    Some(_) => {}
                    None => {
                        if let Some(id) = change.file_id {
                            changes.push(ChangeEvent::Deleted(id));
                        }
                    }
                }
            }

            match (page.next_page_token, page.new_start_page_token) {
                (Some(next), _) => {
                    page_token = next;
                    tokio::time::sleep(PAGE_PACING).await;
                }
                (None, Some(new_cursor)) => {
                    info!(count = changes.len(), "Change feed drained");
                    return Ok(ChangePage {
                        changes,
                        next_cursor: new_cursor,
                    });
                }
                (None, None) => {
                    return Err(GoogleDriveError::ParseError(
                        "change feed ended without newStartPageToken".to_string(),
                    )
                    .into());
                }
            }
        }
    }

    async fn initial_cursor(&self) -> Result<String> {
        let url = format!("{}/changes/startPageToken", DRIVE_API_BASE);
        let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
        let token: StartPageTokenResponse = response
            .json()
            .map_err(|e| GoogleDriveError::ParseError(e.to_string()))?;
        Ok(token.start_page_token)
    }

    async fn folder_parent(&self, folder_id: &str) -> Result<Option<String>> {
        let url = format!("{}/files/{}?fields=id,parents", DRIVE_API_BASE, folder_id);
        let response = self.execute_with_retry(url, REQUEST_TIMEOUT, None).await?;
        let file: DriveFile = response
            .json()
            .map_err(|e| GoogleDriveError::ParseError(e.to_string()))?;
        Ok(file.parents.into_iter().next())
    }

    fn provider_name(&self) -> &'static str {
        "google-drive"
    }
}
