//! File-Backed Token Cache
//!
//! Isolates token freshness from request bodies: connectors call
//! [`TokenCache::get`] before every request and receive a valid access
//! token, refreshing transparently when expiry is within the 5-minute
//! buffer. Rotated tokens are written back to the token file via a temp
//! sibling and an atomic rename, so a crash mid-write never loses the
//! previous token set.

use crate::error::{AuthError, Result};
use crate::types::{ClientCredentials, OAuthTokens};
use chrono::Utc;
use frame_traits::{HttpClient, HttpMethod, HttpRequest};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Buffer before token expiration that triggers a refresh (5 minutes).
const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Timeout for the token endpoint exchange.
const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Token cache configuration.
#[derive(Debug, Clone)]
pub struct TokenCacheConfig {
    /// Path to the client credentials file (`{clientId, clientSecret}`).
    pub credentials_path: PathBuf,
    /// Path to the token file; read at startup, rewritten on refresh.
    pub token_path: PathBuf,
    /// Token endpoint, supplied by the provider conformance.
    pub token_url: String,
}

/// Token endpoint response body.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

/// File-backed OAuth token cache with single-flight refresh.
pub struct TokenCache {
    config: TokenCacheConfig,
    http_client: Arc<dyn HttpClient>,
    credentials: ClientCredentials,
    tokens: Mutex<Option<OAuthTokens>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .field("tokens", &self.tokens)
            .finish()
    }
}

impl TokenCache {
    /// Load credentials and construct the cache. Tokens are loaded lazily
    /// on the first [`get`](Self::get).
    pub async fn open(
        config: TokenCacheConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Result<Self> {
        let raw = tokio::fs::read(&config.credentials_path).await.map_err(|e| {
            AuthError::CredentialsUnavailable {
                path: config.credentials_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let credentials: ClientCredentials = serde_json::from_slice(&raw).map_err(|e| {
            AuthError::CredentialsUnavailable {
                path: config.credentials_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(
            credentials_path = %config.credentials_path.display(),
            "Token cache initialized"
        );

        Ok(Self {
            config,
            http_client,
            credentials,
            tokens: Mutex::new(None),
        })
    }

    /// Get a valid access token, refreshing first when expiry is within
    /// the 5-minute buffer.
    ///
    /// The internal lock is held across the refresh exchange so
    /// concurrent callers trigger at most one refresh.
    pub async fn get(&self) -> Result<String> {
        let mut guard = self.tokens.lock().await;

        if guard.is_none() {
            *guard = Some(self.load_from_disk().await?);
        }

        let tokens = guard.as_ref().map(Clone::clone).ok_or_else(|| {
            AuthError::TokensUnavailable {
                path: self.config.token_path.display().to_string(),
                reason: "no tokens loaded".to_string(),
            }
        })?;

        if !tokens.is_expired_with_buffer(TOKEN_REFRESH_BUFFER.as_secs() as i64) {
            return Ok(tokens.access_token);
        }

        info!(
            expires_at_ms = tokens.expires_at_ms,
            "Access token near expiry, refreshing"
        );
        let refreshed = self.refresh_exchange(&tokens).await?;
        let access_token = refreshed.access_token.clone();
        self.persist(&refreshed).await?;
        *guard = Some(refreshed);

        Ok(access_token)
    }

    /// Force a refresh regardless of expiry, e.g. after a 401.
    pub async fn refresh(&self) -> Result<String> {
        let mut guard = self.tokens.lock().await;

        let tokens = match guard.as_ref() {
            Some(t) => t.clone(),
            None => self.load_from_disk().await?,
        };

        let refreshed = self.refresh_exchange(&tokens).await?;
        let access_token = refreshed.access_token.clone();
        self.persist(&refreshed).await?;
        *guard = Some(refreshed);

        Ok(access_token)
    }

    async fn load_from_disk(&self) -> Result<OAuthTokens> {
        let raw = tokio::fs::read(&self.config.token_path).await.map_err(|e| {
            AuthError::TokensUnavailable {
                path: self.config.token_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let tokens: OAuthTokens = serde_json::from_slice(&raw)
            .map_err(|e| AuthError::TokenCorrupted(e.to_string()))?;

        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            expires_at_ms = tokens.expires_at_ms,
            "Tokens loaded from disk"
        );
        Ok(tokens)
    }

    /// Exchange the refresh token at the token endpoint.
    async fn refresh_exchange(&self, current: &OAuthTokens) -> Result<OAuthTokens> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::RefreshFailed("no refresh token on file".to_string()))?;

        let mut fields = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.credentials.client_id.as_str()),
        ];
        if let Some(secret) = self.credentials.client_secret.as_deref() {
            fields.push(("client_secret", secret));
        }

        let token_url = self
            .credentials
            .token_url
            .as_deref()
            .unwrap_or(self.config.token_url.as_str());

        let request = HttpRequest::new(HttpMethod::Post, token_url)
            .form(&fields)
            .timeout(REFRESH_TIMEOUT);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if !response.is_success() {
            warn!(status = response.status, "Token endpoint rejected refresh");
            return Err(AuthError::RefreshFailed(format!(
                "token endpoint returned status {}",
                response.status
            )));
        }

        let body: RefreshResponse = response
            .json()
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        let expires_at_ms = Utc::now().timestamp_millis() + body.expires_in * 1000;

        info!(expires_at_ms, "Access token refreshed");

        Ok(OAuthTokens {
            access_token: body.access_token,
            // Endpoints that do not rotate the refresh token omit it.
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at_ms,
        })
    }

    /// Write tokens to a temp sibling, then rename over the token file.
    async fn persist(&self, tokens: &OAuthTokens) -> Result<()> {
        let json = serde_json::to_vec_pretty(tokens)
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;

        let tmp = temp_sibling(&self.config.token_path);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.config.token_path)
            .await
            .map_err(|e| AuthError::PersistFailed(e.to_string()))?;

        debug!(
            token_path = %self.config.token_path.display(),
            "Tokens persisted"
        );
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tokens.json".to_string());
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(
                &self,
                request: HttpRequest,
            ) -> frame_traits::Result<frame_traits::HttpResponse>;
        }
    }

    fn write_fixture_files(dir: &tempfile::TempDir, expiry_ms: i64) -> TokenCacheConfig {
        let credentials_path = dir.path().join("credentials.json");
        let token_path = dir.path().join("tokens.json");
        std::fs::write(
            &credentials_path,
            r#"{"clientId":"cid","clientSecret":"secret"}"#,
        )
        .unwrap();
        std::fs::write(
            &token_path,
            format!(
                r#"{{"accessToken":"old-at","refreshToken":"rt","expiry":{}}}"#,
                expiry_ms
            ),
        )
        .unwrap();
        TokenCacheConfig {
            credentials_path,
            token_path,
            token_url: "https://oauth.example.com/token".to_string(),
        }
    }

    fn refresh_response() -> frame_traits::HttpResponse {
        frame_traits::HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(
                r#"{"access_token":"new-at","expires_in":3600}"#.as_bytes(),
            ),
        }
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_fixture_files(&dir, Utc::now().timestamp_millis() + 3_600_000);

        let mut http = MockHttp::new();
        http.expect_execute().times(0);

        let cache = TokenCache::open(config, Arc::new(http)).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), "old-at");
    }

    #[tokio::test]
    async fn near_expiry_token_refreshes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_fixture_files(&dir, Utc::now().timestamp_millis() + 60_000);
        let token_path = config.token_path.clone();

        let mut http = MockHttp::new();
        http.expect_execute()
            .times(1)
            .returning(|req| {
                assert_eq!(req.url, "https://oauth.example.com/token");
                let body = req.body.unwrap();
                let body = std::str::from_utf8(&body).unwrap().to_string();
                assert!(body.contains("grant_type=refresh_token"));
                assert!(body.contains("refresh_token=rt"));
                Ok(refresh_response())
            });

        let cache = TokenCache::open(config, Arc::new(http)).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), "new-at");

        // Rotated tokens landed on disk, refresh token carried over.
        let persisted: OAuthTokens =
            serde_json::from_slice(&std::fs::read(&token_path).unwrap()).unwrap();
        assert_eq!(persisted.access_token, "new-at");
        assert_eq!(persisted.refresh_token.as_deref(), Some("rt"));
        assert!(!dir.path().join("tokens.json.tmp").exists());
    }

    #[tokio::test]
    async fn second_get_uses_cached_refreshed_token() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_fixture_files(&dir, Utc::now().timestamp_millis() - 1000);

        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| Ok(refresh_response()));

        let cache = TokenCache::open(config, Arc::new(http)).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), "new-at");
        assert_eq!(cache.get().await.unwrap(), "new-at");
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_fixture_files(&dir, 0);

        let mut http = MockHttp::new();
        http.expect_execute().times(1).returning(|_| {
            Ok(frame_traits::HttpResponse {
                status: 400,
                headers: HashMap::new(),
                body: Bytes::from(r#"{"error":"invalid_grant"}"#.as_bytes()),
            })
        });

        let cache = TokenCache::open(config, Arc::new(http)).await.unwrap();
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn missing_credentials_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = TokenCacheConfig {
            credentials_path: dir.path().join("absent.json"),
            token_path: dir.path().join("tokens.json"),
            token_url: "https://oauth.example.com/token".to_string(),
        };
        let err = TokenCache::open(config, Arc::new(MockHttp::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialsUnavailable { .. }));
    }
}
