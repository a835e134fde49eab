//! Reqwest-backed implementation of the HTTP transport trait.

use async_trait::async_trait;
use bytes::Bytes;
use frame_traits::{FrameError, HttpClient, HttpMethod, HttpRequest, HttpResponse};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default timeout applied when a request carries none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production HTTP client. Follows redirects (the OneDrive content
/// endpoint answers with a pre-authenticated 302).
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, FrameError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("photoframed/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FrameError::Unknown(format!("http client construction failed: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(&self, request: HttpRequest) -> frame_traits::Result<HttpResponse> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let body_limit = request.max_body_bytes;
        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout.unwrap_or(DEFAULT_TIMEOUT));

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let mut response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();

        let body: Bytes = match body_limit {
            Some(limit) => {
                if let Some(announced) = response.content_length() {
                    if announced > limit {
                        return Err(FrameError::Validation(format!(
                            "response body announces {} bytes, ceiling is {}",
                            announced, limit
                        )));
                    }
                }
                // Stream chunk by chunk so an over-limit body aborts
                // mid-transfer instead of buffering to the end.
                let mut buffered = Vec::new();
                while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
                    if (buffered.len() + chunk.len()) as u64 > limit {
                        return Err(FrameError::Validation(format!(
                            "response body exceeds {} byte ceiling",
                            limit
                        )));
                    }
                    buffered.extend_from_slice(&chunk);
                }
                Bytes::from(buffered)
            }
            None => response.bytes().await.map_err(map_reqwest_error)?,
        };
        debug!(status, bytes = body.len(), "HTTP exchange complete");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FrameError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        FrameError::Network(e.to_string())
    } else {
        FrameError::Unknown(e.to_string())
    }
}
