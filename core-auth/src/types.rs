use chrono::Utc;
use serde::{Deserialize, Serialize};

/// OAuth 2.0 token set as persisted in the token file.
///
/// The on-disk form is the stable `{accessToken, refreshToken, expiry}`
/// shape shared with the offline token-generation scripts. `expiry` is
/// epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(rename = "expiry")]
    pub expires_at_ms: i64,
}

impl OAuthTokens {
    pub fn new(access_token: String, refresh_token: Option<String>, expires_at_ms: i64) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at_ms,
        }
    }

    /// Whether the access token expires within `buffer_secs` from now.
    pub fn is_expired_with_buffer(&self, buffer_secs: i64) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        self.expires_at_ms - buffer_secs * 1000 <= now_ms
    }
}

/// OAuth client credentials, read once from the credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Token endpoint override; the provider supplies its default.
    pub token_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_expired() {
        let tokens = OAuthTokens::new(
            "at".to_string(),
            None,
            Utc::now().timestamp_millis() + 3_600_000,
        );
        assert!(!tokens.is_expired_with_buffer(300));
    }

    #[test]
    fn token_expiring_within_buffer_counts_as_expired() {
        let tokens = OAuthTokens::new(
            "at".to_string(),
            None,
            Utc::now().timestamp_millis() + 60_000,
        );
        assert!(tokens.is_expired_with_buffer(300));
    }

    #[test]
    fn token_file_shape_round_trips() {
        let json = r#"{"accessToken":"a","refreshToken":"r","expiry":1700000000000}"#;
        let tokens: OAuthTokens = serde_json::from_str(json).unwrap();
        assert_eq!(tokens.access_token, "a");
        assert_eq!(tokens.refresh_token.as_deref(), Some("r"));
        assert_eq!(tokens.expires_at_ms, 1_700_000_000_000);

        let out = serde_json::to_string(&tokens).unwrap();
        assert!(out.contains("\"expiry\":1700000000000"));
    }
}
