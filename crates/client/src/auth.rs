use crate::transport::TransportError;
use qbridge_core::{now_ms, AuthMethod, EpochMs};
use reqwest::{header, Client};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Tokens are refreshed this long before the server says they expire.
const REFRESH_MARGIN_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at_ms: EpochMs,
}

/// Supplies the bearer token for every request.
pub struct TokenProvider {
    method: AuthMethod,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(base_url: &str, method: AuthMethod) -> Self {
        Self {
            method,
            token_url: format!("{}/oauth/token", base_url.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    pub async fn token(&self, client: &Client) -> Result<String, TransportError> {
        let (username, password, client_credentials) = match &self.method {
            AuthMethod::Bearer(token) => return Ok(token.clone()),
            AuthMethod::Password {
                username,
                password,
                client_credentials,
            } => (username, password, client_credentials),
        };

        let mut cached = self.cached.lock().await;
        let now = now_ms();
        if let Some(c) = cached.as_ref().filter(|c| c.expires_at_ms > now) {
            return Ok(c.token.clone());
        }

        debug!("requesting access token for {username}");
        let resp = client
            .post(&self.token_url)
            .header(header::AUTHORIZATION, format!("Basic {client_credentials}"))
            .form(&[
                ("grant_type", "password"),
                ("username", username.as_str()),
                ("password", password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TransportError::Auth(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Auth(format!("decoding token response: {e}")))?;

        info!("authenticated as {username}");
        *cached = Some(CachedToken {
            token: body.access_token.clone(),
            expires_at_ms: cache_deadline(now, body.expires_in),
        });
        Ok(body.access_token)
    }
}

/// When a token obtained at `now` should be considered stale.
pub fn cache_deadline(now: EpochMs, expires_in_secs: Option<i64>) -> EpochMs {
    let lifetime = expires_in_secs.unwrap_or(DEFAULT_EXPIRES_IN_SECS) - REFRESH_MARGIN_SECS;
    now + lifetime.max(0) * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_keeps_refresh_margin() {
        assert_eq!(cache_deadline(1_000, Some(600)), 1_000 + 300_000);
        assert_eq!(cache_deadline(0, None), 3_300_000);
        assert_eq!(cache_deadline(5, Some(60)), 5);
    }

    #[tokio::test]
    async fn bearer_token_is_returned_as_is() {
        let provider = TokenProvider::new("https://x.example/", AuthMethod::Bearer("abc".into()));
        assert_eq!(provider.token_url, "https://x.example/oauth/token");
        let token = provider.token(&Client::new()).await.unwrap();
        assert_eq!(token, "abc");
    }
}
