use std::time::SystemTime;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::warn;

use crate::backoff::GUEST_TOKEN_BACKOFF;
use crate::client::Client;
use crate::error::{Error, Result};
use crate::headers;

#[derive(Debug, Default)]
struct GuestState {
    token: String,
    limited_until: Option<SystemTime>,
}

/// At most one shared guest token, with a rate-limited-until marker.
#[derive(Default)]
pub struct GuestTokenCache {
    inner: Mutex<GuestState>,
}

impl GuestTokenCache {
    /// Returns the cached token when it is set and not marked limited.
    pub fn get(&self) -> Option<String> {
        let state = self.inner.lock();
        if state.token.is_empty() {
            return None;
        }
        if let Some(until) = state.limited_until {
            if SystemTime::now() < until {
                return None;
            }
        }
        Some(state.token.clone())
    }

    pub fn set(&self, token: impl Into<String>) {
        let mut state = self.inner.lock();
        state.token = token.into();
        state.limited_until = None;
    }

    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.token.clear();
        state.limited_until = None;
    }

    pub fn mark_rate_limited(&self, until: SystemTime) {
        self.inner.lock().limited_until = Some(until);
    }
}

#[derive(Deserialize)]
struct GuestTokenResponse {
    #[serde(default)]
    guest_token: String,
}

impl Client {
    /// Fetches a guest token in a single attempt.
    pub(crate) async fn fetch_guest_token(&self, proxy: Option<&str>) -> Result<String> {
        let url = format!("{}/1.1/guest/activate.json", self.cfg.api_base);
        let headers = headers::guest_headers("");
        let response = self
            .http
            .execute(proxy, "POST", &url, &headers, None)
            .await?;
        if response.status != 200 {
            return Err(Error::Api(format!(
                "guest token: HTTP {}",
                response.status
            )));
        }
        let parsed: GuestTokenResponse = serde_json::from_slice(&response.body)?;
        if parsed.guest_token.is_empty() {
            return Err(Error::Api("empty guest token in response".into()));
        }
        Ok(parsed.guest_token)
    }

    /// Fetches a fresh guest token with up to 3 attempts and exponential
    /// backoff between them.
    pub(crate) async fn acquire_guest_token(&self) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..3u32 {
            if attempt > 0 {
                tokio::time::sleep(GUEST_TOKEN_BACKOFF.duration(attempt)).await;
            }
            match self.fetch_guest_token(None).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "guest token acquisition failed");
                    last_err = Some(e);
                }
            }
        }
        Err(Error::Api(format!(
            "acquire guest token after 3 attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
