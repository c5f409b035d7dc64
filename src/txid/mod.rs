//! Transaction-ID engine: derives signing material from the service's live
//! HTML/JS assets and computes the per-request `x-client-transaction-id`
//! header value.

mod cubic;
mod parser;
mod transaction;

pub use transaction::ClientTransaction;

use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::constants::{DEFAULT_USER_AGENT, HOME_URL, ONDEMAND_BASE};
use crate::error::{Error, Result};

const REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

struct ManagerState {
    ct: ClientTransaction,
    last_refresh: Instant,
}

/// Fetches the home page and on-demand script, caches the derived
/// [`ClientTransaction`], and refreshes it lazily every 30 minutes.
/// Refresh failures keep the previous state. Safe for many concurrent
/// `generate_id` callers.
pub struct TransactionManager {
    state: RwLock<Option<ManagerState>>,
    client: reqwest::Client,
    home_url: String,
    ondemand_base: String,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_sources(HOME_URL, ONDEMAND_BASE)
    }

    pub fn with_sources(home_url: impl Into<String>, ondemand_base: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(None),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            home_url: home_url.into(),
            ondemand_base: ondemand_base.into(),
        }
    }

    /// Fetches the home HTML and the referenced on-demand script, then
    /// swaps in a freshly-built transaction state.
    pub async fn initialize(&self) -> Result<()> {
        let home_html = self.fetch(&self.home_url).await?;
        let ondemand = parser::ondemand_url(&home_html, &self.ondemand_base)
            .ok_or_else(|| Error::Signing("on-demand script URL not found in home HTML".into()))?;
        let ondemand_js = self.fetch(&ondemand).await?;

        let ct = ClientTransaction::new(&home_html, &ondemand_js)?;
        let key_prefix: String = ct.animation_key().chars().take(8).collect();

        let mut state = self.state.write().await;
        *state = Some(ManagerState {
            ct,
            last_refresh: Instant::now(),
        });
        info!(anim_key_prefix = %key_prefix, "transaction signing state initialized");
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("user-agent", DEFAULT_USER_AGENT)
            .header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("accept-language", "en-US,en;q=0.9")
            .send()
            .await?;
        if response.status().as_u16() != 200 {
            return Err(Error::Signing(format!(
                "HTTP {} for {url}",
                response.status().as_u16()
            )));
        }
        Ok(response.text().await?)
    }

    /// Returns a transaction ID for the given method and URL path,
    /// refreshing stale signing state on demand. A concurrent caller sees
    /// either the old state or a fully-built new one.
    pub async fn generate_id(&self, method: &str, path: &str) -> Result<String> {
        let needs_refresh = match &*self.state.read().await {
            Some(state) => state.last_refresh.elapsed() > REFRESH_INTERVAL,
            None => true,
        };

        if needs_refresh {
            if let Err(e) = self.initialize().await {
                if self.state.read().await.is_none() {
                    return Err(Error::Signing(format!("signing init failed: {e}")));
                }
                warn!(error = %e, "signing refresh failed, using stale keys");
            }
        }

        let state = self.state.read().await;
        match &*state {
            Some(state) => Ok(state.ct.generate_id(method, path)),
            None => Err(Error::Signing("signing state not initialized".into())),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
