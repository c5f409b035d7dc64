use std::sync::Arc;

use tracing::warn;

use crate::account::Account;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::guest::GuestTokenCache;
use crate::http::StealthClient;
use crate::pool::Pool;
use crate::txid::TransactionManager;

/// The top-level scraping and posting client. Owns the account pool, the
/// transaction-ID manager, the guest-token cache, and the HTTP client;
/// accounts are shared by reference with the pool.
pub struct Client {
    pub(crate) http: StealthClient,
    pub(crate) pool: Pool,
    pub(crate) txid: TransactionManager,
    pub(crate) guest: GuestTokenCache,
    pub(crate) cfg: ClientConfig,
}

impl Client {
    /// Wires up a fully-functional client: seeds rate limiters, derives
    /// signing material, restores or creates sessions for every account,
    /// and mints any requested anonymous sessions.
    pub async fn new(mut cfg: ClientConfig) -> Result<Self> {
        let accounts: Vec<Arc<Account>> = cfg
            .accounts
            .drain(..)
            .map(|account| {
                account.limiter.set_config(cfg.rate_limit);
                Arc::new(account)
            })
            .collect();

        let http = StealthClient::new(cfg.default_proxy.as_deref())?;
        let txid = TransactionManager::with_sources(&cfg.home_url, &cfg.ondemand_base);

        let client = Self {
            http,
            pool: Pool::new(accounts),
            txid,
            guest: GuestTokenCache::default(),
            cfg,
        };

        if let Err(e) = client.txid.initialize().await {
            warn!(error = %e, "signing init failed, x-client-transaction-id will be missing");
        }

        for account in client.pool.accounts() {
            if let Err(e) = client.load_or_login(&account).await {
                warn!(user = %account.username, error = %e, "account login failed");
                account.deactivate();
            }
        }

        for attempt in 0..client.cfg.open_account_count {
            match client.login_open_account().await {
                Ok(account) => {
                    account.limiter.set_config(client.cfg.rate_limit);
                    client.pool.add(Arc::new(account));
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "open account creation failed");
                }
            }
        }

        Ok(client)
    }

    /// The underlying account pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub(crate) fn record_api_call(&self, endpoint: &str, success: bool, rate_limited: bool) {
        if let Some(hook) = &self.cfg.metrics_hook {
            hook(endpoint, success, rate_limited);
        }
    }
}
