use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::account::Account;
use crate::captcha::Solver;
use crate::constants;

/// Called on every terminal request outcome: `(endpoint, success, rate_limited)`.
pub type MetricsHook = Arc<dyn Fn(&str, bool, bool) + Send + Sync>;

/// Per-account per-endpoint request budget.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 50,
            window: Duration::from_secs(15 * 60),
        }
    }
}

/// Top-level client configuration. Every field has a workable default except
/// `accounts`, which may legitimately be empty for guest-only reads.
pub struct ClientConfig {
    /// Accounts to seed the pool with.
    pub accounts: Vec<Account>,

    /// Proxy URL for accounts without a per-account proxy.
    pub default_proxy: Option<String>,

    /// How long saved sessions are considered valid.
    pub session_ttl: Duration,

    /// Soft-deactivation duration for auth errors.
    pub auth_cooldown: Duration,

    /// Soft-deactivation duration for banned/locked accounts.
    pub ban_cooldown: Duration,

    /// Optional CAPTCHA solver for locked accounts and login challenges.
    pub captcha_solver: Option<Arc<dyn Solver>>,

    pub rate_limit: RateLimitConfig,

    /// Number of anonymous sessions to mint at startup via the welcome flow.
    pub open_account_count: usize,

    pub metrics_hook: Option<MetricsHook>,

    /// Overrides the default session persistence directory
    /// (`~/.corvid/sessions`).
    pub session_dir: Option<PathBuf>,

    pub proxy_backoff_initial: Duration,
    pub proxy_backoff_max: Duration,

    /// Whether an internal-error (code 131) body that still carries a
    /// non-null `data` field counts as success. The service frequently
    /// returns usable payloads alongside code 131.
    pub accept_partial_data: bool,

    /// REST API base, overridable for tests.
    pub api_base: String,
    /// GraphQL base, overridable for tests.
    pub graphql_base: String,
    /// Home page used for signing-key derivation, overridable for tests.
    pub home_url: String,
    /// Base URL the on-demand script is served from, overridable for tests.
    pub ondemand_base: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            default_proxy: None,
            session_ttl: Duration::from_secs(24 * 3600),
            auth_cooldown: Duration::from_secs(3600),
            ban_cooldown: Duration::from_secs(6 * 3600),
            captcha_solver: None,
            rate_limit: RateLimitConfig::default(),
            open_account_count: 0,
            metrics_hook: None,
            session_dir: None,
            proxy_backoff_initial: Duration::from_secs(30),
            proxy_backoff_max: Duration::from_secs(30 * 60),
            accept_partial_data: true,
            api_base: constants::API_BASE.to_string(),
            graphql_base: constants::GRAPHQL_BASE.to_string(),
            home_url: constants::HOME_URL.to_string(),
            ondemand_base: constants::ONDEMAND_BASE.to_string(),
        }
    }
}
