use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rand::RngCore;
use tracing::warn;

use crate::backoff::BackoffConfig;
use crate::config::RateLimitConfig;
use crate::constants::{BrowserProfile, BROWSER_PROFILES};
use crate::ratelimit::EndpointLimiter;

/// Maximum age of a ct0 token before proactive rotation.
pub const CT0_MAX_AGE: Duration = Duration::from_secs(4 * 3600);

/// Consecutive failures after which the health tracker votes to deactivate.
const UNHEALTHY_CONSEC_FAILURES: u32 = 5;

/// Generates a random 32-byte hex string for use as a ct0 CSRF token.
pub fn generate_ct0() -> String {
    let mut b = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut b);
    hex::encode(b)
}

#[derive(Debug, Default, Clone, Copy)]
struct Health {
    total: u64,
    failed: u64,
    consecutive: u32,
}

#[derive(Debug)]
struct AccountState {
    auth_token: String,
    ct0: String,
    /// `None` iff the ct0 token is unset.
    ct0_refreshed_at: Option<SystemTime>,
    active: bool,
    /// `Some` while soft-deactivated; `None` with `active == false` means
    /// permanent deactivation.
    reactivate_at: Option<SystemTime>,
    proxy_backoff_until: Option<SystemTime>,
    proxy_consec_fails: u32,
    health: Health,
}

/// One authenticated identity. All mutable fields live behind a single
/// mutex; the lock is never held across network I/O.
pub struct Account {
    pub username: String,
    pub password: String,
    pub totp_secret: String,
    pub proxy: Option<String>,
    pub user_agent: String,
    pub profile: BrowserProfile,
    pub(crate) limiter: EndpointLimiter,
    state: Mutex<AccountState>,
}

impl Account {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp_secret: String::new(),
            proxy: None,
            user_agent: BROWSER_PROFILES[0].user_agent.to_string(),
            profile: BROWSER_PROFILES[0],
            limiter: EndpointLimiter::new(RateLimitConfig::default()),
            state: Mutex::new(AccountState {
                auth_token: String::new(),
                ct0: String::new(),
                ct0_refreshed_at: None,
                active: true,
                reactivate_at: None,
                proxy_backoff_until: None,
                proxy_consec_fails: 0,
                health: Health::default(),
            }),
        }
    }

    /// Seeds a ready-made session, e.g. for accounts provisioned with
    /// `auth_token:ct0` pairs.
    pub fn with_session(mut self, auth_token: impl Into<String>, ct0: impl Into<String>) -> Self {
        let state = self.state.get_mut();
        state.auth_token = auth_token.into();
        state.ct0 = ct0.into();
        state.ct0_refreshed_at = Some(SystemTime::now());
        self
    }

    pub fn id(&self) -> &str {
        &self.username
    }

    // --- activation ---

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn reactivate_at(&self) -> Option<SystemTime> {
        self.state.lock().reactivate_at
    }

    pub(crate) fn soft_deactivate(&self, cooldown: Duration) {
        let mut state = self.state.lock();
        state.active = false;
        state.reactivate_at = Some(SystemTime::now() + cooldown);
    }

    pub(crate) fn deactivate(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.reactivate_at = None;
    }

    /// Restores a deactivated account to rotation. This is the external
    /// intervention hook for permanently deactivated accounts.
    pub fn reactivate(&self) {
        let mut state = self.state.lock();
        state.active = true;
        state.reactivate_at = None;
    }

    /// Restores a soft-deactivated account once its cooldown elapsed, then
    /// reports whether it may be selected.
    pub(crate) fn selectable(&self, now: SystemTime) -> bool {
        let mut state = self.state.lock();
        if !state.active {
            match state.reactivate_at {
                Some(at) if now >= at => {
                    state.active = true;
                    state.reactivate_at = None;
                }
                _ => return false,
            }
        }
        true
    }

    // --- credentials ---

    /// Time since the ct0 token was last refreshed. Unset tokens report as
    /// older than any rotation threshold.
    pub fn ct0_age(&self) -> Duration {
        let state = self.state.lock();
        match state.ct0_refreshed_at {
            Some(at) => SystemTime::now()
                .duration_since(at)
                .unwrap_or(Duration::ZERO),
            None => Duration::from_secs(24 * 3600),
        }
    }

    /// Generates a fresh ct0 token and updates the refresh timestamp.
    pub fn rotate_ct0(&self) {
        let mut state = self.state.lock();
        state.ct0 = generate_ct0();
        state.ct0_refreshed_at = Some(SystemTime::now());
    }

    /// Adopts a ct0 value handed back by the server.
    pub fn set_ct0(&self, ct0: impl Into<String>) {
        let mut state = self.state.lock();
        state.ct0 = ct0.into();
        state.ct0_refreshed_at = Some(SystemTime::now());
    }

    /// Consistent snapshot of `(auth_token, ct0, user_agent)`.
    pub fn credentials(&self) -> (String, String, String) {
        let state = self.state.lock();
        (
            state.auth_token.clone(),
            state.ct0.clone(),
            self.user_agent.clone(),
        )
    }

    /// Atomically replaces auth_token and ct0. Empty values clear the
    /// session (the refresh timestamp is only advanced for real tokens).
    pub fn set_credentials(&self, auth_token: impl Into<String>, ct0: impl Into<String>) {
        let mut state = self.state.lock();
        state.auth_token = auth_token.into();
        state.ct0 = ct0.into();
        state.ct0_refreshed_at = if state.ct0.is_empty() {
            None
        } else {
            Some(SystemTime::now())
        };
    }

    // --- per-endpoint rate limiting ---

    pub fn allow_request(&self, endpoint: &str) -> bool {
        self.limiter.allow(endpoint)
    }

    pub fn mark_endpoint_rate_limited(&self, endpoint: &str, until: SystemTime) {
        self.limiter.mark_rate_limited(endpoint, until);
    }

    pub fn is_endpoint_rate_limited(&self, endpoint: &str) -> bool {
        self.limiter.is_rate_limited(endpoint)
    }

    pub fn endpoint_available_at(&self, endpoint: &str) -> SystemTime {
        self.limiter.available_at(endpoint)
    }

    // --- proxy backoff ---

    pub fn proxy_ready(&self, now: SystemTime) -> bool {
        match self.state.lock().proxy_backoff_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Increments the consecutive proxy failure count and applies the next
    /// backoff step. Returns `(consecutive_failures, applied_backoff)`.
    pub(crate) fn record_proxy_failure(&self, backoff: &BackoffConfig) -> (u32, Duration) {
        let mut state = self.state.lock();
        state.proxy_consec_fails += 1;
        let fails = state.proxy_consec_fails;
        let wait = backoff.duration(fails - 1);
        state.proxy_backoff_until = Some(SystemTime::now() + wait);
        (fails, wait)
    }

    /// Any HTTP response proves the proxy path is alive again.
    pub(crate) fn reset_proxy_failures(&self) {
        let mut state = self.state.lock();
        state.proxy_consec_fails = 0;
    }

    // --- health tracking ---

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.health.total += 1;
        state.health.consecutive = 0;
    }

    /// Records a failure and returns the tracker's deactivation vote.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.health.total += 1;
        state.health.failed += 1;
        state.health.consecutive += 1;
        state.health.consecutive >= UNHEALTHY_CONSEC_FAILURES
    }

    pub fn stats(&self) -> (u64, u64, u32) {
        let health = self.state.lock().health;
        (health.total, health.failed, health.consecutive)
    }

    pub(crate) fn reset_health(&self) {
        self.state.lock().health = Health::default();
    }

    /// Earliest instant this account could serve the endpoint, or `None`
    /// when it is permanently deactivated.
    pub(crate) fn eligible_at(&self, endpoint: &str, now: SystemTime) -> Option<SystemTime> {
        let state = self.state.lock();
        if !state.active && state.reactivate_at.is_none() {
            return None;
        }
        let mut at = now;
        if let Some(t) = state.reactivate_at {
            at = at.max(t);
        }
        if let Some(t) = state.proxy_backoff_until {
            at = at.max(t);
        }
        drop(state);
        Some(at.max(self.limiter.available_at(endpoint)))
    }
}

/// Assigns one of the built-in browser profiles by index.
pub fn assign_browser_profile(account: &mut Account, idx: usize) {
    let profile = BROWSER_PROFILES[idx % BROWSER_PROFILES.len()];
    account.profile = profile;
    account.user_agent = profile.user_agent.to_string();
}

/// Parses a comma-separated account list.
///
/// Format: `user:pass`, `user:pass:auth_token:ct0`, or
/// `user:pass:auth_token:ct0:totp_secret`.
pub fn parse_accounts(raw: &str) -> Vec<Account> {
    let mut accounts = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.splitn(5, ':').collect();
        if parts.len() < 2 {
            warn!(entry, "invalid account entry, skipping");
            continue;
        }
        let mut account = Account::new(parts[0], parts[1]);
        if parts.len() >= 4 {
            account = account.with_session(parts[2], parts[3]);
        }
        if parts.len() >= 5 && !parts[4].is_empty() {
            account.totp_secret = parts[4].to_string();
        }
        assign_browser_profile(&mut account, accounts.len());
        accounts.push(account);
    }
    accounts
}
