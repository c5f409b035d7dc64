//! The dispatch loop: select an account, sign, send, classify the result,
//! and react by retrying, rotating tokens, re-logging-in, failing over to
//! another account, or falling back to a guest token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use url::Url;

use crate::account::{Account, CT0_MAX_AGE};
use crate::backoff::{self, BackoffConfig, REQUEST_BACKOFF};
use crate::classify::{
    classify_body, extract_ct0, has_response_data, parse_rate_limit_reset, truncate_body,
    ErrorClass,
};
use crate::client::Client;
use crate::endpoints::requires_auth;
use crate::error::{Error, Result};
use crate::headers;
use crate::http::HttpResponse;

const MAX_RETRIES: usize = 3;
/// How long an auth-required read waits for an eligible account.
const AUTH_ACCOUNT_WAIT: Duration = Duration::from_secs(5 * 60);

/// Outcome of one account attempt after classification and any inline
/// recovery (CSRF rotation, re-login).
enum Reaction {
    Success(Vec<u8>, HashMap<String, String>),
    Retry(Error),
    Fatal(Error),
}

/// True when a transport error looks like proxy connectivity failure
/// rather than a problem with the account itself.
fn is_proxy_error(err: &Error) -> bool {
    let msg = err.to_string();
    msg.contains("proxy")
        || msg.contains("SOCKS")
        || msg.contains("tunnel")
        || msg.contains("connection refused")
        || msg.contains("no such host")
}

impl Client {
    /// Executes a GET with multi-account retry, ct0 rotation, re-login,
    /// and guest-token fallback. Returns the body and response headers.
    pub(crate) async fn execute_read(
        &self,
        endpoint: &str,
        url: &str,
    ) -> Result<(Vec<u8>, HashMap<String, String>)> {
        backoff::request_jitter().await;

        let mut last_err: Option<Error> = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(REQUEST_BACKOFF.duration(attempt as u32)).await;
            }

            let filter = |a: &Account| {
                a.allow_request(endpoint) && a.proxy_ready(SystemTime::now())
            };
            let account = if requires_auth(endpoint) {
                self.pool
                    .next_with_wait(filter, endpoint, AUTH_ACCOUNT_WAIT)
                    .await
            } else {
                self.pool.next(filter)
            };
            let Some(account) = account else {
                last_err = Some(Error::PoolExhausted(format!(
                    "no eligible account for {endpoint}"
                )));
                break;
            };

            self.rotate_stale_ct0(&account);

            let (auth_token, ct0, user_agent) = account.credentials();
            let request_headers =
                headers::api_headers(&auth_token, &ct0, &user_agent, Some(&account.profile));
            let response = match self
                .send_signed(account.proxy.as_deref(), "GET", url, request_headers, None)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if account.proxy.is_some() && is_proxy_error(&e) {
                        self.mark_proxy_down(&account);
                    } else {
                        account.record_failure();
                    }
                    last_err = Some(e);
                    continue;
                }
            };

            // Any HTTP response proves the proxy path works again.
            account.reset_proxy_failures();

            match self.react_read(endpoint, url, &account, &ct0, response).await {
                Reaction::Success(body, headers) => return Ok((body, headers)),
                Reaction::Fatal(e) => return Err(e),
                Reaction::Retry(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        if requires_auth(endpoint) {
            return Err(Error::PoolExhausted(format!(
                "{endpoint} requires an authenticated account: {}",
                last_err.map(|e| e.to_string()).unwrap_or_default()
            )));
        }
        self.guest_fallback(endpoint, url, last_err).await
    }

    /// Executes a POST bound to one caller-supplied account. No pool
    /// rotation, no guest fallback; 200 and 201 are acceptable.
    pub(crate) async fn execute_write(
        &self,
        account: &Arc<Account>,
        endpoint: &str,
        url: &str,
        payload: String,
    ) -> Result<Vec<u8>> {
        backoff::request_jitter().await;

        let mut last_err: Option<Error> = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(REQUEST_BACKOFF.duration(attempt as u32)).await;
            }

            self.rotate_stale_ct0(account);

            let (auth_token, ct0, user_agent) = account.credentials();
            let request_headers =
                headers::api_headers(&auth_token, &ct0, &user_agent, Some(&account.profile));
            let response = match self
                .send_signed(
                    account.proxy.as_deref(),
                    "POST",
                    url,
                    request_headers,
                    Some(payload.clone()),
                )
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if account.proxy.is_some() && is_proxy_error(&e) {
                        self.mark_proxy_down(account);
                    } else {
                        account.record_failure();
                    }
                    last_err = Some(e);
                    continue;
                }
            };

            account.reset_proxy_failures();

            match self
                .react_write(endpoint, url, account, &ct0, &payload, response)
                .await
            {
                Reaction::Success(body, _) => return Ok(body),
                Reaction::Fatal(e) => return Err(e),
                Reaction::Retry(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(Error::Api(format!(
            "{endpoint} failed after {MAX_RETRIES} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Injects the transaction-ID header (keyed by method and query-less
    /// path) and dispatches through the stealth client.
    pub(crate) async fn send_signed(
        &self,
        proxy: Option<&str>,
        method: &str,
        url: &str,
        mut request_headers: HashMap<String, String>,
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());
        match self.txid.generate_id(method, &path).await {
            Ok(id) => {
                request_headers.insert("x-client-transaction-id".to_string(), id);
            }
            Err(e) => debug!(error = %e, "transaction id unavailable, sending unsigned"),
        }
        self.http
            .execute(proxy, method, url, &request_headers, body)
            .await
    }

    fn rotate_stale_ct0(&self, account: &Account) {
        if account.ct0_age() > CT0_MAX_AGE {
            account.rotate_ct0();
            info!(user = %account.username, "ct0 rotated (proactive)");
            self.persist_session(account);
        }
    }

    pub(crate) fn persist_session(&self, account: &Account) {
        let (auth_token, ct0, _) = account.credentials();
        if let Err(e) = crate::session::save_session(
            self.cfg.session_dir.as_deref(),
            &account.username,
            &auth_token,
            &ct0,
        ) {
            warn!(user = %account.username, error = %e, "session save failed");
        }
    }

    fn mark_proxy_down(&self, account: &Account) {
        let backoff = BackoffConfig {
            initial: self.cfg.proxy_backoff_initial,
            max: self.cfg.proxy_backoff_max,
            multiplier: 2.0,
            jitter_pct: 0.3,
        };
        let (fails, wait) = account.record_proxy_failure(&backoff);
        warn!(
            user = %account.username,
            consec_fails = fails,
            backoff_secs = wait.as_secs(),
            "proxy down, backing off"
        );
    }

    async fn react_read(
        &self,
        endpoint: &str,
        url: &str,
        account: &Arc<Account>,
        sent_ct0: &str,
        response: HttpResponse,
    ) -> Reaction {
        match response.status {
            429 => {
                self.record_api_call(endpoint, false, true);
                let reset =
                    parse_rate_limit_reset(response.headers.get("x-rate-limit-reset").map(|s| s.as_str()));
                account.mark_endpoint_rate_limited(endpoint, reset);
                Reaction::Retry(Error::RateLimited(format!("429 on {endpoint}")))
            }
            401 | 403 => {
                self.record_api_call(endpoint, false, false);
                match classify_body(&response.body) {
                    ErrorClass::Csrf => self.csrf_retry(endpoint, "GET", url, account, None).await,
                    ErrorClass::AuthExpired => {
                        self.relogin_retry(endpoint, "GET", url, account, None).await
                    }
                    _ => {
                        account.record_failure();
                        Reaction::Retry(Error::Api(format!(
                            "{endpoint} HTTP {}: {}",
                            response.status,
                            truncate_body(&response.body, 200)
                        )))
                    }
                }
            }
            200 => self.react_read_ok(endpoint, url, account, sent_ct0, response).await,
            status => {
                self.record_api_call(endpoint, false, false);
                warn!(
                    endpoint,
                    status,
                    body = %truncate_body(&response.body, 500),
                    "non-200 response"
                );
                if account.record_failure() {
                    let (total, failed, consec) = account.stats();
                    warn!(
                        user = %account.username,
                        total, failed, consec, "account unhealthy, deactivating"
                    );
                    self.pool.deactivate(account);
                }
                Reaction::Fatal(Error::Api(format!(
                    "{endpoint} HTTP {status}: {}",
                    truncate_body(&response.body, 200)
                )))
            }
        }
    }

    async fn react_read_ok(
        &self,
        endpoint: &str,
        url: &str,
        account: &Arc<Account>,
        sent_ct0: &str,
        response: HttpResponse,
    ) -> Reaction {
        match classify_body(&response.body) {
            ErrorClass::None => {
                self.adopt_server_ct0(account, sent_ct0, &response.set_cookies);
                self.record_api_call(endpoint, true, false);
                account.record_success();
                Reaction::Success(response.body, response.headers)
            }
            ErrorClass::Csrf => self.csrf_retry(endpoint, "GET", url, account, None).await,
            ErrorClass::AuthExpired => self.relogin_retry(endpoint, "GET", url, account, None).await,
            ErrorClass::Internal => {
                if self.cfg.accept_partial_data && has_response_data(&response.body) {
                    self.adopt_server_ct0(account, sent_ct0, &response.set_cookies);
                    self.record_api_call(endpoint, true, false);
                    account.record_success();
                    debug!(endpoint, "error 131 with usable data, treating as success");
                    return Reaction::Success(response.body, response.headers);
                }
                warn!(user = %account.username, endpoint, "error 131 without data, retrying");
                Reaction::Retry(Error::Api("service internal error (131)".into()))
            }
            ErrorClass::Banned => {
                self.record_api_call(endpoint, false, false);
                warn!(user = %account.username, "account banned (code 88)");
                self.pool.soft_deactivate(account, self.cfg.ban_cooldown);
                Reaction::Retry(Error::Api("account banned".into()))
            }
            ErrorClass::Suspended => {
                self.record_api_call(endpoint, false, false);
                warn!(user = %account.username, "account suspended (code 64)");
                self.pool.deactivate(account);
                Reaction::Retry(Error::Api("account suspended".into()))
            }
            ErrorClass::Locked => {
                self.record_api_call(endpoint, false, false);
                warn!(user = %account.username, "account locked (code 326, captcha needed)");
                if self.cfg.captcha_solver.is_some() {
                    info!(user = %account.username, "attempting CAPTCHA unlock via relogin");
                    if let Err(e) = self.relogin(account).await {
                        warn!(user = %account.username, error = %e, "CAPTCHA unlock failed");
                    } else if let Ok(body_headers) =
                        self.resend(account, "GET", url, None).await
                    {
                        self.record_api_call(endpoint, true, false);
                        account.record_success();
                        info!(user = %account.username, "CAPTCHA unlock succeeded");
                        return Reaction::Success(body_headers.0, body_headers.1);
                    }
                }
                self.pool.soft_deactivate(account, self.cfg.ban_cooldown);
                Reaction::Retry(Error::Api("account locked".into()))
            }
            class @ (ErrorClass::Blocked | ErrorClass::NotAuthorized) => {
                self.record_api_call(endpoint, false, false);
                warn!(user = %account.username, ?class, "account blocked from endpoint");
                self.pool.soft_deactivate(account, self.cfg.auth_cooldown);
                Reaction::Retry(Error::Api(format!("account error: {class:?}")))
            }
        }
    }

    async fn react_write(
        &self,
        endpoint: &str,
        url: &str,
        account: &Arc<Account>,
        sent_ct0: &str,
        payload: &str,
        response: HttpResponse,
    ) -> Reaction {
        match response.status {
            429 => {
                self.record_api_call(endpoint, false, true);
                let reset =
                    parse_rate_limit_reset(response.headers.get("x-rate-limit-reset").map(|s| s.as_str()));
                account.mark_endpoint_rate_limited(endpoint, reset);
                Reaction::Retry(Error::RateLimited(format!("429 on {endpoint}")))
            }
            401 | 403 => {
                self.record_api_call(endpoint, false, false);
                match classify_body(&response.body) {
                    ErrorClass::Csrf => {
                        self.csrf_retry(endpoint, "POST", url, account, Some(payload)).await
                    }
                    ErrorClass::AuthExpired => {
                        self.relogin_retry(endpoint, "POST", url, account, Some(payload))
                            .await
                    }
                    _ => {
                        account.record_failure();
                        Reaction::Fatal(Error::Api(format!(
                            "{endpoint} HTTP {}: {}",
                            response.status,
                            truncate_body(&response.body, 200)
                        )))
                    }
                }
            }
            200 | 201 => match classify_body(&response.body) {
                ErrorClass::None => {
                    self.adopt_server_ct0(account, sent_ct0, &response.set_cookies);
                    self.record_api_call(endpoint, true, false);
                    account.record_success();
                    Reaction::Success(response.body, response.headers)
                }
                ErrorClass::Csrf => {
                    self.csrf_retry(endpoint, "POST", url, account, Some(payload)).await
                }
                class => {
                    self.record_api_call(endpoint, false, false);
                    account.record_failure();
                    Reaction::Fatal(Error::Api(format!(
                        "{endpoint} error class {class:?}: {}",
                        truncate_body(&response.body, 200)
                    )))
                }
            },
            status => {
                self.record_api_call(endpoint, false, false);
                account.record_failure();
                Reaction::Fatal(Error::Api(format!(
                    "{endpoint} HTTP {status}: {}",
                    truncate_body(&response.body, 200)
                )))
            }
        }
    }

    /// One inline recovery attempt for a CSRF mismatch: rotate the token
    /// locally, persist, and retry once with the same account.
    async fn csrf_retry(
        &self,
        endpoint: &str,
        method: &str,
        url: &str,
        account: &Arc<Account>,
        payload: Option<&str>,
    ) -> Reaction {
        warn!(user = %account.username, "CSRF error 353, rotating ct0");
        account.rotate_ct0();
        self.persist_session(account);

        match self.resend(account, method, url, payload).await {
            Ok((body, headers)) => {
                self.record_api_call(endpoint, true, false);
                account.record_success();
                Reaction::Success(body, headers)
            }
            Err(e) => {
                account.record_failure();
                Reaction::Retry(Error::Api(format!("CSRF retry failed: {e}")))
            }
        }
    }

    /// One inline recovery attempt for expired auth: re-login, retry once;
    /// on failure soft-deactivate for the auth cooldown.
    async fn relogin_retry(
        &self,
        endpoint: &str,
        method: &str,
        url: &str,
        account: &Arc<Account>,
        payload: Option<&str>,
    ) -> Reaction {
        warn!(user = %account.username, "auth expired (code 32), attempting relogin");
        if let Err(e) = self.relogin(account).await {
            warn!(user = %account.username, error = %e, "relogin failed");
            self.pool.soft_deactivate(account, self.cfg.auth_cooldown);
            return Reaction::Retry(e);
        }

        match self.resend(account, method, url, payload).await {
            Ok((body, headers)) => {
                self.record_api_call(endpoint, true, false);
                account.record_success();
                Reaction::Success(body, headers)
            }
            Err(_) => {
                self.pool.soft_deactivate(account, self.cfg.auth_cooldown);
                Reaction::Retry(Error::Api("post-relogin request failed".into()))
            }
        }
    }

    /// Re-sends a request with the account's current credentials and
    /// requires a clean success (2xx, no classified error in the body).
    async fn resend(
        &self,
        account: &Arc<Account>,
        method: &str,
        url: &str,
        payload: Option<&str>,
    ) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let (auth_token, ct0, user_agent) = account.credentials();
        let request_headers =
            headers::api_headers(&auth_token, &ct0, &user_agent, Some(&account.profile));
        let response = self
            .send_signed(
                account.proxy.as_deref(),
                method,
                url,
                request_headers,
                payload.map(|p| p.to_string()),
            )
            .await?;

        let ok_status = response.status == 200 || (method == "POST" && response.status == 201);
        if !ok_status || classify_body(&response.body) != ErrorClass::None {
            return Err(Error::Api(format!(
                "retry got HTTP {}: {}",
                response.status,
                truncate_body(&response.body, 200)
            )));
        }
        self.adopt_server_ct0(account, &ct0, &response.set_cookies);
        Ok((response.body, response.headers))
    }

    /// Adopts a `ct0` value the server handed back via Set-Cookie, then
    /// persists the refreshed session.
    fn adopt_server_ct0(&self, account: &Account, sent_ct0: &str, set_cookies: &[String]) {
        if let Some(new_ct0) = extract_ct0(set_cookies) {
            if new_ct0 != sent_ct0 {
                account.set_ct0(new_ct0);
                self.persist_session(account);
            }
        }
    }

    /// Read-only fallback once the pool is exhausted: use (and if needed
    /// acquire) the shared guest token.
    async fn guest_fallback(
        &self,
        endpoint: &str,
        url: &str,
        last_err: Option<Error>,
    ) -> Result<(Vec<u8>, HashMap<String, String>)> {
        let guest_token = match self.guest.get() {
            Some(token) => token,
            None => {
                let token = match self.acquire_guest_token().await {
                    Ok(token) => token,
                    Err(e) => {
                        if let Some(last) = last_err {
                            return Err(Error::PoolExhausted(format!(
                                "pool exhausted for {endpoint}: {last}"
                            )));
                        }
                        return Err(Error::Api(format!(
                            "guest token unavailable for {endpoint}: {e}"
                        )));
                    }
                };
                self.guest.set(&token);
                info!(endpoint, "guest token acquired as fallback");
                token
            }
        };

        let response = self
            .send_signed(None, "GET", url, headers::guest_headers(&guest_token), None)
            .await?;

        match response.status {
            429 => {
                self.record_api_call(endpoint, false, true);
                let reset =
                    parse_rate_limit_reset(response.headers.get("x-rate-limit-reset").map(|s| s.as_str()));
                self.guest.mark_rate_limited(reset);
                Err(Error::RateLimited(format!(
                    "guest token rate-limited for {endpoint}"
                )))
            }
            401 | 403 => {
                warn!(endpoint, status = response.status, "guest token expired, reacquiring");
                self.guest.clear();
                let fresh = self.acquire_guest_token().await.map_err(|e| {
                    self.record_api_call(endpoint, false, false);
                    Error::Api(format!("guest token reacquisition failed for {endpoint}: {e}"))
                })?;
                self.guest.set(&fresh);
                let retry = self
                    .send_signed(None, "GET", url, headers::guest_headers(&fresh), None)
                    .await?;
                if retry.status != 200 {
                    self.record_api_call(endpoint, false, false);
                    return Err(Error::Api(format!(
                        "{endpoint} (guest retry) HTTP {}: {}",
                        retry.status,
                        truncate_body(&retry.body, 200)
                    )));
                }
                self.record_api_call(endpoint, true, false);
                Ok((retry.body, retry.headers))
            }
            200 => {
                self.record_api_call(endpoint, true, false);
                Ok((response.body, response.headers))
            }
            status => {
                self.record_api_call(endpoint, false, false);
                Err(Error::Api(format!(
                    "{endpoint} (guest) HTTP {status}: {}",
                    truncate_body(&response.body, 200)
                )))
            }
        }
    }
}
