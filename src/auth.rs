//! The multi-step onboarding flow. The server owns the state machine: each
//! round POSTs a subtask answer and receives `(flow_token, subtasks)`, with
//! the first subtask naming the next required step.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::account::{generate_ct0, Account};
use crate::classify::truncate_body;
use crate::client::Client;
use crate::constants::ARKOSE_PUBLIC_KEY;
use crate::error::{Error, Result};
use crate::headers;
use crate::session;

/// Overall deadline for one login flow, CAPTCHA solving included.
const LOGIN_DEADLINE: Duration = Duration::from_secs(3 * 60);
const MAX_FLOW_ROUNDS: usize = 10;

/// One step of the onboarding flow.
#[derive(Debug, Deserialize)]
pub struct FlowResponse {
    #[serde(default)]
    pub flow_token: String,
    #[serde(default)]
    pub subtasks: Vec<FlowSubtask>,
}

#[derive(Debug, Deserialize)]
pub struct FlowSubtask {
    #[serde(default)]
    pub subtask_id: String,
}

fn parse_flow_response(body: &[u8]) -> Result<FlowResponse> {
    let flow: FlowResponse = serde_json::from_slice(body)?;
    if flow.flow_token.is_empty() {
        return Err(Error::Login(format!(
            "empty flow_token in response: {}",
            truncate_body(body, 200)
        )));
    }
    Ok(flow)
}

/// The `subtask_versions` body sent when opening a flow, identical for the
/// login and welcome flows.
const FLOW_INIT_PAYLOAD: &str = r#"{"input_flow_data":{"flow_context":{"debug_overrides":{},"start_location":{"location":"splash_screen"}}},"subtask_versions":{"action_list":2,"alert_dialog":1,"app_download_cta":1,"check_logged_in_account":1,"choice_selection":3,"contacts_live_sync_permission_prompt":0,"cta":7,"email_verification":2,"end_flow":1,"enter_date":1,"enter_email":2,"enter_password":5,"enter_phone":2,"enter_recaptcha":1,"enter_text":5,"enter_username":2,"generic_urt":3,"in_app_notification":1,"interest_picker":3,"js_instrumentation":1,"menu_dialog":1,"notifications_permission_prompt":2,"open_account":2,"open_home_timeline":1,"open_link":1,"phone_verification":4,"privacy_options":1,"security_key":3,"select_avatar":4,"select_banner":2,"settings_list":7,"show_code":1,"sign_up":2,"sign_up_review":4,"tweet_selection_urt":1,"update_users":1,"upload_media":1,"user_recommendations_list":4,"user_recommendations_urt":1,"wait_spinner":3,"web_modal":1}}"#;

const JS_INSTRUMENTATION_STUB: &str = r#"{"rf":{"a":"b"},"s":"s"}"#;

fn js_instrumentation_payload(flow_token: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginJsInstrumentationSubtask",
            "js_instrumentation": { "response": JS_INSTRUMENTATION_STUB, "link": "next_link" },
        }],
    })
}

fn username_payload(flow_token: &str, username: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginEnterUserIdentifierSSO",
            "settings_list": {
                "setting_responses": [{
                    "key": "user_identifier",
                    "response_data": { "text_data": { "result": username } },
                }],
                "link": "next_link",
            },
        }],
    })
}

fn password_payload(flow_token: &str, password: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginEnterPassword",
            "enter_password": { "password": password, "link": "next_link" },
        }],
    })
}

fn captcha_payload(flow_token: &str, captcha_token: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginArkoseChallenge",
            "web_modal": {
                "completion_deeplink":
                    format!("twitter://onboarding/web_modal/next_link?access_token={captcha_token}"),
            },
        }],
    })
}

fn totp_payload(flow_token: &str, code: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginTwoFactorAuthChallenge",
            "enter_text": { "text": code, "link": "next_link" },
        }],
    })
}

fn alternate_identifier_payload(flow_token: &str, identifier: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": "LoginEnterAlternateIdentifierSubtask",
            "enter_text": { "text": identifier, "link": "next_link" },
        }],
    })
}

/// Unknown subtasks get a no-op `next_link` action so the flow keeps
/// moving.
fn generic_payload(flow_token: &str, subtask_id: &str) -> Value {
    json!({
        "flow_token": flow_token,
        "subtask_inputs": [{
            "subtask_id": subtask_id,
            "action_list": { "link": "next_link" },
        }],
    })
}

fn totp_code(secret: &str) -> Result<String> {
    let secret_bytes = totp_rs::Secret::Encoded(secret.to_string())
        .to_bytes()
        .map_err(|e| Error::Login(format!("invalid TOTP secret: {e:?}")))?;
    let totp = totp_rs::TOTP::new_unchecked(totp_rs::Algorithm::SHA1, 6, 1, 30, secret_bytes);
    totp.generate_current()
        .map_err(|e| Error::Login(format!("TOTP code generation failed: {e}")))
}

impl Client {
    /// Clears auth credentials, drops the persisted session, and performs a
    /// fresh `load_or_login`. Health counters reset on success.
    pub(crate) async fn relogin(&self, account: &Arc<Account>) -> Result<()> {
        info!(user = %account.username, "attempting relogin");

        account.set_credentials("", "");
        session::delete_session(self.cfg.session_dir.as_deref(), &account.username);

        self.load_or_login(account)
            .await
            .map_err(|e| Error::Login(format!("relogin {}: {e}", account.username)))?;

        account.reset_health();
        info!(user = %account.username, "relogin succeeded");
        Ok(())
    }

    /// Tries, in order: a persisted session within TTL, pre-provided
    /// credentials, then a fresh login (which needs a password).
    pub(crate) async fn load_or_login(&self, account: &Arc<Account>) -> Result<()> {
        match session::load_session(
            self.cfg.session_dir.as_deref(),
            &account.username,
            self.cfg.session_ttl,
        ) {
            Ok(Some((auth_token, ct0))) => {
                account.set_credentials(auth_token, ct0);
                info!(user = %account.username, "loaded session from disk");
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => warn!(user = %account.username, error = %e, "error loading session"),
        }

        let (auth_token, ct0, _) = account.credentials();
        if !auth_token.is_empty() && !ct0.is_empty() {
            account.set_credentials(auth_token, ct0);
            info!(user = %account.username, "using provided credentials");
            self.persist_session(account);
            return Ok(());
        }

        if account.password.is_empty() {
            return Err(Error::Login(format!(
                "no session and no password for account {}",
                account.username
            )));
        }

        self.login(account)
            .await
            .map_err(|e| Error::Login(format!("login failed for {}: {e}", account.username)))?;
        self.persist_session(account);
        Ok(())
    }

    async fn login(&self, account: &Arc<Account>) -> Result<()> {
        info!(user = %account.username, "logging in");
        tokio::time::timeout(LOGIN_DEADLINE, self.run_login_flow(account))
            .await
            .map_err(|_| Error::Login(format!("login timed out for {}", account.username)))?
    }

    async fn run_login_flow(&self, account: &Arc<Account>) -> Result<()> {
        let proxy = account.proxy.as_deref();
        let guest_token = self.fetch_guest_token(proxy).await?;

        let mut flow = self.init_login_flow(proxy, &guest_token).await?;

        'rounds: for _ in 0..MAX_FLOW_ROUNDS {
            let Some(subtask) = flow.subtasks.first() else {
                break;
            };
            let subtask_id = subtask.subtask_id.clone();
            debug!(user = %account.username, subtask = %subtask_id, "login subtask");

            let payload = match subtask_id.as_str() {
                "LoginJsInstrumentationSubtask" => js_instrumentation_payload(&flow.flow_token),
                "LoginEnterUserIdentifierSSO" => {
                    username_payload(&flow.flow_token, &account.username)
                }
                "LoginEnterPassword" => password_payload(&flow.flow_token, &account.password),
                "LoginArkoseChallenge" | "LoginArkoseCaptcha" | "LoginEnterRecaptcha" => {
                    let Some(solver) = &self.cfg.captcha_solver else {
                        return Err(Error::Captcha(format!(
                            "CAPTCHA required but no solver configured for {}",
                            account.username
                        )));
                    };
                    let token = solver
                        .solve(ARKOSE_PUBLIC_KEY, "https://x.com")
                        .await
                        .map_err(|e| {
                            Error::Captcha(format!(
                                "CAPTCHA solve failed for {}: {e}",
                                account.username
                            ))
                        })?;
                    info!(user = %account.username, "CAPTCHA solved for login");
                    captcha_payload(&flow.flow_token, &token)
                }
                "LoginTwoFactorAuthChallenge" => {
                    if account.totp_secret.is_empty() {
                        return Err(Error::Login(format!(
                            "2FA required but no TOTP secret for {}",
                            account.username
                        )));
                    }
                    let code = totp_code(&account.totp_secret)?;
                    info!(user = %account.username, "submitting TOTP code");
                    totp_payload(&flow.flow_token, &code)
                }
                "LoginEnterAlternateIdentifierSubtask" => {
                    alternate_identifier_payload(&flow.flow_token, &account.username)
                }
                "LoginSuccessSubtask" | "AccountDuplicationCheck" => {
                    debug!(
                        user = %account.username,
                        terminal = %subtask_id,
                        "login flow complete"
                    );
                    break 'rounds;
                }
                "DenyLoginSubtask" => {
                    return Err(Error::Login(format!(
                        "login denied for {} (account may be locked or disabled)",
                        account.username
                    )));
                }
                other => {
                    warn!(user = %account.username, subtask = other, "unknown login subtask");
                    generic_payload(&flow.flow_token, other)
                }
            };

            flow = self
                .submit_flow_step(proxy, &guest_token, payload)
                .await
                .map_err(|e| {
                    Error::Login(format!(
                        "login subtask {subtask_id} for {}: {e}",
                        account.username
                    ))
                })?;
        }

        let auth_token = self
            .harvest_cookie("auth_token")
            .ok_or_else(|| {
                Error::Login(format!(
                    "login completed but no auth_token in cookies for {}",
                    account.username
                ))
            })?;
        let ct0 = self.harvest_cookie("ct0").unwrap_or_else(generate_ct0);

        account.set_credentials(auth_token, ct0);
        info!(user = %account.username, "login successful");
        Ok(())
    }

    /// Mints an anonymous session via the welcome flow. Mirrors the web
    /// client's two-step behaviour (init, then the js_instrumentation
    /// stub); the subtask scan is a loop so further steps can slot in.
    pub(crate) async fn login_open_account(&self) -> Result<Account> {
        let guest_token = self.fetch_guest_token(None).await?;

        let url = format!(
            "{}/1.1/onboarding/task.json?flow_name=welcome",
            self.cfg.api_base
        );
        let flow_headers = headers::login_flow_headers(&guest_token, "");
        let response = self
            .http
            .execute(None, "POST", &url, &flow_headers, Some(FLOW_INIT_PAYLOAD.to_string()))
            .await?;
        if response.status != 200 {
            return Err(Error::Login(format!(
                "welcome init HTTP {}: {}",
                response.status,
                truncate_body(&response.body, 200)
            )));
        }
        let flow = parse_flow_response(&response.body)?;

        for subtask in &flow.subtasks {
            if subtask.subtask_id == "LoginJsInstrumentationSubtask" {
                self.submit_flow_step(
                    None,
                    &guest_token,
                    js_instrumentation_payload(&flow.flow_token),
                )
                .await
                .map_err(|e| Error::Login(format!("welcome js instrumentation: {e}")))?;
                break;
            }
        }

        let auth_token = self.harvest_cookie("auth_token").ok_or_else(|| {
            Error::Login("open account: no auth_token in cookies after welcome flow".into())
        })?;
        let ct0 = self.harvest_cookie("ct0").unwrap_or_default();

        let prefix: String = guest_token.chars().take(8).collect();
        let username = format!("guest_{prefix}");
        info!(%username, "open account created");

        let account = Account::new(username, "");
        account.set_credentials(auth_token, ct0);
        Ok(account)
    }

    async fn init_login_flow(
        &self,
        proxy: Option<&str>,
        guest_token: &str,
    ) -> Result<FlowResponse> {
        let url = format!(
            "{}/1.1/onboarding/task.json?flow_name=login",
            self.cfg.api_base
        );
        let flow_headers = headers::login_flow_headers(guest_token, "");
        let response = self
            .http
            .execute(proxy, "POST", &url, &flow_headers, Some(FLOW_INIT_PAYLOAD.to_string()))
            .await?;
        if response.status != 200 {
            return Err(Error::Login(format!(
                "init flow HTTP {}: {}",
                response.status,
                truncate_body(&response.body, 300)
            )));
        }
        parse_flow_response(&response.body)
    }

    async fn submit_flow_step(
        &self,
        proxy: Option<&str>,
        guest_token: &str,
        payload: Value,
    ) -> Result<FlowResponse> {
        let url = format!("{}/1.1/onboarding/task.json", self.cfg.api_base);
        let flow_headers = headers::login_flow_headers(guest_token, "");
        let response = self
            .http
            .execute(proxy, "POST", &url, &flow_headers, Some(payload.to_string()))
            .await?;
        if response.status != 200 {
            return Err(Error::Login(format!(
                "flow step HTTP {}: {}",
                response.status,
                truncate_body(&response.body, 300)
            )));
        }
        parse_flow_response(&response.body)
    }

    /// Reads an authenticated-session cookie harvested into the shared
    /// jar, checking the API host first and the web host second.
    fn harvest_cookie(&self, name: &str) -> Option<String> {
        self.http
            .cookie_value(&self.cfg.api_base, name)
            .or_else(|| self.http.cookie_value("https://x.com", name))
    }
}
