use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Abstracts CAPTCHA solving services (Capsolver, 2captcha, ...).
pub trait Solver: Send + Sync {
    /// Submits a challenge and resolves to the solution token. `site_key`
    /// is the Arkose/FunCaptcha public key, `page_url` the page that
    /// triggered the challenge.
    fn solve<'a>(&'a self, site_key: &'a str, page_url: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Account balance in USD.
    fn balance(&self) -> BoxFuture<'_, Result<f64>>;
}

const CAPSOLVER_API: &str = "https://api.capsolver.com";
const POLL_INTERVAL: Duration = Duration::from_secs(3);
const SOLVE_TIMEOUT: Duration = Duration::from_secs(120);
/// Warn when the balance drops below $5.
const BALANCE_WARN_LEVEL: f64 = 5.0;

/// [`Solver`] backed by the Capsolver API.
pub struct Capsolver {
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateTaskResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    task_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TaskResultResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    solution: Solution,
}

#[derive(Deserialize, Default)]
struct Solution {
    #[serde(default)]
    token: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    #[serde(default)]
    error_id: i64,
    #[serde(default)]
    balance: f64,
}

impl Capsolver {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_api_base(api_key, CAPSOLVER_API)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn post<T: for<'de> Deserialize<'de>>(&self, path: &str, payload: Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status.as_u16() != 200 {
            return Err(Error::Captcha(format!(
                "capsolver HTTP {}: {}",
                status,
                crate::classify::truncate_body(&body, 200)
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn solve_funcaptcha(&self, site_key: &str, page_url: &str) -> Result<String> {
        if let Ok(balance) = self.check_balance().await {
            if balance < BALANCE_WARN_LEVEL {
                warn!(balance, "capsolver balance low");
            }
        }

        let create: CreateTaskResponse = self
            .post(
                "/createTask",
                json!({
                    "clientKey": self.api_key,
                    "task": {
                        "type": "FunCaptchaTaskProxyLess",
                        "websiteURL": page_url,
                        "websitePublicKey": site_key,
                    },
                }),
            )
            .await?;
        if create.error_id != 0 {
            return Err(Error::Captcha(format!(
                "capsolver createTask error {}: {}",
                create.error_code, create.error_description
            )));
        }
        if create.task_id.is_empty() {
            return Err(Error::Captcha("capsolver: empty taskId in response".into()));
        }
        info!(task_id = %create.task_id, "CAPTCHA task created");

        let deadline = tokio::time::Instant::now() + SOLVE_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Captcha(format!(
                    "capsolver: solve timeout after {}s",
                    SOLVE_TIMEOUT.as_secs()
                )));
            }

            let result: TaskResultResponse = self
                .post(
                    "/getTaskResult",
                    json!({ "clientKey": self.api_key, "taskId": create.task_id }),
                )
                .await?;
            if result.error_id != 0 {
                return Err(Error::Captcha(format!(
                    "capsolver result error {}: {}",
                    result.error_code, result.error_description
                )));
            }

            match result.status.as_str() {
                "ready" => {
                    if result.solution.token.is_empty() {
                        return Err(Error::Captcha("capsolver: ready but empty token".into()));
                    }
                    info!(task_id = %create.task_id, "CAPTCHA solved");
                    return Ok(result.solution.token);
                }
                "processing" => tokio::time::sleep(POLL_INTERVAL).await,
                other => {
                    return Err(Error::Captcha(format!(
                        "capsolver: unexpected status {other:?}"
                    )))
                }
            }
        }
    }

    async fn check_balance(&self) -> Result<f64> {
        let response: BalanceResponse = self
            .post("/getBalance", json!({ "clientKey": self.api_key }))
            .await?;
        if response.error_id != 0 {
            return Err(Error::Captcha(format!(
                "capsolver balance error {}",
                response.error_id
            )));
        }
        Ok(response.balance)
    }
}

impl Solver for Capsolver {
    fn solve<'a>(&'a self, site_key: &'a str, page_url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.solve_funcaptcha(site_key, page_url))
    }

    fn balance(&self) -> BoxFuture<'_, Result<f64>> {
        Box::pin(self.check_balance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_shapes_deserialize_with_defaults() {
        let create: CreateTaskResponse =
            serde_json::from_str(r#"{"errorId":0,"taskId":"t-1"}"#).unwrap();
        assert_eq!(create.task_id, "t-1");
        assert_eq!(create.error_id, 0);

        let result: TaskResultResponse = serde_json::from_str(
            r#"{"errorId":0,"status":"ready","solution":{"token":"solved"}}"#,
        )
        .unwrap();
        assert_eq!(result.status, "ready");
        assert_eq!(result.solution.token, "solved");

        let empty: TaskResultResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.status.is_empty());
        assert!(empty.solution.token.is_empty());
    }
}
