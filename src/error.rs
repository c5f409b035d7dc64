use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("login error: {0}")]
    Login(String),

    #[error("captcha error: {0}")]
    Captcha(String),

    #[error("account pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transaction id error: {0}")]
    Signing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
