//! Resilient X/Twitter GraphQL client.
//!
//! The crate survives adversarial conditions at scale: accounts get locked,
//! banned, CSRF-rotated, and CAPTCHA-challenged; tokens expire; proxies
//! drop; the service rotates its request-signing algorithm. The dispatch
//! pipeline routes every call through an account pool with per-endpoint
//! rate limits and health tracking, signs requests with freshly derived
//! transaction IDs, classifies responses, and reacts with token rotation,
//! re-login, account failover, or a guest-token fallback.

pub mod account;
mod auth;
pub mod backoff;
pub mod captcha;
pub mod classify;
mod client;
pub mod config;
pub mod constants;
pub mod endpoints;
pub mod error;
mod executor;
mod graphql;
mod guest;
mod headers;
mod http;
pub mod models;
pub mod parsers;
pub mod pool;
pub mod ratelimit;
pub mod session;
pub mod txid;

pub use account::{parse_accounts, Account};
pub use captcha::{Capsolver, Solver};
pub use client::Client;
pub use config::{ClientConfig, MetricsHook, RateLimitConfig};
pub use error::{Error, Result};
pub use models::{Cursor, Post, XUser};

#[cfg(test)]
mod tests;
