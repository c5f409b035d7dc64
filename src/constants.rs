//! Process-wide immutable constants: bearer tokens, the ordered header list,
//! and the signing keyword. Callers cannot mutate any of these.

/// Known X web-app bearer tokens. The first entry is the active one.
pub const BEARER_TOKENS: [&str; 2] = [
    "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA",
    "AAAAAAAAAAAAAAAAAAAAAFQODgEAAAAAVHTp76lzh3rFzcHbmHVvQxYYpTw%3DckAlMINMjmCwxUcaXbAN4XqJVdgMJaHqNOFgPMK0zN1qLqLQCF",
];

/// Active bearer token identifying the web app to the API.
pub const BEARER_TOKEN: &str = BEARER_TOKENS[0];

/// Fallback User-Agent when no per-account profile is assigned.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// X's well-known FunCaptcha public key for login challenges.
pub const ARKOSE_PUBLIC_KEY: &str = "0152B4EB-D2DC-460A-89A1-629838B529C9";

pub const GRAPHQL_BASE: &str = "https://x.com/i/api/graphql";
pub const API_BASE: &str = "https://api.twitter.com";
pub const HOME_URL: &str = "https://x.com/";
pub const ONDEMAND_BASE: &str = "https://abs.twimg.com/responsive-web/client-web";

/// Keyword mixed into the per-request signing hash by X's client-side code.
pub const SIGNING_KEYWORD: &str = "obfiowerehiring";

/// Outbound header order, fixed for TLS fingerprint stability.
pub const HEADER_ORDER: [&str; 17] = [
    "authorization",
    "content-type",
    "x-csrf-token",
    "x-twitter-active-user",
    "x-twitter-client-language",
    "x-client-transaction-id",
    "sec-ch-ua",
    "sec-ch-ua-mobile",
    "sec-ch-ua-platform",
    "sec-fetch-dest",
    "sec-fetch-mode",
    "sec-fetch-site",
    "cookie",
    "user-agent",
    "accept",
    "accept-language",
    "accept-encoding",
];

/// A browser identity an account presents to the service.
#[derive(Debug, Clone, Copy)]
pub struct BrowserProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_platform: &'static str,
}

/// Built-in browser profiles, assigned to accounts round-robin by index.
pub const BROWSER_PROFILES: [BrowserProfile; 3] = [
    BrowserProfile {
        name: "chrome-131-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
        sec_ch_ua_platform: "\"Windows\"",
    },
    BrowserProfile {
        name: "chrome-131-macos",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
        sec_ch_ua_platform: "\"macOS\"",
    },
    BrowserProfile {
        name: "chrome-130-windows",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Chromium\";v=\"130\", \"Google Chrome\";v=\"130\", \"Not?A_Brand\";v=\"99\"",
        sec_ch_ua_platform: "\"Windows\"",
    },
];
