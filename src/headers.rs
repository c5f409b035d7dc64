use std::collections::HashMap;

use crate::constants::{BrowserProfile, BEARER_TOKEN, DEFAULT_USER_AGENT};

/// Base headers for authenticated GraphQL requests.
pub fn api_headers(
    auth_token: &str,
    ct0: &str,
    user_agent: &str,
    profile: Option<&BrowserProfile>,
) -> HashMap<String, String> {
    let user_agent = if user_agent.is_empty() {
        DEFAULT_USER_AGENT
    } else {
        user_agent
    };
    let mut h = HashMap::from([
        ("authorization".into(), format!("Bearer {BEARER_TOKEN}")),
        ("x-csrf-token".into(), ct0.to_string()),
        ("x-twitter-active-user".into(), "yes".into()),
        ("x-twitter-auth-type".into(), "OAuth2Session".into()),
        ("x-twitter-client-language".into(), "en".into()),
        ("content-type".into(), "application/json".into()),
        (
            "cookie".into(),
            format!("auth_token={auth_token}; ct0={ct0}"),
        ),
        ("user-agent".into(), user_agent.to_string()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "en-US,en;q=0.9".into()),
        ("accept-encoding".into(), "gzip, deflate, br".into()),
        ("referer".into(), "https://x.com/".into()),
        ("origin".into(), "https://x.com".into()),
        ("sec-fetch-dest".into(), "empty".into()),
        ("sec-fetch-mode".into(), "cors".into()),
        ("sec-fetch-site".into(), "same-origin".into()),
    ]);
    if let Some(profile) = profile {
        apply_client_hints(&mut h, profile);
    }
    h
}

/// Headers for unauthenticated (guest token) requests.
pub fn guest_headers(guest_token: &str) -> HashMap<String, String> {
    HashMap::from([
        ("authorization".into(), format!("Bearer {BEARER_TOKEN}")),
        ("x-guest-token".into(), guest_token.to_string()),
        ("x-twitter-active-user".into(), "yes".into()),
        ("x-twitter-client-language".into(), "en".into()),
        ("content-type".into(), "application/json".into()),
        ("user-agent".into(), DEFAULT_USER_AGENT.into()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "en-US,en;q=0.9".into()),
        ("accept-encoding".into(), "gzip, deflate, br".into()),
        ("referer".into(), "https://x.com/".into()),
        ("origin".into(), "https://x.com".into()),
    ])
}

/// Headers for the onboarding flow API.
pub fn login_flow_headers(guest_token: &str, ct0: &str) -> HashMap<String, String> {
    let mut h = HashMap::from([
        ("authorization".into(), format!("Bearer {BEARER_TOKEN}")),
        ("content-type".into(), "application/json".into()),
        ("x-guest-token".into(), guest_token.to_string()),
        ("x-twitter-active-user".into(), "yes".into()),
        ("x-twitter-client-language".into(), "en".into()),
        ("user-agent".into(), DEFAULT_USER_AGENT.into()),
        ("accept".into(), "*/*".into()),
        ("accept-language".into(), "en-US,en;q=0.9".into()),
        ("referer".into(), "https://x.com/".into()),
        ("origin".into(), "https://x.com".into()),
    ]);
    if !ct0.is_empty() {
        h.insert("x-csrf-token".into(), ct0.to_string());
    }
    h
}

fn apply_client_hints(headers: &mut HashMap<String, String>, profile: &BrowserProfile) {
    headers.insert("sec-ch-ua".into(), profile.sec_ch_ua.to_string());
    headers.insert("sec-ch-ua-mobile".into(), "?0".into());
    headers.insert(
        "sec-ch-ua-platform".into(),
        profile.sec_ch_ua_platform.to_string(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::BROWSER_PROFILES;

    #[test]
    fn api_headers_carry_session_cookie_pair() {
        let h = api_headers("tok", "csrf", "ua-string", Some(&BROWSER_PROFILES[0]));
        assert_eq!(h["cookie"], "auth_token=tok; ct0=csrf");
        assert_eq!(h["x-csrf-token"], "csrf");
        assert_eq!(h["user-agent"], "ua-string");
        assert!(h["authorization"].starts_with("Bearer AAAA"));
        assert!(h.contains_key("sec-ch-ua"));
    }

    #[test]
    fn empty_user_agent_falls_back_to_default() {
        let h = api_headers("tok", "csrf", "", None);
        assert_eq!(h["user-agent"], DEFAULT_USER_AGENT);
    }

    #[test]
    fn guest_headers_use_guest_token_not_cookie() {
        let h = guest_headers("gt-abc");
        assert_eq!(h["x-guest-token"], "gt-abc");
        assert!(!h.contains_key("cookie"));
        assert!(!h.contains_key("x-csrf-token"));
    }

    #[test]
    fn login_flow_headers_include_csrf_only_when_present() {
        assert!(!login_flow_headers("gt", "").contains_key("x-csrf-token"));
        assert_eq!(login_flow_headers("gt", "c")["x-csrf-token"], "c");
    }
}
