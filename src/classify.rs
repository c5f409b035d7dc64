use std::time::{Duration, SystemTime};

use serde::Deserialize;

/// Action class derived from a response body. The executor's behaviour is
/// defined entirely by this alphabet plus the HTTP status class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    None,
    /// 88: rate limit abuse
    Banned,
    /// 64: account suspended
    Suspended,
    /// 326: account locked (captcha needed)
    Locked,
    /// 353: csrf token mismatch
    Csrf,
    /// 32: could not authenticate
    AuthExpired,
    /// 161: blocked from performing action
    Blocked,
    /// 179, 219: not authorized
    NotAuthorized,
    /// 131: service internal error
    Internal,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
}

/// Inspects a response body for known error codes. The first recognised
/// code wins; malformed JSON or an absent `errors` array classifies as
/// [`ErrorClass::None`].
pub fn classify_body(body: &[u8]) -> ErrorClass {
    let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(body) else {
        return ErrorClass::None;
    };
    for error in &envelope.errors {
        match error.code {
            88 => return ErrorClass::Banned,
            64 => return ErrorClass::Suspended,
            326 => return ErrorClass::Locked,
            353 => return ErrorClass::Csrf,
            32 => return ErrorClass::AuthExpired,
            161 => return ErrorClass::Blocked,
            179 | 219 => return ErrorClass::NotAuthorized,
            131 => return ErrorClass::Internal,
            _ => {}
        }
    }
    ErrorClass::None
}

/// Parses the `x-rate-limit-reset` unix timestamp header. Missing or
/// non-numeric values fall back to 15 minutes from now.
pub fn parse_rate_limit_reset(value: Option<&str>) -> SystemTime {
    if let Some(ts) = value.and_then(|v| v.parse::<u64>().ok()) {
        return SystemTime::UNIX_EPOCH + Duration::from_secs(ts);
    }
    SystemTime::now() + Duration::from_secs(15 * 60)
}

#[derive(Deserialize)]
struct DataProbe {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// True when the JSON body carries a non-null `data` field.
pub fn has_response_data(body: &[u8]) -> bool {
    match serde_json::from_slice::<DataProbe>(body) {
        Ok(probe) => matches!(probe.data, Some(v) if !v.is_null()),
        Err(_) => false,
    }
}

/// Extracts a fresh `ct0` value from `set-cookie` response headers.
pub fn extract_ct0(set_cookies: &[String]) -> Option<String> {
    for cookie in set_cookies {
        for part in cookie.split(';') {
            let part = part.trim();
            if let Some(value) = part.strip_prefix("ct0=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Truncates a response body to at most `n` bytes for diagnostics.
pub fn truncate_body(body: &[u8], n: usize) -> String {
    if body.len() <= n {
        return String::from_utf8_lossy(body).into_owned();
    }
    format!("{}...", String::from_utf8_lossy(&body[..n]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes() {
        let cases: [(&str, ErrorClass); 13] = [
            (r#"{"data":{"user":{}}}"#, ErrorClass::None),
            (r#"{"errors":[]}"#, ErrorClass::None),
            (r#"{"errors":[{"code":88}]}"#, ErrorClass::Banned),
            (r#"{"errors":[{"code":64}]}"#, ErrorClass::Suspended),
            (r#"{"errors":[{"code":326}]}"#, ErrorClass::Locked),
            (r#"{"errors":[{"code":353}]}"#, ErrorClass::Csrf),
            (r#"{"errors":[{"code":32}]}"#, ErrorClass::AuthExpired),
            (r#"{"errors":[{"code":161}]}"#, ErrorClass::Blocked),
            (r#"{"errors":[{"code":179}]}"#, ErrorClass::NotAuthorized),
            (r#"{"errors":[{"code":219}]}"#, ErrorClass::NotAuthorized),
            (r#"{"errors":[{"code":131}]}"#, ErrorClass::Internal),
            (r#"{"errors":[{"code":999}]}"#, ErrorClass::None),
            (r#"{invalid"#, ErrorClass::None),
        ];
        for (body, expected) in cases {
            assert_eq!(classify_body(body.as_bytes()), expected, "body: {body}");
        }
    }

    #[test]
    fn first_recognised_code_wins() {
        let body = r#"{"errors":[{"code":999},{"code":353},{"code":88}]}"#;
        assert_eq!(classify_body(body.as_bytes()), ErrorClass::Csrf);
    }

    #[test]
    fn classifier_is_idempotent() {
        let body = br#"{"errors":[{"code":326}]}"#;
        let first = classify_body(body);
        assert_eq!(first, classify_body(body));
        assert_eq!(first, ErrorClass::Locked);
    }

    #[test]
    fn rate_limit_reset_parses_unix_seconds() {
        let target = SystemTime::now() + Duration::from_secs(600);
        let ts = target
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let parsed = parse_rate_limit_reset(Some(&ts.to_string()));
        let delta = parsed.duration_since(SystemTime::now()).unwrap().as_secs();
        assert!((595..=600).contains(&delta));
    }

    #[test]
    fn rate_limit_reset_falls_back_to_fifteen_minutes() {
        for value in [None, Some(""), Some("not-a-number")] {
            let parsed = parse_rate_limit_reset(value);
            let delta = parsed.duration_since(SystemTime::now()).unwrap().as_secs();
            assert!((14 * 60..=15 * 60).contains(&delta), "value {value:?}: {delta}s");
        }
    }

    #[test]
    fn data_probe_requires_non_null_data() {
        assert!(has_response_data(br#"{"data":{"user":{}}}"#));
        assert!(!has_response_data(br#"{"data":null}"#));
        assert!(!has_response_data(br#"{"errors":[{"code":131}]}"#));
        assert!(!has_response_data(b"not json"));
    }

    #[test]
    fn ct0_extraction_scans_all_cookies() {
        let cookies = vec![
            "guest_id=abc; Path=/; Domain=.x.com".to_string(),
            "ct0=deadbeef; Path=/; Secure".to_string(),
        ];
        assert_eq!(extract_ct0(&cookies).as_deref(), Some("deadbeef"));
        assert_eq!(extract_ct0(&["ct0=; Path=/".to_string()]), None);
        assert_eq!(extract_ct0(&[]), None);
    }

    #[test]
    fn body_truncation_keeps_prefix() {
        assert_eq!(truncate_body(b"short", 200), "short");
        let long = vec![b'x'; 300];
        let truncated = truncate_body(&long, 200);
        assert_eq!(truncated.len(), 203);
        assert!(truncated.ends_with("..."));
    }
}
