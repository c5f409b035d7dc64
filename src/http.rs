use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::cookie::CookieStore;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::{Client, Method};
use tracing::{debug, warn};
use url::Url;

use crate::constants::HEADER_ORDER;
use crate::error::{Error, Result};

/// A fully-buffered HTTP exchange result with lowercased header names.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub set_cookies: Vec<String>,
}

/// Browser-shaped HTTP client: fixed outbound header order, a shared cookie
/// jar for session harvesting, and cached per-proxy clients.
pub struct StealthClient {
    default_client: Client,
    jar: Arc<reqwest::cookie::Jar>,
    proxy_clients: DashMap<String, Client>,
}

impl StealthClient {
    pub fn new(default_proxy: Option<&str>) -> Result<Self> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let default_client = build_client(jar.clone(), default_proxy)?;
        Ok(Self {
            default_client,
            jar,
            proxy_clients: DashMap::new(),
        })
    }

    /// Returns the client bound to `proxy`, building and caching it on
    /// first use. `None` selects the shared default client.
    pub fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let Some(proxy) = proxy else {
            return Ok(self.default_client.clone());
        };
        if let Some(client) = self.proxy_clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(self.jar.clone(), Some(proxy))?;
        self.proxy_clients.insert(proxy.to_string(), client.clone());
        debug!(proxy, "built per-proxy client");
        Ok(client)
    }

    /// Sends a request with headers applied in the canonical order.
    pub async fn execute(
        &self,
        proxy: Option<&str>,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let client = self.client_for(proxy)?;
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::Config(format!("invalid HTTP method: {method}")))?;

        let mut request = client.request(method, url).headers(ordered_headers(headers));
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let mut header_map = HashMap::new();
        let mut set_cookies = Vec::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else { continue };
            if *name == SET_COOKIE {
                set_cookies.push(value.to_string());
            }
            header_map
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }

        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            body,
            headers: header_map,
            set_cookies,
        })
    }

    /// Reads a named cookie from the shared jar for the given URL.
    pub fn cookie_value(&self, url: &str, name: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.jar.cookies(&url)?;
        let raw = header.to_str().ok()?;
        for pair in raw.split(';') {
            let pair = pair.trim();
            if let Some(value) = pair.strip_prefix(name) {
                if let Some(value) = value.strip_prefix('=') {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
        None
    }
}

fn build_client(jar: Arc<reqwest::cookie::Jar>, proxy: Option<&str>) -> Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(20))
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .cookie_provider(jar);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    Ok(builder.build()?)
}

/// Builds a `HeaderMap` inserting known headers in the fixed canonical
/// order, then any remaining headers.
fn ordered_headers(headers: &HashMap<String, String>) -> HeaderMap {
    let mut out = HeaderMap::new();
    for name in HEADER_ORDER {
        if let Some(value) = headers.get(name) {
            insert_header(&mut out, name, value);
        }
    }
    for (name, value) in headers {
        if HEADER_ORDER.contains(&name.as_str()) {
            continue;
        }
        insert_header(&mut out, name, value);
    }
    out
}

fn insert_header(out: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            out.insert(name, value);
        }
        _ => warn!(name, "skipping invalid outbound header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_headers_follow_canonical_order() {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), "ua".to_string());
        headers.insert("authorization".to_string(), "Bearer t".to_string());
        headers.insert("x-guest-token".to_string(), "gt".to_string());
        headers.insert("cookie".to_string(), "a=b".to_string());

        let ordered = ordered_headers(&headers);
        let names: Vec<&str> = ordered.keys().map(|k| k.as_str()).collect();
        let auth = names.iter().position(|n| *n == "authorization").unwrap();
        let cookie = names.iter().position(|n| *n == "cookie").unwrap();
        let ua = names.iter().position(|n| *n == "user-agent").unwrap();
        assert!(auth < cookie && cookie < ua);
        assert!(ordered.contains_key("x-guest-token"));
    }

    #[test]
    fn invalid_header_values_are_skipped() {
        let mut headers = HashMap::new();
        headers.insert("x-ok".to_string(), "fine".to_string());
        headers.insert("x-bad".to_string(), "line\nbreak".to_string());
        let ordered = ordered_headers(&headers);
        assert!(ordered.contains_key("x-ok"));
        assert!(!ordered.contains_key("x-bad"));
    }

    #[test]
    fn per_proxy_clients_are_cached() {
        let client = StealthClient::new(None).unwrap();
        assert!(client.client_for(None).is_ok());
        client.client_for(Some("socks5://127.0.0.1:9050")).unwrap();
        assert_eq!(client.proxy_clients.len(), 1);
        client.client_for(Some("socks5://127.0.0.1:9050")).unwrap();
        assert_eq!(client.proxy_clients.len(), 1);
    }
}
