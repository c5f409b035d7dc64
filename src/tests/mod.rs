//! End-to-end dispatch scenarios against a mock upstream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{get, post};
use axum::Router;

use crate::account::Account;
use crate::client::Client;
use crate::config::ClientConfig;
use crate::session;

/// Home HTML with key bytes [1,2,3,4,5,0,7,8]: frame selector and row both
/// land on 0, and the frame-time product rounds to 0.
const MOCK_HOME_HTML: &str = concat!(
    r#"<html><head><meta name="twitter-site-verification" content="AQIDBAUABwg="/></head>"#,
    r#"<body><svg id="loading-x-anim-0">"#,
    r##"<path d="M0 0C255 0 0 0 0 255 128 64 64 64 64" fill="#1d9bf008"/>"##,
    r#"</svg><script>{"ondemand.s":"cafe"}</script></body></html>"#,
);
const MOCK_ONDEMAND_JS: &str = "f((a[5], 16)); g((a[1], 16));";

const USER_OK_BODY: &str = r#"{
    "data": {"user": {"result": {
        "__typename": "User",
        "rest_id": "12345",
        "legacy": {
            "name": "Test User",
            "screen_name": "testuser",
            "followers_count": 100,
            "friends_count": 50,
            "statuses_count": 200,
            "description": "hello"
        }
    }}}
}"#;

#[derive(Clone, Default)]
struct MockState {
    graphql_calls: Arc<AtomicUsize>,
    activate_calls: Arc<AtomicUsize>,
    login_inits: Arc<AtomicUsize>,
    seen_csrf: Arc<Mutex<Vec<String>>>,
    seen_cookies: Arc<Mutex<Vec<String>>>,
    seen_guest_tokens: Arc<Mutex<Vec<String>>>,
    seen_transaction_ids: Arc<Mutex<Vec<String>>>,
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn signing_routes(router: Router<MockState>) -> Router<MockState> {
    router
        .route("/home", get(|| async { MOCK_HOME_HTML }))
        .route("/ondemand.s.cafea.js", get(|| async { MOCK_ONDEMAND_JS }))
}

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock upstream");
    });
    (format!("http://{addr}"), handle)
}

fn test_config(base: &str, session_dir: &std::path::Path, accounts: Vec<Account>) -> ClientConfig {
    ClientConfig {
        accounts,
        session_dir: Some(session_dir.to_path_buf()),
        api_base: base.to_string(),
        graphql_base: format!("{base}/graphql"),
        home_url: format!("{base}/home"),
        ondemand_base: base.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn successful_read_uses_one_request_and_records_health() {
    let state = MockState::default();
    let app = signing_routes(Router::new())
        .route(
            "/graphql/{op_id}/{op_name}",
            get(|State(s): State<MockState>, headers: HeaderMap| async move {
                s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                s.seen_transaction_ids
                    .lock()
                    .unwrap()
                    .push(header(&headers, "x-client-transaction-id"));
                USER_OK_BODY
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let metrics: Arc<Mutex<Vec<(String, bool, bool)>>> = Arc::default();
    let metrics_sink = metrics.clone();
    let mut cfg = test_config(
        &base,
        dir.path(),
        vec![Account::new("acc-a", "pw").with_session("tok-a", "csrf-a")],
    );
    cfg.metrics_hook = Some(Arc::new(move |endpoint, success, rate_limited| {
        metrics_sink
            .lock()
            .unwrap()
            .push((endpoint.to_string(), success, rate_limited));
    }));

    let client = Client::new(cfg).await.unwrap();
    let user = client.user_by_screen_name("testuser").await.unwrap();
    server.abort();

    assert_eq!(user.id, "12345");
    assert_eq!(user.handle, "testuser");
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 1);

    let account = client.pool().accounts()[0].clone();
    let (total, failed, _) = account.stats();
    assert_eq!((total, failed), (1, 0));

    // the request was signed
    let ids = state.seen_transaction_ids.lock().unwrap();
    assert_eq!(ids.len(), 1);
    assert!(!ids[0].is_empty());

    let recorded = metrics.lock().unwrap().clone();
    assert_eq!(recorded, vec![("UserByScreenName".to_string(), true, false)]);
}

#[tokio::test]
async fn csrf_error_rotates_ct0_and_retries_same_account() {
    let state = MockState::default();
    let app = signing_routes(Router::new())
        .route(
            "/graphql/{op_id}/{op_name}",
            get(|State(s): State<MockState>, headers: HeaderMap| async move {
                let call = s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                s.seen_csrf
                    .lock()
                    .unwrap()
                    .push(header(&headers, "x-csrf-token"));
                if call == 0 {
                    r#"{"errors":[{"code":353}]}"#
                } else {
                    USER_OK_BODY
                }
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(
        &base,
        dir.path(),
        vec![Account::new("acc-a", "pw").with_session("tok-a", "csrf-initial")],
    );

    let client = Client::new(cfg).await.unwrap();
    let user = client.user_by_screen_name("testuser").await.unwrap();
    server.abort();

    assert_eq!(user.id, "12345");
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 2);

    let seen = state.seen_csrf.lock().unwrap();
    assert_eq!(seen[0], "csrf-initial");
    assert_ne!(seen[1], "csrf-initial");
    assert_eq!(seen[1].len(), 64);

    // the rotated token was persisted and matches the live account
    let account = client.pool().accounts()[0].clone();
    let (_, live_ct0, _) = account.credentials();
    assert_eq!(live_ct0, seen[1]);
    let (_, saved_ct0) = session::load_session(Some(dir.path()), "acc-a", Duration::from_secs(3600))
        .unwrap()
        .unwrap();
    assert_eq!(saved_ct0, live_ct0);
}

#[tokio::test]
async fn auth_expiry_triggers_relogin_then_succeeds() {
    let state = MockState::default();
    let app = signing_routes(Router::new())
        .route(
            "/graphql/{op_id}/{op_name}",
            get(|State(s): State<MockState>| async move {
                let call = s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    (
                        StatusCode::UNAUTHORIZED,
                        r#"{"errors":[{"code":32}]}"#.to_string(),
                    )
                } else {
                    (StatusCode::OK, USER_OK_BODY.to_string())
                }
            }),
        )
        .route(
            "/1.1/guest/activate.json",
            post(|State(s): State<MockState>| async move {
                s.activate_calls.fetch_add(1, Ordering::SeqCst);
                (
                    StatusCode::OK,
                    [("set-cookie", "auth_token=tok-fresh; Path=/")],
                    r#"{"guest_token":"gt-login"}"#.to_string(),
                )
            }),
        )
        .route(
            "/1.1/onboarding/task.json",
            post(|State(s): State<MockState>, uri: Uri| async move {
                if uri.query().unwrap_or_default().contains("flow_name=login") {
                    s.login_inits.fetch_add(1, Ordering::SeqCst);
                }
                r#"{"flow_token":"ft-1","subtasks":[{"subtask_id":"LoginSuccessSubtask"}]}"#
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(
        &base,
        dir.path(),
        vec![Account::new("acc-a", "pw").with_session("tok-stale", "csrf-a")],
    );

    let client = Client::new(cfg).await.unwrap();
    let user = client.user_by_screen_name("testuser").await.unwrap();
    server.abort();

    assert_eq!(user.id, "12345");
    assert_eq!(state.login_inits.load(Ordering::SeqCst), 1);
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 2);

    let account = client.pool().accounts()[0].clone();
    let (auth_token, ct0, _) = account.credentials();
    assert_eq!(auth_token, "tok-fresh");
    assert_eq!(ct0.len(), 64); // no ct0 cookie from the mock, so one was generated

    // health reset by the relogin, then one success recorded
    let (total, failed, _) = account.stats();
    assert_eq!((total, failed), (1, 0));
}

#[tokio::test]
async fn rate_limited_account_fails_over_to_second_account() {
    let reset_at = SystemTime::now() + Duration::from_secs(600);
    let reset_unix = reset_at
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
        .to_string();

    let state = MockState::default();
    let reset_header = reset_unix.clone();
    let app = signing_routes(Router::new())
        .route(
            "/graphql/{op_id}/{op_name}",
            get(move |State(s): State<MockState>, headers: HeaderMap| {
                let reset_header = reset_header.clone();
                async move {
                    s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                    let cookie = header(&headers, "cookie");
                    s.seen_cookies.lock().unwrap().push(cookie.clone());
                    if cookie.contains("auth_token=tok-a") {
                        (
                            StatusCode::TOO_MANY_REQUESTS,
                            [("x-rate-limit-reset", reset_header)],
                            String::new(),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            [("x-rate-limit-reset", String::new())],
                            USER_OK_BODY.to_string(),
                        )
                    }
                }
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(
        &base,
        dir.path(),
        vec![
            Account::new("acc-a", "pw").with_session("tok-a", "csrf-a"),
            Account::new("acc-b", "pw").with_session("tok-b", "csrf-b"),
        ],
    );

    let client = Client::new(cfg).await.unwrap();
    let user = client.user_by_screen_name("testuser").await.unwrap();
    server.abort();

    assert_eq!(user.id, "12345");
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 2);

    let seen = state.seen_cookies.lock().unwrap();
    assert!(seen[0].contains("auth_token=tok-a"));
    assert!(seen[1].contains("auth_token=tok-b"));

    let account_a = client.pool().accounts()[0].clone();
    assert!(account_a.is_endpoint_rate_limited("UserByScreenName"));
    let available = account_a
        .endpoint_available_at("UserByScreenName")
        .duration_since(SystemTime::now())
        .unwrap_or_default()
        .as_secs();
    assert!((590..=600).contains(&available), "available in {available}s");
}

#[tokio::test]
async fn empty_pool_falls_back_to_guest_token() {
    let state = MockState::default();
    let app = signing_routes(Router::new())
        .route(
            "/1.1/guest/activate.json",
            post(|State(s): State<MockState>| async move {
                s.activate_calls.fetch_add(1, Ordering::SeqCst);
                r#"{"guest_token":"gt-abc"}"#
            }),
        )
        .route(
            "/graphql/{op_id}/{op_name}",
            get(|State(s): State<MockState>, headers: HeaderMap| async move {
                s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                s.seen_guest_tokens
                    .lock()
                    .unwrap()
                    .push(header(&headers, "x-guest-token"));
                USER_OK_BODY
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&base, dir.path(), Vec::new());

    let client = Client::new(cfg).await.unwrap();
    let user = client.user_by_screen_name("testuser").await.unwrap();
    server.abort();

    assert_eq!(user.id, "12345");
    assert_eq!(state.activate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *state.seen_guest_tokens.lock().unwrap(),
        vec!["gt-abc".to_string()]
    );
    assert!(client.pool().is_empty());
}

#[tokio::test]
async fn write_path_stays_on_the_caller_supplied_account() {
    let state = MockState::default();
    let app = signing_routes(Router::new())
        .route(
            "/graphql/{op_id}/{op_name}",
            post(|State(s): State<MockState>, headers: HeaderMap| async move {
                s.graphql_calls.fetch_add(1, Ordering::SeqCst);
                s.seen_cookies
                    .lock()
                    .unwrap()
                    .push(header(&headers, "cookie"));
                r#"{"data":{"create_tweet":{"tweet_results":{"result":{"rest_id":"777"}}}}}"#
            }),
        )
        .with_state(state.clone());
    let (base, server) = serve(app).await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(
        &base,
        dir.path(),
        vec![
            Account::new("acc-a", "pw").with_session("tok-a", "csrf-a"),
            Account::new("acc-b", "pw").with_session("tok-b", "csrf-b"),
        ],
    );

    let client = Client::new(cfg).await.unwrap();
    let writer = client.pool().accounts()[1].clone();
    let post_id = client.create_post(&writer, "hello world").await.unwrap();
    server.abort();

    assert_eq!(post_id, "777");
    assert_eq!(state.graphql_calls.load(Ordering::SeqCst), 1);
    // the pool was not consulted: only acc-b's cookie appears
    let seen = state.seen_cookies.lock().unwrap();
    assert!(seen[0].contains("auth_token=tok-b"));
    let (total_a, _, _) = client.pool().accounts()[0].stats();
    assert_eq!(total_a, 0);
}
