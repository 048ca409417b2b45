use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use thinkstream::client::{
    ChatClient, GenerationOutcome, HttpChatTransport, MessageError, ModelProfile,
    ReasoningSource,
};
use thinkstream::config::{
    AppConfig, FeaturesConfig, GateConfig, ModelAliasConfig, ModelsConfig, ServerConfig,
    UpstreamConfig, DEFAULT_SYSTEM_PROMPT,
};
use thinkstream::gate::ClientAddr;
use thinkstream::routing::dispatch::dispatch_request;
use thinkstream::state::AppState;
use thinkstream::transport::HttpTransport;
use tokio::task::JoinHandle;

const SECRET: &str = "relay-secret";
const UPSTREAM_KEY: &str = "upstream-key";

const FAST_SSE: &str = concat!(
    "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"reasoning_content\":\"pondering\"}}]}\n\n",
    ": keep-alive\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

// Inline reasoning, no terminal marker.
const DEEP_SSE: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"<thi\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"nk>plan it</think>Done\"}}]}\n\n",
);

#[derive(Clone, Default)]
struct Captured {
    hits: Arc<AtomicUsize>,
    body: Arc<Mutex<Option<Value>>>,
    authorization: Arc<Mutex<Option<String>>>,
}

fn streaming_upstream(captured: Captured) -> Router {
    Router::new().route(
        "/v1/chat/completions",
        post(move |headers: HeaderMap, body: Bytes| {
            let captured = captured.clone();
            async move {
                captured.hits.fetch_add(1, Ordering::SeqCst);
                let body: Value = serde_json::from_slice(&body).expect("upstream json body");
                let sse = if body["model"] == "vendor/deep-r1" {
                    DEEP_SSE
                } else {
                    FAST_SSE
                };
                *captured.body.lock() = Some(body);
                *captured.authorization.lock() = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(ToString::to_string);
                ([("content-type", "text/event-stream")], sse).into_response()
            }
        }),
    )
}

async fn spawn(app: Router) -> (std::net::SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, server)
}

fn build_config(base_url: String, api_key: Option<&str>, secret: Option<&str>) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        upstream: UpstreamConfig {
            base_url,
            api_key: api_key.map(ToString::to_string),
            api_key_env: "THINKSTREAM_TEST_KEY_NEVER_SET".to_string(),
            temperature: Some(0.5),
            max_tokens: None,
        },
        models: ModelsConfig {
            default_alias: "fast".to_string(),
            aliases: vec![
                ModelAliasConfig {
                    alias: "fast".to_string(),
                    upstream_model: "vendor/fast-8b".to_string(),
                    inline_reasoning_tags: false,
                },
                ModelAliasConfig {
                    alias: "deep".to_string(),
                    upstream_model: "vendor/deep-r1".to_string(),
                    inline_reasoning_tags: true,
                },
            ],
        },
        gate: GateConfig {
            shared_secret: secret.map(ToString::to_string),
            limited_alias: Some("deep".to_string()),
            ..GateConfig::default()
        },
        features: FeaturesConfig::default(),
    }
}

fn build_state(config: AppConfig) -> Arc<AppState> {
    let transport = HttpTransport::new(&config.server).expect("transport");
    Arc::new(AppState::new(config, transport).expect("state"))
}

fn chat_request(body: &Value, secret: Option<&str>, ip: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("x-relay-secret", secret);
    }
    let mut request = builder
        .body(Body::from(serde_json::to_vec(body).expect("serialize request")))
        .expect("build request");
    request
        .extensions_mut()
        .insert(ClientAddr(format!("{ip}:40000").parse().expect("socket addr")));
    request
}

async fn send(state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = dispatch_request(Arc::clone(state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    (status, body)
}

#[tokio::test]
async fn test_chat_relays_stream_with_single_done() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(
        format!("http://{addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));

    let request = chat_request(
        &json!({
            "prompt": "and now?",
            "history": [
                {"role": "user", "content": "hi"},
                {"role": "ai", "content": "hello"}
            ],
            "modelAlias": "fast"
        }),
        Some(SECRET),
        "10.0.0.1",
    );
    let response = dispatch_request(Arc::clone(&state), Arc::<str>::from(""), request)
        .await
        .expect("dispatch");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-accel-buffering"], "no");
    assert_eq!(response.headers()["cache-control"], "no-cache, no-transform");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let text = String::from_utf8(body.to_vec()).expect("utf8 body");
    let frames: Vec<&str> = text.split_terminator("\n\n").collect();
    assert_eq!(frames.len(), 4, "unexpected frames: {text:?}");
    assert!(frames[0].starts_with("data: {\"id\":\"c1\""));
    assert_eq!(frames[3], "data: [DONE]");
    assert_eq!(text.matches("[DONE]").count(), 1);

    let upstream_body = captured.body.lock().clone().expect("captured body");
    assert_eq!(upstream_body["model"], "vendor/fast-8b");
    assert_eq!(upstream_body["stream"], true);
    assert_eq!(upstream_body["temperature"], 0.5);
    assert_eq!(
        upstream_body["messages"],
        json!([
            {"role": "system", "content": DEFAULT_SYSTEM_PROMPT},
            {"role": "user", "content": "hi"},
            {"role": "assistant", "content": "hello"},
            {"role": "user", "content": "and now?"}
        ])
    );
    assert_eq!(
        captured.authorization.lock().as_deref(),
        Some("Bearer upstream-key")
    );

    server.abort();
}

#[tokio::test]
async fn test_missing_done_is_appended_and_unknown_alias_falls_back() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(
        format!("http://{addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));

    let (status, body) = send(
        &state,
        chat_request(
            &json!({"prompt": "x", "modelAlias": "deep"}),
            Some(SECRET),
            "10.0.0.2",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).ends_with("data: [DONE]\n\n"));

    let (status, _) = send(
        &state,
        chat_request(
            &json!({"prompt": "x", "modelAlias": "gpt-9000"}),
            Some(SECRET),
            "10.0.0.2",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let upstream_body = captured.body.lock().clone().expect("captured body");
    assert_eq!(upstream_body["model"], "vendor/fast-8b");

    server.abort();
}

#[tokio::test]
async fn test_missing_prompt_rejected_before_upstream() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(
        format!("http://{addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));

    let (status, body) = send(
        &state,
        chat_request(&json!({"history": []}), Some(SECRET), "10.0.0.3"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let payload: Value = serde_json::from_slice(&body).expect("json error");
    assert!(payload["error"].as_str().is_some());

    let (status, _) = send(
        &state,
        chat_request(
            &json!({"prompt": "x", "history": [{"role": "system", "content": "y"}]}),
            Some(SECRET),
            "10.0.0.3",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(captured.hits.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test]
async fn test_missing_credential_is_server_error() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(format!("http://{addr}/v1"), None, Some(SECRET)));

    let (status, body) = send(
        &state,
        chat_request(&json!({"prompt": "x"}), Some(SECRET), "10.0.0.4"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let payload: Value = serde_json::from_slice(&body).expect("json error");
    assert_eq!(payload["error"], "Server configuration error");
    assert_eq!(captured.hits.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test]
async fn test_upstream_error_status_passes_through() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"error": {"message": "slow down"}})),
            )
        }),
    );
    let (addr, server) = spawn(app).await;
    let state = build_state(build_config(
        format!("http://{addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));

    let (status, body) = send(
        &state,
        chat_request(&json!({"prompt": "x"}), Some(SECRET), "10.0.0.5"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let payload: Value = serde_json::from_slice(&body).expect("json error");
    assert!(payload["details"].as_str().unwrap_or_default().contains("slow down"));
    assert!(!String::from_utf8_lossy(&body).contains(UPSTREAM_KEY));

    server.abort();
}

#[tokio::test]
async fn test_secret_gate() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let base_url = format!("http://{addr}/v1");

    let state = build_state(build_config(base_url.clone(), Some(UPSTREAM_KEY), Some(SECRET)));
    let (status, _) = send(&state, chat_request(&json!({"prompt": "x"}), None, "10.0.0.6")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &state,
        chat_request(&json!({"prompt": "x"}), Some("wrong"), "10.0.0.6"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unconfigured = build_state(build_config(base_url, Some(UPSTREAM_KEY), None));
    let (status, body) = send(
        &unconfigured,
        chat_request(&json!({"prompt": "x"}), Some(SECRET), "10.0.0.6"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!String::from_utf8_lossy(&body).contains(SECRET));
    assert_eq!(captured.hits.load(Ordering::SeqCst), 0);

    server.abort();
}

#[tokio::test]
async fn test_gated_alias_rejects_twenty_first_request() {
    let captured = Captured::default();
    let (addr, server) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(
        format!("http://{addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));
    let gated = json!({"prompt": "x", "modelAlias": "deep"});

    for attempt in 0..20 {
        let (status, _) = send(&state, chat_request(&gated, Some(SECRET), "10.0.0.7")).await;
        assert_eq!(status, StatusCode::OK, "attempt {attempt}");
    }

    let response = dispatch_request(
        Arc::clone(&state),
        Arc::<str>::from(""),
        chat_request(&gated, Some(SECRET), "10.0.0.7"),
    )
    .await
    .expect("dispatch");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let payload: Value = serde_json::from_slice(&body).expect("json error");
    let retry_after = payload["retryAfter"].as_u64().expect("numeric retryAfter");
    assert!((1..=60).contains(&retry_after));
    assert_eq!(captured.hits.load(Ordering::SeqCst), 20);

    // Other clients and other aliases are unaffected.
    let (status, _) = send(&state, chat_request(&gated, Some(SECRET), "10.0.0.8")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &state,
        chat_request(&json!({"prompt": "x"}), Some(SECRET), "10.0.0.7"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    server.abort();
}

#[tokio::test]
async fn test_body_limit_and_routes() {
    let state = build_state(build_config(
        "http://127.0.0.1:9/v1".to_string(),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));

    let oversized = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .body(Body::from(vec![b'x'; 3 * 1024 * 1024]))
        .expect("build request");
    let (status, _) = send(&state, oversized).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let wrong_method = Request::builder()
        .method("GET")
        .uri("/api/chat")
        .body(Body::empty())
        .expect("build request");
    let (status, _) = send(&state, wrong_method).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let health = Request::builder()
        .uri("/")
        .body(Body::empty())
        .expect("build request");
    let (status, body) = send(&state, health).await;
    assert_eq!(status, StatusCode::OK);
    let payload: Value = serde_json::from_slice(&body).expect("health json");
    assert_eq!(payload["config"]["default_alias"], "fast");
    assert_eq!(payload["config"]["gate"]["secret_configured"], true);

    let models = Request::builder()
        .uri("/api/models")
        .body(Body::empty())
        .expect("build request");
    let (status, body) = send(&state, models).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!String::from_utf8_lossy(&body).contains("vendor/"));
}

async fn spawn_relay(state: Arc<AppState>) -> (String, JoinHandle<()>) {
    let app = Router::new().fallback(move |request: Request<Body>| {
        let state = Arc::clone(&state);
        async move { dispatch_request(state, Arc::<str>::from(""), request).await }
    });
    let (addr, server) = spawn(app).await;
    (format!("http://{addr}"), server)
}

#[tokio::test]
async fn test_client_round_trip_through_relay() {
    let captured = Captured::default();
    let (upstream_addr, upstream) = spawn(streaming_upstream(captured.clone())).await;
    let state = build_state(build_config(
        format!("http://{upstream_addr}/v1"),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));
    let (relay_url, relay) = spawn_relay(state).await;

    let transport = HttpChatTransport::new(&relay_url, Some(SECRET)).expect("client transport");
    let mut client = ChatClient::new(transport, ModelProfile::new("fast"));
    let outcome = client.send("hi").await.expect("send");
    assert_eq!(outcome, GenerationOutcome::Completed);
    let conversation = client.conversation();
    assert_eq!(conversation.messages().len(), 2);
    assert_eq!(conversation.messages()[1].text(), "Hello");
    let steps = conversation.thinking_steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].text, "pondering");
    assert_eq!(steps[0].source, ReasoningSource::Field);

    client.set_profile(ModelProfile::new("deep").with_inline_reasoning_tags(true));
    let outcome = client.send("plan something").await.expect("send");
    assert_eq!(outcome, GenerationOutcome::Completed);
    let conversation = client.conversation();
    assert_eq!(conversation.messages()[3].text(), "Done");
    assert_eq!(conversation.messages()[3].model_identifier(), Some("deep"));
    assert_eq!(conversation.thinking_steps()[0].text, "plan it");
    assert_eq!(conversation.thinking_steps()[0].source, ReasoningSource::Tagged);

    let upstream_body = captured.body.lock().clone().expect("captured body");
    assert_eq!(upstream_body["messages"].as_array().map(Vec::len), Some(4));

    relay.abort();
    upstream.abort();
}

#[tokio::test]
async fn test_client_surfaces_forbidden_as_message_error() {
    let state = build_state(build_config(
        "http://127.0.0.1:9/v1".to_string(),
        Some(UPSTREAM_KEY),
        Some(SECRET),
    ));
    let (relay_url, relay) = spawn_relay(state).await;

    let transport = HttpChatTransport::new(&relay_url, Some("wrong")).expect("client transport");
    let mut client = ChatClient::new(transport, ModelProfile::new("fast"));
    let outcome = client.send("hi").await.expect("send");
    assert_eq!(outcome, GenerationOutcome::Failed);
    let reply = &client.conversation().messages()[1];
    assert_eq!(reply.error(), Some(&MessageError::Failed("Forbidden".to_string())));
    assert_eq!(client.conversation().banner(), Some("Forbidden"));
    assert!(!client.conversation().is_streaming());

    relay.abort();
}
