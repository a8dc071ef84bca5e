use std::{collections::HashMap, time::Duration};

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use insight_chat::{
    config::{Config, ProviderDetail},
    create_app, AppState, PricingTable,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn app_with(config: Config) -> Router {
    create_app(AppState::new(config, PricingTable::builtin()).unwrap())
}

fn app() -> Router {
    app_with(Config::default())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_chat_without_ai_model_is_rejected() {
    let response = app()
        .oneshot(post_json("/api/chat", json!({"messages": [{"role": "user", "content": "hi"}]})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await, json!({"error": "AI model not provided"}));
}

#[tokio::test]
async fn test_chat_with_unknown_provider_is_rejected() {
    let response = app()
        .oneshot(post_json(
            "/api/chat",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "aiModel": {"provider": "x", "key": "sk-secret-value"}
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_bytes(response).await;
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"error": "Unsupported provider: x"}));
    assert!(!String::from_utf8_lossy(&body).contains("sk-secret-value"));
}

#[tokio::test]
async fn test_chat_with_empty_messages_is_rejected() {
    let response = app()
        .oneshot(post_json(
            "/api/chat",
            json!({"messages": [], "aiModel": {"provider": "openai", "key": "k"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = Config::default();
    config.server.max_request_size_bytes = 64;
    let text = "x".repeat(1024);

    let response = app_with(config)
        .oneshot(post_json("/api/resolve", json!({ "text": text })))
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_resolve_endpoint_classifies_reply() {
    let text = r#"{"content":"Here","chart":{"type":"bar-chart","data":[{"label":"A","value":3}]}}"#;
    let response = app()
        .oneshot(post_json("/api/resolve", json!({ "text": text })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "chart");
    assert_eq!(body["content"], "Here");
    assert_eq!(body["chart"]["data"][0]["value"], 3.0);

    let response = app()
        .oneshot(post_json("/api/resolve", json!({ "text": "just words" })))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"kind": "plainText", "content": "just words"}));
}

#[tokio::test]
async fn test_export_returns_pdf_download() {
    let card = json!({
        "analyticCardWithFileApi": {
            "table": {"title": "Q1 Sales", "headers": ["Region", "Total"], "rows": [["North", "120"]]},
            "story": {"title": "Notes", "lines": ["North grew."]}
        }
    });

    let response = app().oneshot(post_json("/api/export", card)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"Q1_Sales.pdf\"");

    let bytes = body_bytes(response).await;
    assert!(bytes.starts_with(b"%PDF-1.4"));
    assert_eq!(headers[header::CONTENT_LENGTH], bytes.len().to_string().as_str());
}

#[tokio::test]
async fn test_export_rejects_non_card_body() {
    let response = app().oneshot(post_json("/api/export", json!([1, 2, 3]))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Body is not an exportable analytic card"})
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "insight-chat");
    assert_eq!(body["providers"].as_array().unwrap().len(), 6);
    assert_eq!(body["active_generations"], 0);
    assert!(body["pricing_entries"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_metrics_endpoint_starts_empty() {
    let response = app().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["generations_started"], 0);
    assert_eq!(body["providers"], json!({}));
}

#[tokio::test]
async fn test_unknown_chat_has_no_history() {
    let app = app();

    let response = app.clone().oneshot(get("/api/chats/nope/messages")).await.unwrap();
    assert_eq!(body_json(response).await, json!({"chatId": "nope", "messages": []}));

    let response = app.oneshot(get("/api/chats/nope/usage")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["usage"]["total"], 0);
    assert_eq!(body["usage"]["count"], 0);
}

#[tokio::test]
async fn test_unknown_route_is_json_not_found() {
    let response = app().oneshot(get("/api/nothing-here")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({"error": "No route for GET /api/nothing-here"})
    );
}

#[tokio::test]
async fn test_request_id_is_echoed_or_generated() {
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = app().oneshot(get("/health")).await.unwrap();
    assert!(!response.headers()["x-request-id"].is_empty());
}

fn config_for_mock(provider: &str, server: &MockServer) -> Config {
    let mut providers = HashMap::new();
    providers.insert(
        provider.to_string(),
        ProviderDetail {
            api_base: Some(server.uri()),
            ..ProviderDetail::default()
        },
    );
    Config {
        providers,
        ..Config::default()
    }
}

fn chat_body(chat_id: &str) -> Value {
    json!({
        "messages": [
            {"role": "user", "content": "Sales by region?"},
            {"role": "assistant", "content": "Which quarter?"},
            {"role": "user", "content": "Q1"}
        ],
        "language": "English",
        "chatId": chat_id,
        "aiModel": {"provider": "openai", "key": "sk-test"}
    })
}

/// Poll the history endpoint until `count` messages are stored.
async fn wait_for_messages(app: &Router, chat_id: &str, count: usize) -> Value {
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/chats/{}/messages", chat_id)))
            .await
            .unwrap();
        let body = body_json(response).await;
        if body["messages"].as_array().map(Vec::len) == Some(count) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("chat {} never reached {} messages", chat_id, count);
}

#[tokio::test]
async fn test_chat_streams_fragments_then_usage_then_done() {
    let server = MockServer::start().await;
    let upstream = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"North\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" leads\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":1000,\"completion_tokens\":1000,\"total_tokens\":2000}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"))
        .mount(&server)
        .await;

    let app = app_with(config_for_mock("openai", &server));
    let response = app.clone().oneshot(post_json("/api/chat", chat_body("c1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ai-provider"], "openai");
    assert_eq!(response.headers()["x-ai-model"], "gpt-4o-mini");
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    let north = body.find("data: North").unwrap();
    let leads = body.find(" leads").unwrap();
    let usage = body.find("event: usage").unwrap();
    let done = body.find("event: done").unwrap();
    assert!(north < leads && leads < usage && usage < done);
    assert!(body.contains("\"promptTokens\":1000"));
    assert!(body.contains("\"cost\":0.00075"));
    assert!(body.contains("data: [DONE]"));

    let history = wait_for_messages(&app, "c1", 2).await;
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "Q1");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "North leads");
    assert_eq!(messages[1]["usage"]["totalTokens"], 2000);
    assert_eq!(messages[1]["model"], "gpt-4o-mini");

    let response = app.clone().oneshot(get("/api/chats/c1/usage")).await.unwrap();
    let usage = body_json(response).await;
    assert_eq!(usage["usage"]["total"], 2000);
    assert_eq!(usage["usage"]["count"], 1);

    let requests = server.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let prompt = sent["messages"][0]["content"].as_str().unwrap();
    assert!(prompt.contains("Sales by region?"));
    assert!(prompt.contains("Q1"));
    assert!(prompt.contains("English"));
}

#[tokio::test]
async fn test_chat_without_usage_ends_with_done_only() {
    let server = MockServer::start().await;
    let upstream = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"))
        .mount(&server)
        .await;

    let response = app_with(config_for_mock("mistral", &server))
        .oneshot(post_json(
            "/api/chat",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "aiModel": {"provider": "mistral", "key": "k"}
            }),
        ))
        .await
        .unwrap();

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(body.contains("data: ok"));
    assert!(!body.contains("event: usage"));
    assert!(body.contains("event: done"));
}

#[tokio::test]
async fn test_chat_mid_stream_failure_emits_error_event() {
    let server = MockServer::start().await;
    let upstream = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
        "data: {\"error\":{\"message\":\"overloaded\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream, "text/event-stream"))
        .mount(&server)
        .await;

    let app = app_with(config_for_mock("openai", &server));
    let response = app.clone().oneshot(post_json("/api/chat", chat_body("c2"))).await.unwrap();
    let body = String::from_utf8(body_bytes(response).await).unwrap();

    assert!(body.contains("data: partial"));
    assert!(body.contains("event: error"));
    assert!(body.contains("overloaded"));
    assert!(!body.contains("event: usage"));
    assert!(body.contains("event: done"));

    // Only the user turn is kept when generation fails.
    let history = wait_for_messages(&app, "c2", 1).await;
    assert_eq!(history["messages"][0]["role"], "user");
}

#[tokio::test]
async fn test_chat_upstream_rejection_maps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let response = app_with(config_for_mock("openai", &server))
        .oneshot(post_json("/api/chat", chat_body("c3")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid key"));
}
