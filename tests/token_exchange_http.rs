mod common;

use common::quiet_logger;
use digikey_mcp::config::{Environment, Settings};
use digikey_mcp::errors::AuthError;
use digikey_mcp::services::credentials::{CredentialManager, TokenExchanger};
use digikey_mcp::services::token_client::HttpTokenClient;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings_for(server: &MockServer) -> Settings {
    let mut settings = Settings::new("client-abc-123456", "s3cr3t-value", Environment::Sandbox);
    settings.api_base = server.uri();
    settings.token_timeout = Duration::from_secs(2);
    settings
}

#[tokio::test]
async fn exchange_posts_client_credentials_form() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=client-abc-123456"))
        .and(body_string_contains("client_secret=s3cr3t-value"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc.def.ghi",
            "expires_in": 599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(quiet_logger(), &settings_for(&server)).expect("client");
    let grant = client.exchange().await.expect("grant");
    assert_eq!(grant.access_token, "abc.def.ghi");
    assert_eq!(grant.expires_in, Duration::from_secs(599));
}

#[tokio::test]
async fn rejected_identity_is_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Client authentication failed"
        })))
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(quiet_logger(), &settings_for(&server)).expect("client");
    let err = client.exchange().await.unwrap_err();
    assert_eq!(
        err,
        AuthError::ExchangeDenied {
            status: 401,
            message: "invalid_client: Client authentication failed".to_string(),
        }
    );
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(quiet_logger(), &settings_for(&server)).expect("client");
    let err = client.exchange().await.unwrap_err();
    assert!(matches!(err, AuthError::ExchangeFailed(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_lifetime_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "abc"})))
        .mount(&server)
        .await;

    let client = HttpTokenClient::new(quiet_logger(), &settings_for(&server)).expect("client");
    let err = client.exchange().await.unwrap_err();
    assert!(matches!(err, AuthError::ExchangeMalformed(_)));
}

#[tokio::test]
async fn slow_token_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "abc", "expires_in": 599}))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;

    let mut settings = settings_for(&server);
    settings.token_timeout = Duration::from_millis(200);
    let client = HttpTokenClient::new(quiet_logger(), &settings).expect("client");
    let err = client.exchange().await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_hit_the_token_endpoint_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "shared-token", "expires_in": 599}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let settings = settings_for(&server);
    let client = Arc::new(HttpTokenClient::new(quiet_logger(), &settings).expect("client"));
    let credentials = CredentialManager::new(
        quiet_logger(),
        client,
        settings.safety_margin,
        settings.token_timeout,
    );

    let mut tasks = Vec::new();
    for _ in 0..12 {
        let credentials = credentials.clone();
        tasks.push(tokio::spawn(async move { credentials.acquire().await }));
    }
    for task in tasks {
        let credential = task.await.expect("join").expect("credential");
        assert_eq!(credential.token(), "shared-token");
    }
    server.verify().await;
}
