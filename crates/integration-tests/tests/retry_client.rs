//! Retry client behavior against a live HTTP server.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::StatusCode;
use secrecy::SecretString;
use serde_json::json;
use tidecart_integration_tests::{MockServer, Route};
use tidecart_sync::http::{ApiRequest, NetworkError};
use tidecart_sync::{RetryClient, RetryPolicy};

fn policy() -> RetryPolicy {
    RetryPolicy::new(3, 2_000, 5).with_jitter(Duration::ZERO)
}

fn cart_request() -> ApiRequest {
    ApiRequest::get(["carrinho", "ana@loja.com"])
}

// =============================================================================
// Attempt budget
// =============================================================================

#[tokio::test]
async fn test_server_error_retried_until_budget_spent() {
    let server = MockServer::start().await.unwrap();
    server.fail(
        Route::Cart,
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "erro": "Serviço indisponível" }),
        None,
    );
    let client = RetryClient::new(server.url(), None);

    let result = client.send(&cart_request(), &policy()).await;

    assert_eq!(
        result,
        Err(NetworkError::HttpStatus {
            status: 503,
            message: Some("Serviço indisponível".to_string()),
        })
    );
    assert_eq!(server.hits(Route::Cart), 3);
}

#[tokio::test]
async fn test_transient_failures_recover() {
    let server = MockServer::start().await.unwrap();
    server.fail(Route::Cart, StatusCode::BAD_GATEWAY, json!({}), Some(2));
    let client = RetryClient::new(server.url(), None);

    let response = client.send(&cart_request(), &policy()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({ "carrinho": [] }));
    assert_eq!(server.hits(Route::Cart), 3);
}

#[tokio::test]
async fn test_client_error_tried_once() {
    let server = MockServer::start().await.unwrap();
    server.fail(
        Route::Cart,
        StatusCode::BAD_REQUEST,
        json!({ "mensagem": "Pedido inválido" }),
        None,
    );
    let client = RetryClient::new(server.url(), None);

    let err = client.send(&cart_request(), &policy()).await.unwrap_err();

    assert!(err.is_client_error());
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.user_message(), "Pedido inválido");
    assert_eq!(server.hits(Route::Cart), 1);
}

#[tokio::test]
async fn test_server_errors_not_retried_when_disabled() {
    let server = MockServer::start().await.unwrap();
    server.fail(Route::Cart, StatusCode::INTERNAL_SERVER_ERROR, json!({}), None);
    let client = RetryClient::new(server.url(), None);

    let err = client
        .send(&cart_request(), &policy().with_server_error_retry(false))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(err.user_message(), "HTTP 500");
    assert_eq!(server.hits(Route::Cart), 1);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await.unwrap();
    server.delay(Route::Cart, Duration::from_millis(500));
    let client = RetryClient::new(server.url(), None);
    let policy = RetryPolicy::new(2, 50, 1).with_jitter(Duration::ZERO);

    let result = client.send(&cart_request(), &policy).await;

    assert_eq!(result, Err(NetworkError::Timeout));
}

#[tokio::test]
async fn test_unreachable_server_aborts() {
    let server = MockServer::start().await.unwrap();
    let url = server.url();
    drop(server);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let client = RetryClient::new(url, None);
    let policy = RetryPolicy::new(2, 1_000, 1).with_jitter(Duration::ZERO);

    let err = client.send(&cart_request(), &policy).await.unwrap_err();

    assert!(matches!(err, NetworkError::Aborted(_) | NetworkError::Timeout));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_all_stops_outstanding_calls() {
    let server = MockServer::start().await.unwrap();
    server.delay(Route::Cart, Duration::from_secs(10));
    let client = RetryClient::new(server.url(), None);
    let scoped = client.scoped();

    let handle = scoped.spawn(cart_request(), policy());
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.cancel_all();

    let result = tokio::time::timeout(Duration::from_secs(1), handle.join())
        .await
        .unwrap();
    assert_eq!(result, Err(NetworkError::Cancelled));
}

#[tokio::test]
async fn test_scoped_cancel_leaves_parent_usable() {
    let server = MockServer::start().await.unwrap();
    let client = RetryClient::new(server.url(), None);
    let scoped = client.scoped();

    scoped.cancel_all();

    assert_eq!(
        scoped.send(&cart_request(), &policy()).await,
        Err(NetworkError::Cancelled)
    );
    assert!(client.send(&cart_request(), &policy()).await.is_ok());
}

#[tokio::test]
async fn test_single_handle_cancel() {
    let server = MockServer::start().await.unwrap();
    server.delay(Route::Products, Duration::from_secs(10));
    let client = RetryClient::new(server.url(), None);

    let slow = client.spawn(ApiRequest::get(["produtos"]), policy());
    slow.cancel();

    assert_eq!(slow.join().await, Err(NetworkError::Cancelled));
    assert!(client.send(&cart_request(), &policy()).await.is_ok());
}

// =============================================================================
// Request shape
// =============================================================================

#[tokio::test]
async fn test_bearer_token_sent() {
    let server = MockServer::start().await.unwrap();
    let client = RetryClient::new(server.url(), Some(SecretString::from("tok-123")));

    client.send(&cart_request(), &policy()).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].bearer.as_deref(), Some("tok-123"));
}

#[tokio::test]
async fn test_no_token_no_authorization() {
    let server = MockServer::start().await.unwrap();
    let client = RetryClient::new(server.url(), None);

    client.send(&cart_request(), &policy()).await.unwrap();

    assert_eq!(server.requests()[0].bearer, None);
}

#[tokio::test]
async fn test_path_segments_are_percent_encoded() {
    let server = MockServer::start().await.unwrap();
    let client = RetryClient::new(server.url(), None);

    client
        .send(&ApiRequest::get(["carrinho", "ana/souza@loja.com"]), &policy())
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].route, Route::Cart);
    assert_eq!(requests[0].path, "carrinho/ana/souza@loja.com");
}
