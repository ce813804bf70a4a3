//! Connection and RPC-core behaviour against the mock appliance.

use std::time::Duration;

use serde_json::{json, Value};
use truenas_client::mock::{MockResponse, MockServer};
use truenas_client::{Client, ClientConfig, ClientError};

fn test_config(url: &str) -> ClientConfig {
    ClientConfig {
        call_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(5),
        // Keepalive off so tests control all traffic.
        ping_interval: Duration::ZERO,
        reconnect_min: Duration::from_millis(50),
        reconnect_max: Duration::from_millis(200),
        ..ClientConfig::new(url, "test-api-key")
    }
}

async fn connected_client(mock: &MockServer) -> Client {
    let client = Client::new(test_config(mock.url()));
    client.connect().await.expect("connect to mock");
    client
}

#[tokio::test]
async fn test_connect_success() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    assert!(client.connected());
    client.close().await;
}

#[tokio::test]
async fn test_connect_refused() {
    // Nothing listens on port 1.
    let client = Client::new(test_config("ws://127.0.0.1:1"));
    let err = client.connect().await.unwrap_err();
    assert!(err.is_connection_error(), "got {err}");
    client.close().await;
}

#[tokio::test]
async fn test_connect_invalid_config() {
    let client = Client::new(test_config("http://nas.local"));
    let err = client.connect().await.unwrap_err();
    assert!(err.is_config_error());

    let client = Client::new(test_config(""));
    let err = client.connect().await.unwrap_err();
    assert!(err.is_config_error());
}

#[tokio::test]
async fn test_connect_auth_rpc_error() {
    let mock = MockServer::start().await;
    mock.set_auth_failure(true);

    let client = Client::new(test_config(mock.url()));
    let err = client.connect().await.unwrap_err();
    assert!(err.is_rpc_error(), "got {err}");
    assert!(!client.connected());
    client.close().await;
}

#[tokio::test]
async fn test_connect_wrong_api_key() {
    let mock = MockServer::start().await;
    mock.set_api_key("correct-key");

    let client = Client::new(ClientConfig {
        api_key: "wrong-key".to_string(),
        ..test_config(mock.url())
    });
    let err = client.connect().await.unwrap_err();
    assert!(err.is_auth_failed(), "got {err}");
    client.close().await;
}

#[tokio::test]
async fn test_connect_already_connected_is_noop() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;

    client.connect().await.expect("reentrant connect");
    assert!(client.connected());
    // The second connect must not have opened a second connection.
    assert_eq!(mock.connection_count(), 1);
    client.close().await;
}

#[tokio::test]
async fn test_connect_after_close_fails() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;

    client.close().await;
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;

    client.close().await;
    client.close().await;
    assert!(!client.connected());
}

#[tokio::test]
async fn test_close_without_connect() {
    let mock = MockServer::start().await;
    let client = Client::new(test_config(mock.url()));
    client.close().await;
    assert!(!client.connected());
}

#[tokio::test]
async fn test_connected_states() {
    let mock = MockServer::start().await;
    let client = Client::new(test_config(mock.url()));

    assert!(!client.connected());
    client.connect().await.unwrap();
    assert!(client.connected());
    client.close().await;
    assert!(!client.connected());
}

#[tokio::test]
async fn test_ping() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    client.ping().await.expect("ping");
    client.close().await;
}

#[tokio::test]
async fn test_ping_not_connected() {
    let mock = MockServer::start().await;
    let client = Client::new(test_config(mock.url()));
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    client.close().await;
}

#[tokio::test]
async fn test_call_with_params() {
    let mock = MockServer::start().await;
    mock.set_response("test.method", MockResponse::ok("ok"));
    let client = connected_client(&mock).await;

    let result: String = client
        .call("test.method", json!(["param1", 42]))
        .await
        .unwrap();
    assert_eq!(result, "ok");

    let requests = mock.requests_for("test.method");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].params, json!(["param1", 42]));
    client.close().await;
}

#[tokio::test]
async fn test_call_rpc_error() {
    let mock = MockServer::start().await;
    mock.set_response("test.method", MockResponse::err(-1, "test error"));
    let client = connected_client(&mock).await;

    let err = client.call_raw("test.method", json!([])).await.unwrap_err();
    match err {
        ClientError::Rpc(rpc) => {
            assert_eq!(rpc.code, -1);
            assert_eq!(rpc.message, "test error");
        }
        other => panic!("expected rpc error, got {other}"),
    }
    client.close().await;
}

#[tokio::test]
async fn test_call_not_connected() {
    let mock = MockServer::start().await;
    let client = Client::new(test_config(mock.url()));
    let err = client.call_raw("test.method", json!([])).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    client.close().await;
}

#[tokio::test]
async fn test_call_after_close() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    client.close().await;

    let err = client.call_raw("test.method", json!([])).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test]
async fn test_call_null_result() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;

    // Unconfigured methods answer null; callers that ignore the payload
    // read it as a raw value.
    let result = client.call_raw("test.unconfigured", json!([])).await.unwrap();
    assert_eq!(result, Value::Null);
    client.close().await;
}

#[tokio::test]
async fn test_call_decode_mismatch() {
    let mock = MockServer::start().await;
    mock.set_response("test.method", MockResponse::ok(json!({"k": "v"})));
    let client = connected_client(&mock).await;

    let err = client
        .call::<_, Vec<String>>("test.method", json!([]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Decode(_)), "got {err}");
    client.close().await;
}

#[tokio::test]
async fn test_call_timeout() {
    let mock = MockServer::start().await;
    let client = Client::new(ClientConfig {
        call_timeout: Duration::from_millis(200),
        ..test_config(mock.url())
    });
    client.connect().await.unwrap();
    // Delay replies only after login so connect itself is unaffected.
    mock.set_reply_delay(Duration::from_secs(30));

    let err = client.call_raw("test.slow", json!([])).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout(_)), "got {err}");
    // The waiter must be deregistered once the call returns.
    assert_eq!(client.pending_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn test_cancelled_call_deregisters_waiter() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    mock.set_reply_delay(Duration::from_secs(30));

    // An outer deadline shorter than the call timeout cancels the call
    // future outright.
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        client.call_raw("test.slow", json!([])),
    )
    .await;
    assert!(result.is_err(), "expected outer timeout");
    assert_eq!(client.pending_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn test_notify_sends_without_waiting() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;

    client
        .notify("core.job_update", json!([{"fields": {}}]))
        .await
        .unwrap();

    // The notification reaches the server and no reply is expected.
    for _ in 0..20 {
        if !mock.requests_for("core.job_update").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(mock.requests_for("core.job_update").len(), 1);
    assert_eq!(client.pending_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn test_concurrent_calls_route_to_correct_waiters() {
    let mock = MockServer::start().await;
    // Echo the first positional parameter back as the result.
    mock.set_response_fn(|_method, params| {
        let first = params.as_array().and_then(|a| a.first()).cloned();
        MockResponse::ok(first.unwrap_or(Value::Null))
    });
    mock.set_reply_jitter(Duration::from_millis(3));

    let client = std::sync::Arc::new(connected_client(&mock).await);

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let client = std::sync::Arc::clone(&client);
        handles.push(tokio::spawn(async move {
            let echoed: u32 = client.call("test.echo", json!([i])).await.unwrap();
            (i, echoed)
        }));
    }
    for handle in handles {
        let (sent, echoed) = handle.await.unwrap();
        assert_eq!(sent, echoed, "reply misrouted");
    }

    assert_eq!(mock.connection_count(), 1);
    assert_eq!(client.pending_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn test_reconnect_after_connection_loss() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    assert_eq!(mock.connection_count(), 1);

    mock.drop_connections();

    // The supervisor re-dials with backoff; wait for it to come back.
    let mut reconnected = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if client.connected() {
            reconnected = true;
            break;
        }
    }
    assert!(reconnected, "session did not recover");
    assert!(mock.connection_count() >= 2);
    client.ping().await.expect("ping after reconnect");
    client.close().await;
}

#[tokio::test]
async fn test_calls_fail_fast_during_outage() {
    let mock = MockServer::start().await;
    let client = connected_client(&mock).await;
    mock.close();

    // Give the reader a moment to observe the loss.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = client.call_raw("test.method", json!([])).await.unwrap_err();
    assert!(
        err.is_connection_error() || matches!(err, ClientError::NotConnected),
        "got {err}"
    );
    client.close().await;
}
