//! End-to-end tool calls through the vault, invoker and telemetry pipeline

mod common;

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{GithubToken, Harness, NOW, json_body};
use integration_gateway::store::{CallStatus, ConnectionStore};
use integration_gateway::vault::connection_aad;

#[tokio::test]
async fn tool_call_produces_one_usage_entry_and_one_analytics_record() {
    let h = Harness::new(GithubToken::Valid).await;
    let (status, body) = h
        .rpc(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                     "params": {"name": "github/list_repos",
                                "arguments": {"owner": "octocat", "per_page": 5}}}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(json_body(&body)["result"].is_object());
    assert_eq!(h.upstream.calls().len(), 1);

    h.gateway.shutdown().await;

    let usage = h.usage.entries();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].user_id, "u1");
    assert_eq!(usage[0].integration_id, "int-gh");
    assert_eq!(usage[0].tool_name, "github/list_repos");
    assert_eq!(usage[0].status, CallStatus::Success);

    let records = h.analytics.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.tool_name, "github/list_repos");
    assert_eq!(record.integration_slug, "github");
    assert_eq!(
        record.parameter_shape,
        json!({"owner": "string", "per_page": "number"})
    );
    assert_eq!(record.parameter_complexity.count, 2);
    assert!(record.input_tokens > 0);
    assert!(record.output_tokens > 0);

    let serialized = serde_json::to_string(record).unwrap();
    for secret in ["octocat", "u1", "gho_live", common::API_KEY, "session-1"] {
        assert!(!serialized.contains(secret), "analytics leaked {secret}");
    }
}

#[tokio::test]
async fn expired_token_is_refreshed_then_persisted() {
    let h = Harness::new(GithubToken::Expired).await;

    let (status, body) = h
        .rest(
            "POST",
            "/gateway/tools/call",
            Some(json!({"name": "github/list_repos"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    assert_eq!(h.upstream.token_hits(), 1);
    assert_eq!(*h.upstream.refresh_tokens_seen.lock(), vec!["ghr_old".to_string()]);
    assert_eq!(
        h.upstream.calls()[0].oauth_token.as_deref(),
        Some("gho_refreshed")
    );

    let stored = h
        .connections
        .get_user_connection("u1", "github")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.token_issued_at, Some(NOW));
    let token = h
        .cipher
        .decrypt_token(
            stored.oauth_token_encrypted.as_deref().unwrap(),
            &connection_aad("u1", "int-gh"),
        )
        .unwrap();
    assert_eq!(token.access_token, "gho_refreshed");
    assert_eq!(token.refresh_token.as_deref(), Some("ghr_rotated"));
    assert_eq!(token.expires_in, Some(28800));

    // the persisted token is used as-is next time
    h.rest(
        "POST",
        "/gateway/tools/call",
        Some(json!({"name": "github/list_repos"})),
    )
    .await;
    assert_eq!(h.upstream.token_hits(), 1);
    assert_eq!(h.upstream.calls().len(), 2);
}

#[tokio::test]
async fn disabled_integration_never_reaches_vault_or_upstream() {
    let h = Harness::new(GithubToken::Valid).await;
    let before = h
        .connections
        .get_user_connection("u1", "slack")
        .await
        .unwrap()
        .unwrap();

    let (status, body) = h
        .rest(
            "POST",
            "/gateway/tools/call",
            Some(json!({"name": "slack/post_message", "arguments": {"text": "hi"}})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], -32001);

    h.gateway.shutdown().await;

    // expired refreshable token, yet no refresh attempt
    assert_eq!(h.upstream.token_hits(), 0);
    assert!(h.upstream.calls().is_empty());
    assert!(h.usage.entries().is_empty());
    assert!(h.analytics.records().is_empty());

    let after = h
        .connections
        .get_user_connection("u1", "slack")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn upstream_failure_is_recorded_as_error() {
    let h = Harness::new(GithubToken::Valid).await;
    let (status, _) = h
        .rest(
            "POST",
            "/gateway/tools/call",
            Some(json!({"name": "github/unknown_tool"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    h.gateway.shutdown().await;
    let usage = h.usage.entries();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].status, CallStatus::Error);
    assert_eq!(h.analytics.records()[0].status, CallStatus::Error);
}

#[tokio::test]
async fn repeated_failures_are_counted_as_retries() {
    let h = Harness::new(GithubToken::Valid).await;
    for _ in 0..3 {
        h.rpc(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                      "params": {"name": "github/unknown_tool"}}))
            .await;
        h.clock.advance(1_000);
    }
    h.gateway.shutdown().await;

    let records = h.analytics.records();
    assert_eq!(records.len(), 3);
    assert!(!records[0].retry.is_retry);
    assert!(records[2].retry.is_retry);
    assert_eq!(records[2].retry.retry_count, 2);
    assert_eq!(records[2].retry.loop_count, 3);
}
