//! Shared harness: a gateway over in-memory stores, a mock integration
//! endpoint and a mock OAuth token endpoint, all on 127.0.0.1:0.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Form, Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Response, StatusCode},
    response::IntoResponse,
    routing::post,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt;

use integration_gateway::clock::{Clock, ManualClock};
use integration_gateway::config::Config;
use integration_gateway::gateway::{Collaborators, Gateway, hash_api_key};
use integration_gateway::store::{
    InMemoryAnalytics, InMemoryCatalog, InMemoryConnectionStore, InMemoryUsageLog,
    InMemoryUserDirectory, IntegrationDescriptor, IntegrationResource, IntegrationTool, User,
    UserIntegrationConnection,
};
use integration_gateway::vault::{OAuthProviderConfig, OAuthToken, TokenCipher, connection_aad};

pub const API_KEY: &str = "key-ada";
pub const NOW: i64 = 1_700_000_000_000;

/// One call as seen by the mock integration
#[derive(Debug, Clone)]
pub struct SeenCall {
    pub path: String,
    pub oauth_token: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Default)]
pub struct Upstream {
    pub calls: Mutex<Vec<SeenCall>>,
    pub token_hits: AtomicUsize,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
}

impl Upstream {
    pub fn calls(&self) -> Vec<SeenCall> {
        self.calls.lock().clone()
    }

    pub fn token_hits(&self) -> usize {
        self.token_hits.load(Ordering::SeqCst)
    }
}

async fn integration_handler(
    State(upstream): State<Arc<Upstream>>,
    headers: HeaderMap,
    request_path: axum::extract::OriginalUri,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    upstream.calls.lock().push(SeenCall {
        path: request_path.0.path().to_string(),
        oauth_token: header("x-oauth-token"),
        authorization: header("authorization"),
        body: body.clone(),
    });
    match body["toolName"].as_str() {
        Some("list_repos") => Json(json!([{"name": "hello-world", "private": false}])).into_response(),
        Some("post_message") => Json(json!({"ok": true})).into_response(),
        _ => (StatusCode::BAD_REQUEST, "unknown tool").into_response(),
    }
}

async fn token_handler(
    State(upstream): State<Arc<Upstream>>,
    Form(form): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    upstream.token_hits.fetch_add(1, Ordering::SeqCst);
    if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type"})))
            .into_response();
    }
    if let Some(rt) = form.get("refresh_token") {
        upstream.refresh_tokens_seen.lock().push(rt.clone());
    }
    Json(json!({
        "access_token": "gho_refreshed",
        "token_type": "bearer",
        "expires_in": 28800,
        "refresh_token": "ghr_rotated",
    }))
    .into_response()
}

async fn spawn_upstream(upstream: Arc<Upstream>) -> String {
    let router = Router::new()
        .route("/github", post(integration_handler))
        .route("/slack", post(integration_handler))
        .route("/oauth/token", post(token_handler))
        .with_state(upstream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub fn token(access: &str, expires_in: Option<u64>, refresh: Option<&str>) -> OAuthToken {
    OAuthToken {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: refresh.map(str::to_string),
        scope: Some("repo".to_string()),
    }
}

/// How the github connection's token starts out
pub enum GithubToken {
    Valid,
    Expired,
}

pub struct Harness {
    pub gateway: Gateway,
    pub router: Router,
    pub upstream: Arc<Upstream>,
    pub connections: Arc<InMemoryConnectionStore>,
    pub usage: Arc<InMemoryUsageLog>,
    pub analytics: Arc<InMemoryAnalytics>,
    pub clock: Arc<ManualClock>,
    pub cipher: TokenCipher,
}

impl Harness {
    pub async fn new(github: GithubToken) -> Self {
        let upstream = Arc::new(Upstream::default());
        let base = spawn_upstream(upstream.clone()).await;
        let key = TokenCipher::generate_key();
        let cipher = TokenCipher::from_config_key(&key).unwrap();

        let mut config = Config::default();
        config.vault.encryption_key = key;
        config.invoker.timeout = Duration::from_secs(5);
        config.providers.insert(
            "github".to_string(),
            OAuthProviderConfig {
                client_id: "client-gh".to_string(),
                client_secret: "secret-gh".to_string(),
                token_url: format!("{base}/oauth/token"),
                ..OAuthProviderConfig::default()
            },
        );
        config.providers.insert(
            "slack".to_string(),
            OAuthProviderConfig {
                client_id: "client-slack".to_string(),
                client_secret: "secret-slack".to_string(),
                token_url: format!("{base}/oauth/token"),
                ..OAuthProviderConfig::default()
            },
        );

        let users = Arc::new(InMemoryUserDirectory::new());
        users.insert(
            hash_api_key(API_KEY),
            User {
                id: "u1".to_string(),
                name: "Ada".to_string(),
            },
        );

        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert(IntegrationDescriptor {
            id: "int-gh".to_string(),
            slug: "github".to_string(),
            name: "GitHub".to_string(),
            function_path: format!("{base}/github"),
            tools: vec![IntegrationTool {
                name: "list_repos".to_string(),
                description: "List repositories".to_string(),
                input_schema: json!({"type": "object", "properties": {"owner": {"type": "string"}}}),
            }],
            resources: vec![IntegrationResource {
                uri_template: "github://repos/{owner}".to_string(),
                name: "repos".to_string(),
                description: "Repositories of an owner".to_string(),
                mime_type: Some("application/json".to_string()),
            }],
        });
        catalog.insert(IntegrationDescriptor {
            id: "int-slack".to_string(),
            slug: "slack".to_string(),
            name: "Slack".to_string(),
            function_path: format!("{base}/slack"),
            tools: vec![IntegrationTool {
                name: "post_message".to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
            }],
            resources: vec![],
        });

        let hour_ms = 3_600_000;
        let (github_token, issued_at) = match github {
            GithubToken::Valid => (token("gho_live", Some(3600), Some("ghr_old")), NOW),
            GithubToken::Expired => (
                token("gho_stale", Some(3600), Some("ghr_old")),
                NOW - 2 * hour_ms,
            ),
        };

        let connections = Arc::new(InMemoryConnectionStore::new());
        connections.insert(UserIntegrationConnection {
            user_id: "u1".to_string(),
            integration_id: "int-gh".to_string(),
            slug: "github".to_string(),
            enabled: true,
            oauth_token_encrypted: Some(
                cipher
                    .encrypt_token(&github_token, &connection_aad("u1", "int-gh"))
                    .unwrap(),
            ),
            token_issued_at: Some(issued_at),
        });
        // disabled, with an expired refreshable token
        connections.insert(UserIntegrationConnection {
            user_id: "u1".to_string(),
            integration_id: "int-slack".to_string(),
            slug: "slack".to_string(),
            enabled: false,
            oauth_token_encrypted: Some(
                cipher
                    .encrypt_token(
                        &token("xoxb_stale", Some(60), Some("xoxr_old")),
                        &connection_aad("u1", "int-slack"),
                    )
                    .unwrap(),
            ),
            token_issued_at: Some(NOW - 2 * hour_ms),
        });

        let usage = Arc::new(InMemoryUsageLog::new());
        let analytics = Arc::new(InMemoryAnalytics::new());
        let clock = Arc::new(ManualClock::new(NOW));

        let gateway = Gateway::with_collaborators(
            config,
            Collaborators {
                users,
                connections: connections.clone(),
                catalog,
                usage: usage.clone(),
                analytics: analytics.clone(),
            },
            clock.clone() as Arc<dyn Clock>,
        )
        .unwrap();
        let router = gateway.router();

        Self {
            gateway,
            router,
            upstream,
            connections,
            usage,
            analytics,
            clock,
            cipher,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// POST /mcp with the API key
    pub async fn rpc(&self, body: &Value) -> (StatusCode, Vec<u8>) {
        self.rpc_raw(body.to_string(), Some(API_KEY)).await
    }

    pub async fn rpc_raw(&self, body: String, key: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::post("/mcp")
            .header("content-type", "application/json")
            .header("mcp-session-id", "session-1");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        let response = self.send(builder.body(Body::from(body)).unwrap()).await;
        let status = response.status();
        (status, body_bytes(response).await)
    }

    /// REST call with the API key
    pub async fn rest(&self, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.rest_with_key(method, path, body, Some(API_KEY)).await
    }

    pub async fn rest_with_key(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status();
        let bytes = body_bytes(response).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}
