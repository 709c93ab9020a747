//! Streaming HTTP surface for Overture.
//!
//! The handler here is deliberately thin: authentication and tenant
//! extraction happen upstream, so a request arrives as an already-resolved
//! parameter bundle. This crate's job is admission control, SSE transport
//! plumbing (encoder + keep-alive), and translating a failed turn into the
//! client-visible error event.

pub mod ratelimit;
pub mod sse;

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use overture_agent::{TurnEvent, TurnOrchestrator, TurnParams};
use overture_config::AppConfig;
use overture_core::prompt::SystemPromptBuilder;
use overture_core::provider::{LlmConnection, ProviderFactory};
use overture_core::repo::ConversationRepository;
use overture_core::tool::{PermissionChecker, ToolRegistry};
use overture_providers::DefaultProviderFactory;

use ratelimit::{RateLimitError, RateLimiter};
use sse::{KeepAlive, SseEncoder};

/// Shared state behind every streaming turn.
pub struct GatewayState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub limiter: Arc<RateLimiter>,
    keepalive_period: Duration,
    tools: Option<Arc<ToolRegistry>>,
    permissions: Option<Arc<dyn PermissionChecker>>,
}

pub type SharedGatewayState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the orchestrator against the default provider factory.
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        prompts: Arc<dyn SystemPromptBuilder>,
        config: &AppConfig,
    ) -> Self {
        let factory = Arc::new(DefaultProviderFactory::from_config(&config.stream));
        Self::with_factory(repo, prompts, factory, config)
    }

    /// Wire the orchestrator against a caller-supplied provider factory.
    pub fn with_factory(
        repo: Arc<dyn ConversationRepository>,
        prompts: Arc<dyn SystemPromptBuilder>,
        factory: Arc<dyn ProviderFactory>,
        config: &AppConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(TurnOrchestrator::new(repo, prompts, factory, config)),
            limiter: Arc::new(RateLimiter::new(config.rate.clone())),
            keepalive_period: Duration::from_secs(config.stream.keepalive_secs),
            tools: None,
            permissions: None,
        }
    }

    /// Attach the tool registry and permission checker shared by all turns.
    pub fn with_tools(
        mut self,
        tools: Arc<ToolRegistry>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        self.tools = Some(tools);
        self.permissions = Some(permissions);
        self
    }

    /// Start the limiter's periodic window sweep. Call once at startup,
    /// inside the runtime; the task runs until aborted.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.limiter.clone().spawn_sweeper()
    }
}

/// Build the router: the streaming turn endpoint plus a health probe.
pub fn build_router(state: SharedGatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/turns/stream", post(stream_turn))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize structured logging from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// One turn's inbound parameter bundle, pre-resolved by the caller.
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub user_role: String,
    pub message: String,
    #[serde(default)]
    pub system_prompt_override: Option<String>,
    pub connection: ConnectionRequest,
}

/// Resolved LLM connection info as it arrives on the wire.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub provider: String,
    #[serde(default)]
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    128_000
}

impl TurnRequest {
    fn into_params(
        self,
        tools: Option<Arc<ToolRegistry>>,
        permissions: Option<Arc<dyn PermissionChecker>>,
    ) -> TurnParams {
        TurnParams {
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            user_role: self.user_role,
            message: self.message,
            system_prompt_override: self.system_prompt_override,
            connection: LlmConnection {
                provider: self.connection.provider,
                endpoint: self.connection.endpoint,
                api_key: self.connection.api_key,
                model: self.connection.model,
                max_tokens: self.connection.max_tokens,
                context_window: self.connection.context_window,
            },
            tools,
            permissions,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn too_many_requests(err: RateLimitError) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// `POST /v1/turns/stream` — run one turn, streaming SSE frames back.
async fn stream_turn(
    State(state): State<SharedGatewayState>,
    Json(request): Json<TurnRequest>,
) -> Response {
    // Admission: the stream slot first, then throughput. A throughput
    // rejection must give the slot back.
    if let Err(err) = state.limiter.acquire_stream(&request.user_id) {
        return too_many_requests(err);
    }
    if let Err(err) = state
        .limiter
        .allow_message(&request.user_id, &request.tenant_id)
    {
        state.limiter.release_stream(&request.user_id);
        return too_many_requests(err);
    }

    info!(
        conversation_id = %request.conversation_id,
        user_id = %request.user_id,
        "Streaming turn accepted"
    );

    let (writer, reader) = tokio::io::duplex(16 * 1024);
    let encoder = Arc::new(SseEncoder::new(writer));
    let keepalive = KeepAlive::spawn(encoder.clone(), state.keepalive_period);

    let params = request.into_params(state.tools.clone(), state.permissions.clone());
    let user_id = params.user_id.clone();
    let orchestrator = state.orchestrator.clone();
    let limiter = state.limiter.clone();

    tokio::spawn(async move {
        if let Err(err) = orchestrator.send_message(params, encoder.as_ref()).await {
            error!(error = %err, code = err.client_code(), "Turn failed");
            // Whatever was already streamed stands; the error is appended.
            let _ = encoder
                .write_event(&TurnEvent::Error {
                    code: err.client_code().into(),
                    message: err.client_message(),
                })
                .await;
        }
        // Tear the ticker down before the transport goes away so nothing
        // writes after this task returns.
        keepalive.shutdown().await;
        limiter.release_stream(&user_id);
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReaderStream::new(reader)))
        .expect("static response construction cannot fail")
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use overture_agent::test_support::{
        InMemoryRepository, ScriptedProvider, StaticFactory, StaticPromptBuilder,
    };
    use overture_core::repo::Conversation;

    fn test_state(
        provider: Arc<ScriptedProvider>,
        config: AppConfig,
    ) -> (SharedGatewayState, Conversation) {
        let repo = Arc::new(InMemoryRepository::new());
        let conversation = repo.seed_conversation("u-1", "t-1");
        let state = GatewayState::with_factory(
            repo,
            Arc::new(StaticPromptBuilder::new("You are a helpful assistant.")),
            Arc::new(StaticFactory::new(provider)),
            &config,
        );
        (Arc::new(state), conversation)
    }

    fn turn_request_body(conversation: &Conversation) -> String {
        serde_json::json!({
            "conversation_id": conversation.id,
            "user_id": conversation.user_id,
            "tenant_id": conversation.tenant_id,
            "user_role": "member",
            "message": "Hi there",
            "connection": {
                "provider": "openai",
                "endpoint": "https://api.openai.com/v1",
                "api_key": "sk-test",
                "model": "gpt-4o"
            }
        })
        .to_string()
    }

    fn post_turn(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/turns/stream")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (state, _) = test_state(provider, AppConfig::default());
        let app = build_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn streaming_turn_returns_sse_frames() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text_round(
            &["Hello", " world"],
            9,
        )]));
        let (state, conversation) = test_state(provider, AppConfig::default());
        let app = build_router(state);

        let response = app
            .oneshot(post_turn(turn_request_body(&conversation)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: token\ndata: {\"type\":\"token\",\"content\":\"Hello\"}"));
        assert!(text.contains("\"content\":\" world\""));
        assert!(text.contains("event: done\n"));
    }

    #[tokio::test]
    async fn failed_turn_appends_error_event() {
        // Unknown conversation id: validation error after the stream opens.
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (state, _) = test_state(provider, AppConfig::default());
        let app = build_router(state);

        let body = serde_json::json!({
            "conversation_id": "missing",
            "user_id": "u-1",
            "tenant_id": "t-1",
            "user_role": "member",
            "message": "Hi",
            "connection": {
                "provider": "openai",
                "endpoint": "https://api.openai.com/v1",
                "api_key": "sk-test",
                "model": "gpt-4o"
            }
        })
        .to_string();

        let response = app.oneshot(post_turn(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let collected = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(collected.to_vec()).unwrap();
        assert!(text.contains("event: error\n"));
        assert!(text.contains("\"code\":\"validation_error\""));
    }

    #[tokio::test]
    async fn throughput_rejection_is_429_and_releases_the_stream_slot() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text_round(
            &["ok"],
            3,
        )]));
        let mut config = AppConfig::default();
        config.rate.user_per_minute = 0;
        let (state, conversation) = test_state(provider, config);
        let app = build_router(state.clone());

        let response = app
            .oneshot(post_turn(turn_request_body(&conversation)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // The slot went back: a direct acquire succeeds.
        state.limiter.acquire_stream(&conversation.user_id).unwrap();
    }

    #[tokio::test]
    async fn sweeper_task_starts_and_stops() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (state, _) = test_state(provider, AppConfig::default());
        let handle = state.start_sweeper();
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test]
    async fn concurrent_stream_is_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (state, conversation) = test_state(provider, AppConfig::default());
        state.limiter.acquire_stream(&conversation.user_id).unwrap();

        let app = build_router(state.clone());
        let response = app
            .oneshot(post_turn(turn_request_body(&conversation)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("already active"));
    }
}
