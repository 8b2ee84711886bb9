//! HTTP entry point: wires startup configuration into the provider registry, dispatcher, MCP
//! client, tool registry, and agent executor, then exposes the four endpoints over axum. One
//! `main` builds every collaborator once and hands `Arc`s into an axum `Router` state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use serde_json::json;
use tower_http::trace::TraceLayer;

use agentrelay::agent::{AgentErrorResponse, AgentExecutor, AgentRequest};
use agentrelay::collaborators::NoopCollaborators;
use agentrelay::config::AppConfig;
use agentrelay::dispatcher::StreamDispatcher;
use agentrelay::mcp::{McpConfigFile, MCPClient};
use agentrelay::message::Message;
use agentrelay::providers::ProviderRegistry;
use agentrelay::quota::InMemoryQuotaGate;
use agentrelay::tool_registry::ToolRegistry;
use agentrelay::tools::Memory;
use agentrelay::{builtin_tools, AppError};

struct AppState {
    executor: Arc<AgentExecutor>,
    dispatcher: Arc<StreamDispatcher>,
}

fn app_error_response(err: AppError) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(AgentErrorResponse { success: false, error: err.to_string() })).into_response()
}

#[derive(serde::Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
}

async fn agent_handler(State(state): State<Arc<AppState>>, Json(request): Json<AgentRequest>) -> Response {
    let result = state.executor.run(request).await;
    let status = if result.success { StatusCode::OK } else { StatusCode::INTERNAL_SERVER_ERROR };
    (status, Json(result)).into_response()
}

async fn agent_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRequest>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let executor = state.executor.clone();
    tokio::spawn(async move {
        let result = executor.run_streaming(request, tx).await;
        let _ = result;
    });

    let events = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Some((Ok(Event::default().data(payload)), rx))
            }
            None => None,
        }
    });
    let done = stream::once(async { Ok(Event::default().event("done").data("{}")) });
    Sse::new(events.chain(done)).keep_alive(KeepAlive::default())
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match state.dispatcher.complete(&request.messages, &request.model, None).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => app_error_response(e),
    }
}

async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match state.dispatcher.stream(&request.messages, &request.model, None).await {
        Ok(chunks) => {
            let events = async_stream_from_chunks(chunks);
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => app_error_response(e),
    }
}

fn async_stream_from_chunks(
    chunks: agentrelay::providers::ChunkStream,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    stream::unfold(Some(chunks), |state| async move {
        let mut chunks = state?;
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let payload = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                Some((Ok(Event::default().data(payload)), Some(chunks)))
            }
            Some(Err(e)) => {
                let payload = json!({"error": e.to_string()}).to_string();
                Some((Ok(Event::default().event("error").data(payload)), None))
            }
            None => None,
        }
    })
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: {}", e);
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    let registry = Arc::new(ProviderRegistry::from_config(&config));
    let dispatcher = Arc::new(StreamDispatcher::new(registry));

    let mcp_config = match McpConfigFile::load_or_create(&config.mcp_config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load MCP config: {}", e);
            std::process::exit(1);
        }
    };
    let mcp_client = Arc::new(MCPClient::new(mcp_config));
    mcp_client.init_configured_servers().await;

    let memory = Arc::new(Memory::new());
    let mut builtin: Vec<Arc<dyn agentrelay::tool_registry::ToolHandler>> =
        builtin_tools::advanced_tools(dispatcher.clone(), "gpt-4o-mini".to_string(), memory);
    builtin.push(Arc::new(builtin_tools::GenerateImageTool::new(None)));
    builtin.push(Arc::new(builtin_tools::SearchDuckDuckGoTool::default()));

    let tool_registry = Arc::new(ToolRegistry::new(builtin, Some(mcp_client.clone())));
    let quota = Arc::new(InMemoryQuotaGate::new());
    let collaborators = Arc::new(NoopCollaborators);

    let executor = Arc::new(AgentExecutor::new(dispatcher.clone(), tool_registry, quota, collaborators, config.clone()));
    let state = Arc::new(AppState { executor, dispatcher });

    let app = Router::new()
        .route("/agent", post(agent_handler))
        .route("/agent/", post(agent_handler))
        .route("/agent/stream", post(agent_stream_handler))
        .route("/chat/completions", post(chat_completions_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse().unwrap_or_else(|_| {
        eprintln!("fatal: invalid AGENTRELAY_BIND_ADDR '{}'", config.bind_addr);
        std::process::exit(1);
    });
    log::info!("agentrelay listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("fatal: failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("fatal: server error: {}", e);
        std::process::exit(1);
    }
}
