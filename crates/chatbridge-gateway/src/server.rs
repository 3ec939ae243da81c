use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatbridge_auth::CredentialSnapshot;
use chatbridge_upstream::{ChatEvent, ChatRelay};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio::net::TcpListener;

use crate::error::GatewayError;
use crate::openai::{ChatCompletionRequest, ChunkFactory, ModelList};

struct AppState {
    relay: Arc<ChatRelay>,
    api_key: Option<String>,
    start_time: Instant,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    version: &'static str,
    credential: CredentialSnapshot,
}

pub struct GatewayServer {
    relay: Arc<ChatRelay>,
    api_key: Option<String>,
}

impl GatewayServer {
    pub fn new(relay: Arc<ChatRelay>) -> Self {
        Self {
            relay,
            api_key: None,
        }
    }

    /// Require callers to present `Authorization: Bearer <key>` with this
    /// key. Without one, any bearer token is accepted.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            relay: self.relay.clone(),
            api_key: self.api_key.clone(),
            start_time: Instant::now(),
        });
        Router::new()
            .route("/", get(health_handler))
            .route("/health", get(health_handler))
            .route("/v1/models", get(models_handler))
            .route("/v1/chat/completions", post(chat_completions_handler))
            .with_state(state)
    }

    pub async fn start<F>(&self, host: &str, port: u16, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;

        tracing::info!(addr = %addr, "gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::ServerError(e.to_string()))?;

        tracing::info!("gateway stopped");
        Ok(())
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        credential: state.relay.credentials().status(),
    })
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), GatewayError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(GatewayError::Unauthorized)?;
    match &state.api_key {
        Some(expected) if token != expected.as_str() => Err(GatewayError::Unauthorized),
        _ => Ok(()),
    }
}

async fn models_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ModelList>, GatewayError> {
    authorize(&state, &headers)?;
    let ids = state.relay.models().await?;
    Ok(Json(ModelList::from_ids(ids)))
}

async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    authorize(&state, &headers)?;
    let Json(request) = payload.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    if request.messages.is_empty() {
        return Err(GatewayError::BadRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let streaming = request.is_streaming();
    let chat = state.relay.open(request.into_chat_request()).await?;
    tracing::info!(
        chat_id = %chat.session.id,
        model = %chat.session.model,
        streaming,
        "chat completion started"
    );

    let factory = ChunkFactory::new(&chat.session);
    if streaming {
        return Ok(sse_response(factory, chat.events));
    }
    let events: Vec<ChatEvent> = chat.events.collect().await;
    Ok(Json(factory.completion(&events)).into_response())
}

/// One `data:` event per chunk, closed by `data: [DONE]`. Keep-alive comments
/// hold the connection open while an image job is polled.
fn sse_response(factory: ChunkFactory, events: BoxStream<'static, ChatEvent>) -> Response {
    let body = events.map(move |event| {
        let data = match factory.chunk(&event) {
            Some(chunk) => serde_json::to_string(&chunk).unwrap_or_default(),
            None => "[DONE]".to_string(),
        };
        Ok::<Event, Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(body)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
