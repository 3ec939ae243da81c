//! Relays one chat request: credential, upstream call, event stream.

use std::future::Future;
use std::sync::Arc;

use chatbridge_auth::{AuthError, CredentialManager, SessionCredential};
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{info, warn};

use crate::client::UpstreamClient;
use crate::engine::{chat_events, StreamContext};
use crate::error::{RelayError, UpstreamError};
use crate::image::ImageJobPoller;
use crate::reconcile::DEFAULT_MIN_SUFFIX_MATCH;
use crate::types::{ChatEvent, ChatMessage, ChatSession, UpstreamChatRequest};

/// Values used when the caller leaves a field out.
#[derive(Debug, Clone)]
pub struct ChatDefaults {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for ChatDefaults {
    fn default() -> Self {
        Self {
            model: "DeepSeek-R1".to_string(),
            system_prompt: "You are a helpful assistant.".to_string(),
            temperature: 0.6,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

pub struct ChatStream {
    pub session: ChatSession,
    pub events: BoxStream<'static, ChatEvent>,
}

pub struct ChatRelay {
    client: UpstreamClient,
    credentials: CredentialManager,
    poller: Option<Arc<dyn ImageJobPoller>>,
    defaults: ChatDefaults,
    min_suffix_match: usize,
}

impl ChatRelay {
    pub fn new(
        client: UpstreamClient,
        credentials: CredentialManager,
        defaults: ChatDefaults,
    ) -> Self {
        Self {
            client,
            credentials,
            poller: None,
            defaults,
            min_suffix_match: DEFAULT_MIN_SUFFIX_MATCH,
        }
    }

    pub fn with_image_poller(mut self, poller: Arc<dyn ImageJobPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn with_min_suffix_match(mut self, min_suffix_match: usize) -> Self {
        self.min_suffix_match = min_suffix_match;
        self
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn defaults(&self) -> &ChatDefaults {
        &self.defaults
    }

    /// Start an upstream chat and return its event stream.
    ///
    /// Fails before any event is produced if no credential is available or
    /// the upstream refuses the request.
    pub async fn open(&self, request: ChatRequest) -> Result<ChatStream, RelayError> {
        let session = ChatSession::new(
            request
                .model
                .unwrap_or_else(|| self.defaults.model.clone()),
        );
        let body = UpstreamChatRequest {
            id: session.id.clone(),
            messages: request.messages,
            model: session.model.clone(),
            system: request
                .system
                .unwrap_or_else(|| self.defaults.system_prompt.clone()),
            temperature: request.temperature.unwrap_or(self.defaults.temperature),
            top_p: request.top_p.unwrap_or(self.defaults.top_p),
        };

        let (response, credential) = self
            .with_credential(|credential| {
                let client = self.client.clone();
                let body = body.clone();
                async move { client.start_chat(&body, &credential).await }
            })
            .await?;

        info!(chat_id = %session.id, model = %session.model, "upstream chat opened");

        let ctx = StreamContext {
            session: session.clone(),
            credential,
            poller: self.poller.clone(),
            min_suffix_match: self.min_suffix_match,
        };
        Ok(ChatStream {
            session,
            events: chat_events(response.bytes_stream(), ctx).boxed(),
        })
    }

    /// Model ids offered by the upstream.
    pub async fn models(&self) -> Result<Vec<String>, RelayError> {
        let (models, _) = self
            .with_credential(|credential| {
                let client = self.client.clone();
                async move { client.list_models(&credential).await }
            })
            .await?;
        Ok(models)
    }

    /// Run `op` with the current credential. If the upstream rejects it, force
    /// one refresh and retry once with the new credential.
    async fn with_credential<T, F, Fut>(
        &self,
        op: F,
    ) -> Result<(T, Arc<SessionCredential>), RelayError>
    where
        F: Fn(Arc<SessionCredential>) -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let credential = self.credentials.ensure().await?;
        match op(credential.clone()).await {
            Ok(value) => return Ok((value, credential)),
            Err(UpstreamError::AuthRejected { status }) => {
                warn!(
                    status,
                    generation = credential.generation(),
                    "upstream rejected session, forcing refresh"
                );
            }
            Err(e) => return Err(e.into()),
        }

        let fresh = self
            .credentials
            .force_refresh(&credential)
            .await
            .ok_or(AuthError::Unavailable(self.credentials.settings().refresh_wait))?;

        match op(fresh.clone()).await {
            Ok(value) => Ok((value, fresh)),
            Err(UpstreamError::AuthRejected { status }) => {
                Err(RelayError::RejectedAfterRefresh { status })
            }
            Err(e) => Err(e.into()),
        }
    }
}
