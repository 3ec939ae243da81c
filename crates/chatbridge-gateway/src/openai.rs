//! OpenAI chat-completions wire types.

use chatbridge_upstream::{ChatEvent, ChatMessage, ChatRequest, ChatSession, FinishReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    /// Absent means streaming.
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Replaces the default system prompt.
    #[serde(default)]
    pub system_message: Option<String>,
}

impl ChatCompletionRequest {
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(true)
    }

    pub fn into_chat_request(self) -> ChatRequest {
        ChatRequest {
            messages: self.messages,
            model: self.model,
            system: self.system_message,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Stamps engine events with the envelope shared by every chunk of one
/// completion.
#[derive(Debug, Clone)]
pub struct ChunkFactory {
    id: String,
    model: String,
    created: i64,
}

impl ChunkFactory {
    pub fn new(session: &ChatSession) -> Self {
        Self {
            id: format!("chatcmpl-{}", session.id),
            model: session.model.clone(),
            created: chrono::Utc::now().timestamp(),
        }
    }

    /// `None` for [`ChatEvent::Done`], which has no chunk of its own.
    pub fn chunk(&self, event: &ChatEvent) -> Option<ChatCompletionChunk> {
        let (delta, finish_reason) = match event {
            ChatEvent::Role => (
                Delta {
                    role: Some("assistant"),
                    content: None,
                },
                None,
            ),
            ChatEvent::Content(text) => (
                Delta {
                    role: None,
                    content: Some(text.clone()),
                },
                None,
            ),
            ChatEvent::Finish(reason) => (Delta::default(), Some(*reason)),
            ChatEvent::Done => return None,
        };
        Some(ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        })
    }

    /// Fold a whole event sequence into one non-streaming response.
    pub fn completion<'a>(&self, events: impl IntoIterator<Item = &'a ChatEvent>) -> ChatCompletion {
        let mut content = String::new();
        let mut finish_reason = FinishReason::Stop;
        for event in events {
            match event {
                ChatEvent::Content(text) => content.push_str(text),
                ChatEvent::Finish(reason) => finish_reason = *reason,
                ChatEvent::Role | ChatEvent::Done => {}
            }
        }
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content,
                },
                finish_reason,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

impl ModelList {
    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        let created = chrono::Utc::now().timestamp();
        Self {
            object: "list",
            data: ids
                .into_iter()
                .map(|id| ModelObject::new(id, created))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
    pub permission: Vec<ModelPermission>,
    pub root: String,
    pub parent: Option<String>,
}

impl ModelObject {
    fn new(id: String, created: i64) -> Self {
        Self {
            permission: vec![ModelPermission::new(&id, created)],
            root: id.clone(),
            id,
            object: "model",
            created,
            owned_by: "akash",
            parent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPermission {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub allow_create_engine: bool,
    pub allow_sampling: bool,
    pub allow_logprobs: bool,
    pub allow_search_indices: bool,
    pub allow_view: bool,
    pub allow_fine_tuning: bool,
    pub organization: &'static str,
    pub group: Option<String>,
    pub is_blocking: bool,
}

impl ModelPermission {
    fn new(model_id: &str, created: i64) -> Self {
        Self {
            id: format!("modelperm-{}", model_id),
            object: "model_permission",
            created,
            allow_create_engine: false,
            allow_sampling: true,
            allow_logprobs: true,
            allow_search_indices: false,
            allow_view: true,
            allow_fine_tuning: false,
            organization: "*",
            group: None,
            is_blocking: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> ChatSession {
        ChatSession {
            id: "0123456789abcdef".to_string(),
            model: "DeepSeek-R1".to_string(),
        }
    }

    #[test]
    fn test_request_defaults_to_streaming() {
        let req: ChatCompletionRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "hi"}]}))
                .unwrap();
        assert!(req.is_streaming());

        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "messages": [],
            "stream": false,
            "system_message": "Be brief.",
            "top_p": 0.5
        }))
        .unwrap();
        assert!(!req.is_streaming());
        let chat = req.into_chat_request();
        assert_eq!(chat.system.as_deref(), Some("Be brief."));
        assert_eq!(chat.top_p, Some(0.5));
        assert_eq!(chat.model, None);
    }

    #[test]
    fn test_chunk_envelope() {
        let factory = ChunkFactory::new(&session());

        let role = serde_json::to_value(factory.chunk(&ChatEvent::Role).unwrap()).unwrap();
        assert_eq!(role["id"], "chatcmpl-0123456789abcdef");
        assert_eq!(role["object"], "chat.completion.chunk");
        assert_eq!(role["model"], "DeepSeek-R1");
        assert_eq!(role["choices"][0]["index"], 0);
        assert_eq!(role["choices"][0]["delta"], json!({"role": "assistant"}));
        assert!(role["choices"][0]["finish_reason"].is_null());

        let content =
            serde_json::to_value(factory.chunk(&ChatEvent::Content("hi".into())).unwrap()).unwrap();
        assert_eq!(content["choices"][0]["delta"], json!({"content": "hi"}));

        let finish = serde_json::to_value(
            factory
                .chunk(&ChatEvent::Finish(FinishReason::Length))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(finish["choices"][0]["delta"], json!({}));
        assert_eq!(finish["choices"][0]["finish_reason"], "length");

        assert!(factory.chunk(&ChatEvent::Done).is_none());
    }

    #[test]
    fn test_completion_concatenates_content() {
        let factory = ChunkFactory::new(&session());
        let events = [
            ChatEvent::Role,
            ChatEvent::Content("Hello".into()),
            ChatEvent::Content(" there".into()),
            ChatEvent::Finish(FinishReason::Stop),
            ChatEvent::Done,
        ];
        let value = serde_json::to_value(factory.completion(&events)).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "Hello there");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_model_list_permission_block() {
        let value = serde_json::to_value(ModelList::from_ids(vec!["AkashGen".to_string()])).unwrap();
        assert_eq!(value["object"], "list");
        let model = &value["data"][0];
        assert_eq!(model["id"], "AkashGen");
        assert_eq!(model["owned_by"], "akash");
        let permission = &model["permission"][0];
        assert_eq!(permission["id"], "modelperm-AkashGen");
        assert_eq!(permission["allow_sampling"], true);
        assert_eq!(permission["allow_fine_tuning"], false);
        assert_eq!(permission["organization"], "*");
        assert!(permission["group"].is_null());
    }
}
