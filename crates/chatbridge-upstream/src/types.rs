//! Chat session and event types shared by the relay, engine and gateway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One conversation turn. `content` is passed through untouched so that
/// multi-part content arrays survive the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: serde_json::Value::String(content.into()),
        }
    }
}

/// Identity of one relayed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    /// 16 lowercase hex characters.
    pub id: String,
    pub model: String,
}

impl ChatSession {
    pub fn new(model: impl Into<String>) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(16);
        Self {
            id,
            model: model.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamChatRequest {
    pub id: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub system: String,
    pub temperature: f32,
    #[serde(rename = "topP")]
    pub top_p: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

impl FinishReason {
    /// Map an upstream `finishReason` value.
    pub fn from_upstream(value: &str) -> Self {
        match value {
            "length" => Self::Length,
            "content-filter" | "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
        }
    }
}

/// What the engine hands to the gateway, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Role,
    Content(String),
    Finish(FinishReason),
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let session = ChatSession::new("DeepSeek-R1");
        assert_eq!(session.id.len(), 16);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(session.id, ChatSession::new("DeepSeek-R1").id);
    }

    #[test]
    fn test_upstream_request_field_names() {
        let request = UpstreamChatRequest {
            id: "abc".to_string(),
            messages: vec![ChatMessage::new("user", "hi")],
            model: "DeepSeek-R1".to_string(),
            system: "You are a helpful assistant.".to_string(),
            temperature: 0.5,
            top_p: 0.25,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["topP"], 0.25);
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json.get("top_p").is_none());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_upstream("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_upstream("content-filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(FinishReason::from_upstream("tool-calls"), FinishReason::Stop);
        assert_eq!(FinishReason::ContentFilter.as_str(), "content_filter");
    }
}
