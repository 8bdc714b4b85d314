//! Generation client abstraction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One turn of a conversation, in the chat-completions wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A structured prompt: optional system message, earlier turns, then the
/// new user prompt. Sampling overrides fall back to the client defaults.
#[derive(Debug, Clone, Default)]
pub struct PromptRequest {
    pub system_message: Option<String>,
    pub prior_messages: Vec<ChatMessage>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Flattens the request into the ordered message list sent upstream.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.prior_messages.len() + 2);
        if let Some(system) = self.system_message.as_deref().filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::system(system));
        }
        messages.extend(self.prior_messages.iter().cloned());
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Generated text plus the provider's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Generation provider is not configured: {0}")]
    NotConfigured(String),
    #[error("Upstream returned {status}: {details}")]
    Upstream { status: u16, details: String },
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Upstream transport error: {0}")]
    Transport(String),
    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

#[async_trait::async_trait]
pub trait GenerationClient: Send + Sync {
    /// Whether the client has the credentials it needs. Checked before any
    /// quota is spent.
    fn is_configured(&self) -> bool;

    async fn generate(&self, request: PromptRequest) -> Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_ordered_system_history_prompt() {
        let request = PromptRequest {
            system_message: Some("be terse".into()),
            prior_messages: vec![
                ChatMessage::user("hi"),
                ChatMessage {
                    role: ChatRole::Assistant,
                    content: "hello".into(),
                },
            ],
            prompt: "summarise".into(),
            ..Default::default()
        };
        let messages = request.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system("be terse"));
        assert_eq!(messages[2].role, ChatRole::Assistant);
        assert_eq!(messages[3], ChatMessage::user("summarise"));
    }

    #[test]
    fn empty_system_message_is_dropped() {
        let request = PromptRequest {
            system_message: Some(String::new()),
            ..PromptRequest::new("go")
        };
        assert_eq!(request.messages(), vec![ChatMessage::user("go")]);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json["role"], "system");
        let parsed: ChatMessage =
            serde_json::from_str(r#"{"role":"assistant","content":"y"}"#).unwrap();
        assert_eq!(parsed.role, ChatRole::Assistant);
    }
}
