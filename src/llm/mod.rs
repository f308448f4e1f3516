//! Chat Completions client used by the extraction stage.
//!
//! This module speaks the `OpenAI` Chat Completions protocol
//! (`/v1/chat/completions`) and the compatible dialects of a few hosted
//! providers. Only single-shot, non-streaming completions are supported:
//! the pipeline needs one JSON document per screenshot, nothing more.
//!
//! # Example
//!
//! ```rust,ignore
//! use price_tracker::llm::{ChatCompletionsClient, ChatRequest, LlmSettings, Message, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o-mini".to_string(),
//!     provider: Provider::OpenAI,
//!     timeout: std::time::Duration::from_secs(60),
//! };
//! let client = ChatCompletionsClient::new(settings)?;
//! let reply = client.complete(ChatRequest::json(vec![Message::user("hi")], 100)).await?;
//! ```

pub mod chat_completions;
pub mod provider;

pub use chat_completions::{ChatCompletionsClient, ChatRequest};
pub use provider::Provider;

use std::time::Duration;

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o-mini`).
    pub model: String,
    /// Provider type (auto-detected from `base_url` if not specified).
    pub provider: Provider,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("provider", &self.provider)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Errors returned by the LLM client.
///
/// Every variant carries the provider-supplied detail when there is one.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Connection, TLS or timeout failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider rejected the credential.
    #[error("authentication failed ({status}): {detail}")]
    Auth { status: u16, detail: String },

    /// The provider throttled the request.
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },

    /// Any other non-success status.
    #[error("provider returned {status}: {detail}")]
    Api { status: u16, detail: String },

    /// The response decoded but carried no message content.
    #[error("response contained no message content")]
    EmptyResponse,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Content of the message (text or multimodal parts).
    #[serde(flatten)]
    pub content: MessageContent,
}

impl Message {
    /// A system directive.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::text(text),
        }
    }

    /// A plain-text user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::text(text),
        }
    }

    /// A multimodal user message.
    #[must_use]
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::parts(parts),
        }
    }
}

/// Message content - either simple text or multimodal parts.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content.
    Text { content: String },
    /// Multimodal content with text and image parts.
    Parts { content: Vec<ContentPart> },
}

impl MessageContent {
    /// Create simple text content.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { content: s.into() }
    }

    /// Create multimodal content from parts.
    #[must_use]
    pub fn parts(parts: Vec<ContentPart>) -> Self {
        Self::Parts { content: parts }
    }

    /// Check if this content contains any images.
    #[must_use]
    pub fn has_images(&self) -> bool {
        matches!(self, Self::Parts { content } if content.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
    }
}

/// A content part for multimodal messages.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (URL or base64 data URL).
    ImageUrl {
        /// Image URL configuration.
        image_url: ImageUrl,
    },
}

impl ContentPart {
    /// Create a text content part.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }

    /// Create an inline image part from raw bytes, encoded as a base64
    /// data URL.
    #[must_use]
    pub fn inline_image(mime_type: &str, bytes: &[u8]) -> Self {
        use base64::{Engine, engine::general_purpose::STANDARD};

        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{mime_type};base64,{}", STANDARD.encode(bytes)),
                detail: Some("high".to_string()),
            },
        }
    }
}

/// Image URL configuration for multimodal content.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ImageUrl {
    /// Image URL (can be HTTP URL or base64 data URL).
    pub url: String,
    /// Detail level for image processing: "auto", "low", or "high".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
}
