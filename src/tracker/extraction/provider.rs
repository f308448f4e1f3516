//! Core trait and types for extraction providers.

use crate::llm::LlmError;
use async_trait::async_trait;

/// What a provider is asked to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionInput {
    /// Encoded image bytes (PNG after preprocessing).
    Image { bytes: Vec<u8>, mime_type: String },
    /// Text already extracted by some earlier step.
    Text(String),
}

impl ExtractionInput {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self::Image {
            bytes,
            mime_type: "image/png".to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image { .. } => "image",
            Self::Text(_) => "text",
        }
    }
}

/// Errors raised by an extraction provider.
///
/// All of them are treated as retryable by the pipeline: the source file is
/// kept for a later attempt.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The LLM call failed (network, auth, rate limit, bad status).
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    /// The OCR engine exited unsuccessfully.
    #[error("OCR engine failed: {0}")]
    Ocr(String),

    /// The OCR engine ran but recognised nothing.
    #[error("OCR engine recognised no text")]
    NoText,

    /// The provider is missing required configuration.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// An I/O error occurred while talking to a local engine.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for extraction providers.
///
/// Implementors turn an image or a text blob plus a task prompt into the
/// provider's raw textual response. Parsing is not their concern.
#[async_trait]
pub trait ExtractionProvider: Send + Sync + std::fmt::Debug {
    /// Run one extraction and return the raw response, unparsed.
    async fn extract(&self, input: ExtractionInput, prompt: &str)
    -> Result<String, ProviderError>;

    /// Get the provider name for logging and debugging.
    fn provider_name(&self) -> &'static str;
}
