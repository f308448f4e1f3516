//! Vision-capable LLM extraction provider.
//!
//! Images are sent inline as base64 data URLs next to the task prompt; text
//! input is sent as the user message with the prompt as system directive.
//! Calls are throttled by a shared rate limiter so a burst of screenshots
//! waits for permits instead of collecting 429s.

use super::prompt::JSON_ONLY_SYSTEM;
use super::provider::{ExtractionInput, ExtractionProvider, ProviderError};
use crate::llm::{ChatCompletionsClient, ChatRequest, ContentPart, Message};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Extraction provider backed by a Chat Completions model.
pub struct LlmExtractor {
    client: ChatCompletionsClient,
    limiter: DefaultDirectRateLimiter,
    max_tokens: u32,
}

impl std::fmt::Debug for LlmExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmExtractor")
            .field("client", &self.client)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl LlmExtractor {
    /// Upper bound on the random delay added after a permit is granted.
    const JITTER: Duration = Duration::from_millis(250);

    pub fn new(client: ChatCompletionsClient, requests_per_minute: NonZeroU32, max_tokens: u32) -> Self {
        Self {
            client,
            limiter: RateLimiter::direct(Quota::per_minute(requests_per_minute)),
            max_tokens,
        }
    }

    fn messages(input: ExtractionInput, prompt: &str) -> Vec<Message> {
        match input {
            ExtractionInput::Image { bytes, mime_type } => vec![
                Message::system(JSON_ONLY_SYSTEM),
                Message::user_parts(vec![
                    ContentPart::text(prompt),
                    ContentPart::inline_image(&mime_type, &bytes),
                ]),
            ],
            ExtractionInput::Text(text) => vec![Message::system(prompt), Message::user(text)],
        }
    }
}

#[async_trait]
impl ExtractionProvider for LlmExtractor {
    async fn extract(
        &self,
        input: ExtractionInput,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let kind = input.kind();
        self.limiter
            .until_ready_with_jitter(Jitter::up_to(Self::JITTER))
            .await;

        let request = ChatRequest::json(Self::messages(input, prompt), self.max_tokens);
        let raw = self.client.complete(request).await?;

        tracing::debug!(
            input = kind,
            response_len = raw.len(),
            "Extraction response received"
        );
        Ok(raw)
    }

    fn provider_name(&self) -> &'static str {
        "LLM vision"
    }
}
