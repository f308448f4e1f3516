//! `OpenAI` Chat Completions API client.
//!
//! Single-shot requests against `/v1/chat/completions`; the assistant
//! message content is returned verbatim.

use reqwest::StatusCode;

use super::{LlmError, LlmSettings, Message};

/// One completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_mode: bool,
}

impl ChatRequest {
    /// A request expecting a JSON object back.
    #[must_use]
    pub fn json(messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            messages,
            max_tokens: Some(max_tokens),
            json_mode: true,
        }
    }
}

/// Client for the Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsClient {
    /// Create a new client with the given settings.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    /// Send `req` and return the assistant message content.
    pub async fn complete(&self, req: ChatRequest) -> Result<String, LlmError> {
        let url = self
            .settings
            .provider
            .build_chat_url(&self.settings.base_url);
        let body = self.request_body(&req);

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = req.messages.len(),
            "Sending chat completion"
        );

        let rb = self.http.post(&url).json(&body);
        let rb = self
            .settings
            .provider
            .authorize(rb, self.settings.api_key.as_deref());

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, detail));
        }

        let value: serde_json::Value = resp.json().await?;
        extract_content(&value)
    }

    fn request_body(&self, req: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": req.messages,
        });
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if req.json_mode && self.settings.provider.supports_json_mode() {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }
}

fn classify_status(status: StatusCode, detail: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
            status: status.as_u16(),
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited { detail },
        _ => LlmError::Api {
            status: status.as_u16(),
            detail,
        },
    }
}

fn extract_content(value: &serde_json::Value) -> Result<String, LlmError> {
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(ToString::to_string)
        .ok_or(LlmError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use std::time::Duration;

    fn client(provider: Provider) -> ChatCompletionsClient {
        ChatCompletionsClient::new(LlmSettings {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            provider,
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_body_carries_json_hint_and_limit() {
        let req = ChatRequest::json(vec![Message::user("x")], 1000);
        let body = client(Provider::OpenAI).request_body(&req);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_generic_provider_omits_json_hint() {
        let req = ChatRequest::json(vec![Message::user("x")], 10);
        let body = client(Provider::Generic).request_body(&req);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_extract_content() {
        let v = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"data\": []}"}}]
        });
        assert_eq!(extract_content(&v).unwrap(), "{\"data\": []}");
    }

    #[test]
    fn test_extract_content_missing() {
        let v = serde_json::json!({"choices": []});
        assert!(matches!(extract_content(&v), Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            LlmError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            LlmError::Api { status: 502, .. }
        ));
    }
}
