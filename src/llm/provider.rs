//! Provider-specific URL and authentication handling.
//!
//! All supported providers accept the Chat Completions request body; they
//! differ in where the endpoint lives and how the key is presented.

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name (required for Azure)
        deployment_name: String,
        /// API version (e.g., "2024-08-01-preview")
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Generic OpenAI-compatible provider (Ollama, vLLM, LM Studio...)
    Generic,
}

impl Provider {
    /// Azure API version used when none is configured.
    pub const DEFAULT_AZURE_API_VERSION: &'static str = "2024-08-01-preview";

    /// Detect provider from base URL.
    #[must_use]
    pub fn detect_from_url(base_url: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("azure.com") {
            Self::AzureOpenAI {
                deployment_name: String::new(),
                api_version: Self::DEFAULT_AZURE_API_VERSION.to_string(),
            }
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    /// Fill in the Azure deployment details, leaving other providers as-is.
    #[must_use]
    pub fn with_azure_deployment(self, deployment: Option<&str>, api_version: Option<&str>) -> Self {
        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version: detected_version,
            } => Self::AzureOpenAI {
                deployment_name: deployment.map_or(deployment_name, str::to_string),
                api_version: api_version.map_or(detected_version, str::to_string),
            },
            other => other,
        }
    }

    /// Whether `response_format: {"type": "json_object"}` is honoured.
    ///
    /// Generic servers vary; sending the hint to one that rejects unknown
    /// fields fails the whole request.
    #[must_use]
    pub fn supports_json_mode(&self) -> bool {
        !matches!(self, Self::Generic)
    }

    /// Build the chat completions URL for this provider.
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => {
                format!(
                    "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
                )
            }
            Self::OpenRouter if base.ends_with("/api") => format!("{base}/v1/chat/completions"),
            Self::OpenRouter => format!("{base}/api/v1/chat/completions"),
            Self::Groq if base.ends_with("/openai") => format!("{base}/v1/chat/completions"),
            Self::Groq => format!("{base}/openai/v1/chat/completions"),
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Attach the credential the way this provider expects it.
    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match (self, api_key) {
            (_, None) => request,
            (Self::AzureOpenAI { .. }, Some(key)) => request.header("api-key", key),
            (_, Some(key)) => request.bearer_auth(key),
        }
    }
}
