//! Factory for creating extraction providers based on configuration.

use super::provider::{ExtractionProvider, ProviderError};
use super::tesseract::{OcrExtractor, TesseractOcr};
use super::vision::LlmExtractor;
use crate::config::{ExtractionConfig, ExtractionMode};
use crate::llm::ChatCompletionsClient;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Factory for creating extraction providers based on configuration.
#[derive(Debug)]
pub struct ExtractionProviderFactory;

impl ExtractionProviderFactory {
    /// Build the provider selected by `config.mode`.
    ///
    /// - `vision`: images go straight to the model.
    /// - `ocr`: images go through Tesseract first; the model only sees text.
    ///
    /// Both share one rate-limited LLM client.
    pub fn create(config: &ExtractionConfig) -> Result<Arc<dyn ExtractionProvider>, ProviderError> {
        let settings = config.llm_settings();
        let rate = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            ProviderError::NotConfigured("requests_per_minute must be non-zero".to_string())
        })?;
        let client = ChatCompletionsClient::new(settings)?;
        let llm: Arc<dyn ExtractionProvider> =
            Arc::new(LlmExtractor::new(client, rate, config.max_tokens));

        match config.mode {
            ExtractionMode::Vision => {
                tracing::info!(model = %config.model, "Using vision model for extraction");
                Ok(llm)
            }
            ExtractionMode::Ocr => {
                tracing::info!(
                    model = %config.model,
                    tesseract = %config.tesseract_cmd,
                    language = %config.ocr_language,
                    "Using Tesseract OCR + text model for extraction"
                );
                let ocr = TesseractOcr::new(&config.tesseract_cmd, &config.ocr_language);
                Ok(Arc::new(OcrExtractor::new(ocr, llm)))
            }
        }
    }
}
