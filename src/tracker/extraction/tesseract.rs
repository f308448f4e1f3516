//! OCR-then-LLM extraction.
//!
//! The Tesseract CLI reads the (preprocessed) screenshot; the recognised text
//! is forwarded to a text-capable provider which structures it.

use super::prompt::TEXT_PROMPT;
use super::provider::{ExtractionInput, ExtractionProvider, ProviderError};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Thin wrapper over the `tesseract` executable.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    language: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }

    /// Recognise the text in an encoded image.
    pub async fn recognize(&self, image: &[u8]) -> Result<String, ProviderError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Ocr("stdin not captured".to_string()))?;
        let feed = async move {
            let written = stdin.write_all(image).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Ocr(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        written?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs OCR on images and hands the text to `structurer`. Recognised text
/// is structured with [`TEXT_PROMPT`] whatever prompt came with the image.
#[derive(Debug)]
pub struct OcrExtractor {
    ocr: TesseractOcr,
    structurer: Arc<dyn ExtractionProvider>,
}

impl OcrExtractor {
    pub fn new(ocr: TesseractOcr, structurer: Arc<dyn ExtractionProvider>) -> Self {
        Self { ocr, structurer }
    }
}

#[async_trait]
impl ExtractionProvider for OcrExtractor {
    async fn extract(
        &self,
        input: ExtractionInput,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let (text, prompt) = match input {
            ExtractionInput::Image { bytes, .. } => {
                let text = self.ocr.recognize(&bytes).await?;
                if text.trim().is_empty() {
                    return Err(ProviderError::NoText);
                }
                tracing::debug!(chars = text.len(), "OCR text recognised");
                (text, TEXT_PROMPT)
            }
            ExtractionInput::Text(text) => (text, prompt),
        };

        self.structurer
            .extract(ExtractionInput::Text(text), prompt)
            .await
    }

    fn provider_name(&self) -> &'static str {
        "Tesseract + LLM"
    }
}
