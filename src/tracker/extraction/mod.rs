//! Extraction providers: turn a screenshot or a text dump into the model's
//! raw JSON answer.
//!
//! # Providers
//!
//! - [`LlmExtractor`] - Chat Completions vision model (images inline as data URLs)
//! - [`OcrExtractor`] - Tesseract CLI followed by a text model
//!
//! The output contract both are asked for lives in [`prompt`].

mod factory;
pub mod prompt;
mod provider;
mod tesseract;
mod vision;

pub use factory::ExtractionProviderFactory;
pub use provider::{ExtractionInput, ExtractionProvider, ProviderError};
pub use tesseract::{OcrExtractor, TesseractOcr};
pub use vision::LlmExtractor;
