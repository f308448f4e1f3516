//! Screenshot price ingestion.
//!
//! # Modules
//!
//! - [`domain`]: resources, observations and the values flowing between stages
//! - [`preprocess`]: grayscale, binarize and denoise screenshots
//! - [`extraction`]: vision-LLM and OCR providers
//! - [`parser`]: validate the provider's JSON answer
//! - [`persistence`]: get-or-create resources and append price observations
//! - [`pipeline`]: per-file state machine
//! - [`watcher`] and [`dispatch`]: folder events feeding a bounded worker pool

pub mod dispatch;
pub mod domain;
pub mod extraction;
pub mod parser;
pub mod persistence;
pub mod pipeline;
pub mod preprocess;
pub mod watcher;

pub use dispatch::{DispatchSettings, DispatchSummary, Dispatcher};
pub use pipeline::{FileState, Pipeline, PipelineError, PipelineErrorKind, PipelineSettings, Stage};
