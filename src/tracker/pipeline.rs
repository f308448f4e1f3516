//! Per-file processing: quarantine, preprocess, extract, parse, persist,
//! then archive or fail.
//!
//! A file's stages run strictly in sequence. [`Pipeline::handle`] is the only
//! place that decides what happens to the file on disk afterwards.

use super::domain::{FileKind, WatchedFile};
use super::extraction::prompt::{IMAGE_PROMPT, TEXT_PROMPT};
use super::extraction::{ExtractionInput, ExtractionProvider, ProviderError};
use super::parser::{self, ParseError, ParseOutcome};
use super::persistence::{PriceStoreGateway, UpsertReport};
use super::preprocess::{PreprocessError, Preprocessor};
use crate::config::AppConfig;
use chrono::Utc;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

// =============================================================================
// States and stages
// =============================================================================

/// Step of the per-file pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Quarantine,
    Preprocess,
    Extract,
    Parse,
    Persist,
    Archive,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quarantine => "quarantine",
            Self::Preprocess => "preprocess",
            Self::Extract => "extract",
            Self::Parse => "parse",
            Self::Persist => "persist",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a watched file.
///
/// `Detected -> Quarantined -> Processing -> {Archived | Failed}`. Only a
/// fully successful run reaches `Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Detected,
    Quarantined,
    Processing(Stage),
    Archived,
    Failed(Stage),
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detected => f.write_str("detected"),
            Self::Quarantined => f.write_str("quarantined"),
            Self::Processing(stage) => write!(f, "processing:{stage}"),
            Self::Archived => f.write_str("archived"),
            Self::Failed(stage) => write!(f, "failed:{stage}"),
        }
    }
}

pub(crate) fn log_transition(file: &WatchedFile, state: FileState) {
    info!(
        name: "file.transition",
        path = %file.current.display(),
        original = %file.original_name(),
        state = %state,
        "File state changed"
    );
}

// =============================================================================
// Errors
// =============================================================================

/// Why a stage failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineErrorKind {
    /// The image could not be decoded.
    #[error("undecodable image: {0}")]
    Decode(#[source] PreprocessError),

    /// The cleaned image could not be encoded for the provider.
    #[error("could not encode preprocessed image: {0}")]
    Encode(#[source] PreprocessError),

    /// The extraction provider failed.
    #[error("extraction provider failed: {0}")]
    Provider(#[source] ProviderError),

    /// The provider answered with something other than the contract.
    #[error("malformed provider response: {source}")]
    Malformed { source: ParseError, raw: String },

    /// Some records could not be stored. The others are kept.
    #[error(
        "{} of {} records failed to persist",
        .0.failures().count(),
        .0.outcomes.len()
    )]
    PartialPersistence(UpsertReport),

    /// Filesystem error on the watched file or an output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PreprocessError> for PipelineErrorKind {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::Decode(_) => Self::Decode(err),
            PreprocessError::Encode(_) => Self::Encode(err),
        }
    }
}

/// A failed stage, with its cause.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {kind}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub kind: PipelineErrorKind,
}

impl PipelineError {
    pub fn new(stage: Stage, kind: impl Into<PipelineErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    /// Whether leaving the file for a later run can succeed.
    ///
    /// Decode errors and malformed responses are deterministic for a given
    /// input; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            PipelineErrorKind::Decode(_) | PipelineErrorKind::Malformed { .. }
        )
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Filesystem-facing settings of the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_dir: PathBuf,
    /// Dead-letter folder for non-retryable failures.
    pub failed_dir: Option<PathBuf>,
    /// Receives one PNG per preprocessing step when set.
    pub debug_dir: Option<PathBuf>,
    pub preprocess_enabled: bool,
    pub retain_text_sources: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            output_dir: config.watch.output_dir.clone(),
            failed_dir: config.watch.failed_dir.clone(),
            debug_dir: config.preprocess.debug_dir.clone(),
            preprocess_enabled: config.preprocess.enabled,
            retain_text_sources: config.watch.retain_text_sources,
        }
    }
}

/// Summary of an archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub recorded: usize,
    pub skipped: usize,
    pub created_resources: usize,
}

/// Drives one file through every stage.
#[derive(Debug)]
pub struct Pipeline {
    preprocessor: Preprocessor,
    provider: Arc<dyn ExtractionProvider>,
    gateway: PriceStoreGateway,
    settings: PipelineSettings,
    /// Serializes canonical-name selection so two workers never pick the
    /// same target.
    quarantine_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        preprocessor: Preprocessor,
        provider: Arc<dyn ExtractionProvider>,
        gateway: PriceStoreGateway,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            preprocessor,
            provider,
            gateway,
            settings,
            quarantine_lock: Mutex::new(()),
        }
    }

    /// Process one detected file to completion and return its final state.
    pub async fn handle(&self, mut file: WatchedFile) -> FileState {
        if let Err(e) = self.quarantine(&mut file).await {
            return self.fail(&file, &e).await;
        }
        log_transition(&file, FileState::Quarantined);

        match self.process(&file).await {
            Ok(report) => {
                metrics::counter!("tracker_files_total", "outcome" => "archived").increment(1);
                log_transition(&file, FileState::Archived);
                info!(
                    original = %file.original_name(),
                    recorded = report.recorded,
                    skipped = report.skipped,
                    created_resources = report.created_resources,
                    "File archived"
                );
                FileState::Archived
            }
            Err(e) => self.fail(&file, &e).await,
        }
    }

    /// Rename the file to a canonical, collision-free name in its folder.
    pub async fn quarantine(&self, file: &mut WatchedFile) -> Result<(), PipelineError> {
        let _guard = self.quarantine_lock.lock().await;

        let dir = file
            .current
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let ext = match file.kind {
            FileKind::Image => file
                .current
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_else(|| "png".to_string()),
            FileKind::Text => "txt".to_string(),
        };
        let stem = format!(
            "{}_{}",
            file.kind.canonical_prefix(),
            Utc::now().format("%Y%m%d_%H%M%S_%3f")
        );
        let target = unique_path(&dir, &stem, &ext)
            .await
            .map_err(|e| PipelineError::new(Stage::Quarantine, e))?;

        tokio::fs::rename(&file.current, &target)
            .await
            .map_err(|e| PipelineError::new(Stage::Quarantine, e))?;
        debug!(from = %file.current.display(), to = %target.display(), "Quarantined file");
        file.current = target;
        Ok(())
    }

    /// Run every stage for an already quarantined file. On success the
    /// source has been archived.
    pub async fn process(&self, file: &WatchedFile) -> Result<FileReport, PipelineError> {
        match file.kind {
            FileKind::Image => self.process_image(file).await,
            FileKind::Text => self.process_text(file).await,
        }
    }

    async fn process_image(&self, file: &WatchedFile) -> Result<FileReport, PipelineError> {
        log_transition(file, FileState::Processing(Stage::Preprocess));
        let bytes = tokio::fs::read(&file.current)
            .await
            .map_err(|e| PipelineError::new(Stage::Preprocess, e))?;
        let input = self.prepare_image(file, bytes).await?;

        log_transition(file, FileState::Processing(Stage::Extract));
        let raw = self
            .provider
            .extract(input, IMAGE_PROMPT)
            .await
            .map_err(|e| PipelineError::new(Stage::Extract, PipelineErrorKind::Provider(e)))?;

        let report = self.parse_and_persist(file, &raw).await?;

        log_transition(file, FileState::Processing(Stage::Archive));
        tokio::fs::remove_file(&file.current)
            .await
            .map_err(|e| PipelineError::new(Stage::Archive, e))?;
        Ok(report)
    }

    async fn process_text(&self, file: &WatchedFile) -> Result<FileReport, PipelineError> {
        log_transition(file, FileState::Processing(Stage::Extract));
        let text = tokio::fs::read_to_string(&file.current)
            .await
            .map_err(|e| PipelineError::new(Stage::Extract, e))?;
        let raw = self
            .provider
            .extract(ExtractionInput::Text(text), TEXT_PROMPT)
            .await
            .map_err(|e| PipelineError::new(Stage::Extract, PipelineErrorKind::Provider(e)))?;

        // Written before parsing so the raw answer survives a parse failure.
        let artifact = self.settings.output_dir.join(file.analysis_name());
        write_file(&artifact, raw.as_bytes())
            .await
            .map_err(|e| PipelineError::new(Stage::Extract, e))?;
        debug!(artifact = %artifact.display(), "Wrote analysis artifact");

        let report = self.parse_and_persist(file, &raw).await?;

        // The observations are committed and the artifact marks the file as
        // analysed, so a source left behind here must not fail the file.
        log_transition(file, FileState::Processing(Stage::Archive));
        let archived = if self.settings.retain_text_sources {
            restore_original(file).await.map(|_| ())
        } else {
            tokio::fs::remove_file(&file.current).await
        };
        if let Err(e) = archived {
            warn!(
                path = %file.current.display(),
                original = %file.original_name(),
                error = %e,
                "Could not archive text source; it keeps its quarantine name"
            );
        }
        Ok(report)
    }

    async fn prepare_image(
        &self,
        file: &WatchedFile,
        bytes: Vec<u8>,
    ) -> Result<ExtractionInput, PipelineError> {
        if !self.settings.preprocess_enabled {
            let mime_type = mime_guess::from_path(&file.current)
                .first_or_octet_stream()
                .to_string();
            return Ok(ExtractionInput::Image { bytes, mime_type });
        }

        let preprocessor = self.preprocessor;
        let with_stages = self.settings.debug_dir.is_some();
        let mut stages = tokio::task::spawn_blocking(move || {
            if with_stages {
                preprocessor.preprocess_with_stages(&bytes)
            } else {
                preprocessor.preprocess(&bytes).map(|png| {
                    vec![super::preprocess::PreprocessStage {
                        name: "denoised",
                        png,
                    }]
                })
            }
        })
        .await
        .map_err(|e| PipelineError::new(Stage::Preprocess, std::io::Error::other(e)))?
        .map_err(|e| PipelineError::new(Stage::Preprocess, e))?;

        if let Some(debug_dir) = &self.settings.debug_dir {
            let stem = file
                .current
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            for stage in &stages {
                let path = debug_dir.join(format!("{stem}_{}.png", stage.name));
                if let Err(e) = write_file(&path, &stage.png).await {
                    warn!(path = %path.display(), error = %e, "Failed to write preprocessing diagnostic");
                }
            }
        }

        let clean = stages
            .pop()
            .map(|s| s.png)
            .ok_or_else(|| PipelineError::new(Stage::Preprocess, std::io::Error::other("no output image")))?;
        Ok(ExtractionInput::png(clean))
    }

    async fn parse_and_persist(
        &self,
        file: &WatchedFile,
        raw: &str,
    ) -> Result<FileReport, PipelineError> {
        log_transition(file, FileState::Processing(Stage::Parse));
        let outcome = match parser::parse(raw) {
            Ok(outcome) => outcome,
            Err(source) => {
                warn!(
                    path = %file.current.display(),
                    error = %source,
                    raw_payload = %raw,
                    "Provider returned a malformed payload"
                );
                return Err(PipelineError::new(
                    Stage::Parse,
                    PipelineErrorKind::Malformed {
                        source,
                        raw: raw.to_string(),
                    },
                ));
            }
        };
        record_parse_metrics(&outcome);
        if outcome.records.is_empty() {
            warn!(path = %file.current.display(), skipped = outcome.skipped(), "Payload contained no usable records");
        }

        log_transition(file, FileState::Processing(Stage::Persist));
        let report = self.gateway.upsert_and_record(&outcome.records).await;
        if !report.is_complete() {
            return Err(PipelineError::new(
                Stage::Persist,
                PipelineErrorKind::PartialPersistence(report),
            ));
        }

        Ok(FileReport {
            recorded: report.recorded(),
            skipped: outcome.skipped(),
            created_resources: report.created_resources(),
        })
    }

    /// Leave the file for a later run, or dead-letter it when retrying
    /// cannot help.
    async fn fail(&self, file: &WatchedFile, err: &PipelineError) -> FileState {
        metrics::counter!("tracker_files_total", "outcome" => "failed").increment(1);
        error!(
            name: "file.failed",
            path = %file.current.display(),
            original = %file.original_name(),
            stage = %err.stage,
            retryable = err.is_retryable(),
            error = %err,
            "File processing failed"
        );

        if file.kind == FileKind::Text
            && err.is_retryable()
            && matches!(err.stage, Stage::Parse | Stage::Persist)
        {
            self.set_aside_artifact(file).await;
        }

        let disposed = match (&self.settings.failed_dir, err.is_retryable()) {
            (Some(failed_dir), false) => dead_letter(file, failed_dir).await,
            _ => restore_original(file).await,
        };
        match disposed {
            Ok(path) => info!(path = %path.display(), "Failed file left for replay"),
            Err(e) => warn!(
                path = %file.current.display(),
                error = %e,
                "Could not move failed file; it keeps its quarantine name"
            ),
        }

        let state = FileState::Failed(err.stage);
        log_transition(file, state);
        state
    }

    /// Move the analysis artifact out of the way so the startup sweep picks
    /// the text file up again. The raw answer is kept under the failed name.
    async fn set_aside_artifact(&self, file: &WatchedFile) {
        let artifact = self.settings.output_dir.join(file.analysis_name());
        let target = self.settings.output_dir.join(file.failed_analysis_name());
        match tokio::fs::rename(&artifact, &target).await {
            Ok(()) => debug!(artifact = %target.display(), "Set aside analysis artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                artifact = %artifact.display(),
                error = %e,
                "Could not set aside analysis artifact; the file will not be swept again"
            ),
        }
    }
}

fn record_parse_metrics(outcome: &ParseOutcome) {
    metrics::counter!("tracker_records_parsed_total").increment(outcome.records.len() as u64);
    if outcome.skipped_missing_name > 0 {
        metrics::counter!("tracker_records_skipped_total", "reason" => "missing_name")
            .increment(outcome.skipped_missing_name as u64);
    }
    if outcome.skipped_bad_price > 0 {
        metrics::counter!("tracker_records_skipped_total", "reason" => "bad_price")
            .increment(outcome.skipped_bad_price as u64);
    }
}

/// First `<dir>/<stem>[_n].<ext>` that does not exist yet.
async fn unique_path(dir: &Path, stem: &str, ext: &str) -> std::io::Result<PathBuf> {
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut n = 1u32;
    while tokio::fs::try_exists(&candidate).await? {
        candidate = dir.join(format!("{stem}_{n}.{ext}"));
        n += 1;
    }
    Ok(candidate)
}

async fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

/// Rename a quarantined file back to the name its producer gave it.
async fn restore_original(file: &WatchedFile) -> std::io::Result<PathBuf> {
    if file.current == file.original {
        return Ok(file.current.clone());
    }
    if tokio::fs::try_exists(&file.original).await? {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} was recreated meanwhile", file.original.display()),
        ));
    }
    tokio::fs::rename(&file.current, &file.original).await?;
    Ok(file.original.clone())
}

async fn dead_letter(file: &WatchedFile, failed_dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(failed_dir).await?;
    let name = Path::new(&file.original_name()).to_path_buf();
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = unique_path(failed_dir, &stem, &ext).await?;
    tokio::fs::rename(&file.current, &target).await?;
    Ok(target)
}
