use crate::llm::{LlmSettings, Provider};
use crate::tracker::preprocess::PreprocessSettings;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment prefix for every config key, e.g. `PRICE_TRACKER_WATCH__INPUT_DIR`.
pub const ENV_PREFIX: &str = "PRICE_TRACKER";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Folder receiving screenshots and text dumps
    #[arg(long, env = "INPUT_FOLDER")]
    pub input_dir: Option<String>,

    /// Folder receiving `*_analysis.txt` artifacts
    #[arg(long, env = "OUTPUT_FOLDER")]
    pub output_dir: Option<String>,

    /// Number of files processed concurrently
    #[arg(long)]
    pub workers: Option<usize>,

    /// Extraction mode: `vision` or `ocr`
    #[arg(long)]
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub watch: WatchConfig,
    pub preprocess: PreprocessConfig,
    pub extraction: ExtractionConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Dead-letter folder for files that will never succeed as-is.
    pub failed_dir: Option<PathBuf>,
    pub settle_delay_ms: u64,
    /// `0` picks the CPU count, capped at 4.
    pub workers: usize,
    pub queue_depth: usize,
    pub sweep_on_start: bool,
    pub retain_text_sources: bool,
}

impl WatchConfig {
    const MAX_AUTO_WORKERS: usize = 4;

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().clamp(1, Self::MAX_AUTO_WORKERS),
            n => n,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessConfig {
    pub enabled: bool,
    pub threshold: u8,
    pub denoise_radius: u32,
    /// Where to write intermediate images, if anywhere.
    pub debug_dir: Option<PathBuf>,
}

impl PreprocessConfig {
    pub fn settings(&self) -> PreprocessSettings {
        PreprocessSettings {
            threshold: self.threshold,
            denoise_radius: self.denoise_radius,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Send the screenshot straight to a vision model.
    Vision,
    /// Tesseract first, then a text model.
    Ocr,
}

#[derive(Deserialize, Clone)]
pub struct ExtractionConfig {
    pub mode: ExtractionMode,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
    pub tesseract_cmd: String,
    pub ocr_language: String,
    pub azure_deployment: Option<String>,
    pub azure_api_version: Option<String>,
}

impl std::fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("mode", &self.mode)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout_secs", &self.timeout_secs)
            .field("tesseract_cmd", &self.tesseract_cmd)
            .field("ocr_language", &self.ocr_language)
            .finish_non_exhaustive()
    }
}

impl ExtractionConfig {
    pub fn llm_settings(&self) -> LlmSettings {
        let provider = Provider::detect_from_url(&self.base_url).with_azure_deployment(
            self.azure_deployment.as_deref(),
            self.azure_api_version.as_deref(),
        );

        LlmSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: self.model.clone(),
            provider,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    /// Process-local; nothing survives a restart.
    Memory,
    Surreal,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub provider: StoreProvider,
    pub url: String,
    pub namespace: String,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("watch.input_dir", "./images")?
            .set_default("watch.output_dir", "./responses")?
            .set_default("watch.settle_delay_ms", 1000)?
            .set_default("watch.workers", 2)?
            .set_default("watch.queue_depth", 64)?
            .set_default("watch.sweep_on_start", true)?
            .set_default("watch.retain_text_sources", true)?
            .set_default("preprocess.enabled", true)?
            .set_default(
                "preprocess.threshold",
                i64::from(PreprocessSettings::DEFAULT_THRESHOLD),
            )?
            .set_default(
                "preprocess.denoise_radius",
                i64::from(PreprocessSettings::DEFAULT_DENOISE_RADIUS),
            )?
            .set_default("extraction.mode", "vision")?
            .set_default("extraction.base_url", "https://api.openai.com")?
            .set_default("extraction.model", "gpt-4o-mini")?
            .set_default("extraction.max_tokens", 1000)?
            .set_default("extraction.requests_per_minute", 30)?
            .set_default("extraction.timeout_secs", 60)?
            .set_default("extraction.tesseract_cmd", "tesseract")?
            .set_default("extraction.ocr_language", "fra")?
            .set_default("store.provider", "surreal")?
            .set_default("store.url", "ws://localhost:8000")?
            .set_default("store.namespace", "price_tracker")?
            .set_default("store.database", "price_tracker")?
            .set_default("logging.format", "compact")?;

        // The conventional OpenAI variable counts as a default credential so
        // that file and prefixed env values still win over it.
        if let Ok(key) = env::var("OPENAI_API_KEY") {
            builder = builder.set_default("extraction.api_key", key)?;
        }

        // 2. Config file: explicit path, else ./config.{yaml,toml,json} if present
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // 3. Environment Variables, e.g. PRICE_TRACKER_WATCH__SETTLE_DELAY_MS=250
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI overrides
        if let Some(dir) = cli.input_dir {
            builder = builder.set_override("watch.input_dir", dir)?;
        }
        if let Some(dir) = cli.output_dir {
            builder = builder.set_override("watch.output_dir", dir)?;
        }
        if let Some(workers) = cli.workers {
            builder = builder.set_override("watch.workers", workers as u64)?;
        }
        if let Some(mode) = cli.mode {
            builder = builder.set_override("extraction.mode", mode)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.extraction.llm_settings().api_key.is_none()
            && Provider::detect_from_url(&self.extraction.base_url) != Provider::Generic
        {
            return Err(config::ConfigError::Message(
                "missing extraction API key: set OPENAI_API_KEY or extraction.api_key".to_string(),
            ));
        }
        if self.watch.queue_depth == 0 {
            return Err(config::ConfigError::Message(
                "watch.queue_depth must be greater than zero".to_string(),
            ));
        }
        if self.extraction.requests_per_minute == 0 {
            return Err(config::ConfigError::Message(
                "extraction.requests_per_minute must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
