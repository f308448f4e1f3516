//! Price tracker daemon
//!
//! Watches the input folder and feeds every new screenshot or text dump
//! through the extraction pipeline until interrupted.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use price_tracker::config::AppConfig;
use price_tracker::telemetry;
use price_tracker::tracker::extraction::ExtractionProviderFactory;
use price_tracker::tracker::persistence::{self, PriceStoreGateway};
use price_tracker::tracker::preprocess::Preprocessor;
use price_tracker::tracker::watcher;
use price_tracker::tracker::{DispatchSettings, Dispatcher, Pipeline, PipelineSettings};

/// Capacity of the raw event channel between the watcher and the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load().and_then(|c| c.validate().map(|()| c)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(config.logging.format);

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "Startup failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!(
        name: "config.loaded",
        input_dir = %config.watch.input_dir.display(),
        output_dir = %config.watch.output_dir.display(),
        mode = ?config.extraction.mode,
        model = %config.extraction.model,
        store = ?config.store.provider,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.watch.input_dir)
        .await
        .with_context(|| format!("creating {}", config.watch.input_dir.display()))?;
    tokio::fs::create_dir_all(&config.watch.output_dir)
        .await
        .with_context(|| format!("creating {}", config.watch.output_dir.display()))?;

    let store = persistence::connect(&config.store)
        .await
        .context("connecting to the price store")?;
    let provider = ExtractionProviderFactory::create(&config.extraction)
        .context("creating the extraction provider")?;
    info!(provider = provider.provider_name(), "Extraction provider ready");

    let pipeline = Arc::new(Pipeline::new(
        Preprocessor::new(config.preprocess.settings()),
        provider,
        PriceStoreGateway::new(store),
        PipelineSettings::from_config(&config),
    ));
    let dispatcher = Dispatcher::new(
        pipeline,
        DispatchSettings {
            settle_delay: config.watch.settle_delay(),
            workers: config.watch.worker_count(),
            queue_depth: config.watch.queue_depth,
        },
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    // Start watching before the sweep so nothing dropped in between is missed.
    let folder_watch = watcher::watch(&config.watch.input_dir, tx.clone())
        .context("starting the folder watcher")?;

    let cancel = CancellationToken::new();
    let dispatch = tokio::spawn(dispatcher.run(rx, cancel.clone()));

    if config.watch.sweep_on_start {
        for event in watcher::sweep(&config.watch.input_dir, &config.watch.output_dir) {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
    drop(tx);

    tokio::signal::ctrl_c()
        .await
        .context("listening for the interrupt signal")?;
    info!(name: "shutdown.requested", "Interrupt received; finishing in-flight files");

    drop(folder_watch);
    cancel.cancel();
    let summary = dispatch.await.context("dispatcher task panicked")?;

    info!(
        name: "shutdown.complete",
        archived = summary.archived,
        failed = summary.failed,
        "Shut down cleanly"
    );
    Ok(())
}
