//! acq-pipeline command-line tool.
//!
//! Runs synthetic acquisitions through the full pipeline, inspects and
//! converts datasets, and repairs interrupted containers.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acq_pipeline::{
    config::{AcquireConfig, Cli, Command, ConvertConfig, InspectConfig, RepairConfig, StoreArgs, StoreKind},
    format::container::{repair_index_map, WriterOptions},
    open_dataset, Acquisition, DiskStore, FrameAverager, ImageCache, ImageStore, Mirror,
    MultipageOptions, MultipageStore, PipelineOptions, ProcessorChain, RamStore, StoreError,
    SummaryMetadata, SyntheticSource, DEFAULT_POLL_INTERVAL,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Acquire(config) => run_acquire(config).await,
        Command::Inspect(config) => run_inspect(config),
        Command::Convert(config) => run_convert(config),
        Command::Repair(config) => run_repair(config),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "acq_pipeline=debug"
    } else {
        "acq_pipeline=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Create the store selected on the command line.
fn build_store(args: &StoreArgs, summary: SummaryMetadata) -> Result<Arc<dyn ImageStore>, StoreError> {
    let store: Arc<dyn ImageStore> = match args.store {
        StoreKind::Ram => {
            let mut store = RamStore::new(summary).with_front_cache(args.front_cache);
            if let Some(budget) = args.ram_budget {
                store = store.with_budget(budget);
            }
            Arc::new(store)
        }
        StoreKind::Disk => {
            let root = args.output.clone().unwrap_or_default();
            Arc::new(DiskStore::create(root, summary)?)
        }
        StoreKind::Multipage => {
            let dir = args.output.clone().unwrap_or_default();
            let options = MultipageOptions {
                split_by_position: !args.single_series,
                write_metadata_file: args.metadata_file,
                writer: WriterOptions {
                    byte_order: args.byte_order.into(),
                    max_file_size: args.max_file_size,
                    ..WriterOptions::default()
                },
            };
            Arc::new(MultipageStore::create(dir, summary, options)?)
        }
    };
    Ok(store)
}

// =============================================================================
// Acquire Command
// =============================================================================

async fn run_acquire(config: AcquireConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let mut summary = SummaryMetadata::new(config.width, config.height, config.pixel_type.into())
        .with_dimensions(config.channels, config.slices, config.frames, config.positions)
        .with_prefix(config.prefix.clone());
    summary.slices_first = config.slices_first;
    summary.time_first = config.time_first;
    if let Some(comment) = &config.comment {
        summary.comment = comment.clone();
    }

    // Averaging shrinks the time axis of what reaches the store.
    let mut stored_summary = summary.clone();
    if let Some(frames) = config.average {
        stored_summary.frames = (config.frames as usize).div_ceil(frames) as u32;
    }

    let store = match build_store(&config.store, stored_summary) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create store: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let cache = Arc::new(ImageCache::new(store));

    let mut chain = ProcessorChain::new().with(Mirror::enabled(config.mirror));
    if let Some(frames) = config.average {
        chain = chain.with(FrameAverager::new(frames));
    }

    info!("Acquisition:");
    info!(
        "  Grid: {} channels x {} slices x {} frames x {} positions ({} images)",
        config.channels,
        config.slices,
        config.frames,
        config.positions,
        config.image_count()
    );
    info!("  Image: {}x{} {:?}", config.width, config.height, config.pixel_type);
    info!("  Store: {:?}", config.store.store);
    if let Some(output) = &config.store.output {
        info!("  Output: {}", output.display());
    }
    info!("  Processors: {:?}", chain.names());

    let source = SyntheticSource::new(summary).with_interval(Duration::from_millis(config.interval_ms));
    let options = PipelineOptions {
        queue_capacity: config.queue_capacity,
        poll_interval: DEFAULT_POLL_INTERVAL,
    };
    let acquisition = Acquisition::start_with(
        Box::new(source),
        chain,
        cache.clone(),
        options,
        Some(Box::new(|err: &StoreError| {
            error!("Storage full, acquisition stopped: {}", err);
        })),
    );

    let stop = acquisition.stop_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping acquisition");
            stop.stop();
        }
    });

    let report = match acquisition.wait().await {
        Ok(report) => report,
        Err(e) => {
            error!("Acquisition failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    interrupt.abort();

    info!("");
    info!("Produced: {}", report.producer.produced);
    for stage in &report.stages {
        info!(
            "  {}: {} in, {} out, {} failed",
            stage.name, stage.received, stage.emitted, stage.failed
        );
    }
    info!(
        "Stored: {} ({:.1} images/s)",
        report.sink.stored,
        report.sink.images_per_second()
    );
    let changing = cache.changing_keys();
    if !changing.is_empty() {
        info!("Changing tags: {}", changing.join(", "));
    }

    if let Err(e) = cache.close() {
        error!("Failed to close store: {}", e);
        return ExitCode::FAILURE;
    }

    if let Some(e) = &report.producer.source_error {
        error!("Source error: {}", e);
        return ExitCode::FAILURE;
    }
    if report.sink.storage_full || report.stages.iter().any(|s| s.panicked) {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    let store = match open_dataset(&config.path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let cache = ImageCache::new(store);
    let scanned = match cache.scan_tags() {
        Ok(n) => n,
        Err(e) => {
            eprintln!("Error reading images: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = cache.summary_metadata();
    if config.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Dataset: {}", config.path.display());
    println!("─────────────────");
    if !summary.prefix.is_empty() {
        println!("  Prefix: {}", summary.prefix);
    }
    println!(
        "  Image: {}x{} {}",
        summary.width,
        summary.height,
        summary.pixel_type.as_str()
    );
    println!(
        "  Grid: {} channels x {} slices x {} frames x {} positions",
        summary.channels, summary.slices, summary.frames, summary.positions
    );
    println!("  Images: {}", scanned);
    let comment = cache.comment();
    if !comment.is_empty() {
        println!("  Comment: {}", comment);
    }

    let changing = cache.changing_keys();
    if !changing.is_empty() {
        println!("  Changing tags: {}", changing.join(", "));
    }

    if config.images {
        println!();
        for coords in cache.image_keys() {
            println!("  {}", coords.label());
        }
    }

    if let Err(e) = cache.close() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Convert Command
// =============================================================================

fn run_convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let source = match open_dataset(&config.input) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };
    let target = match build_store(&config.store, source.summary_metadata()) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to create store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let cache = ImageCache::new(source.clone());
    let copied = match cache.save_as(target) {
        Ok(n) => n,
        Err(e) => {
            error!("Conversion failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Converted {} images", copied);

    for store in [source, cache.store()] {
        if let Err(e) = store.close() {
            error!("Failed to close store: {}", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

// =============================================================================
// Repair Command
// =============================================================================

fn run_repair(config: RepairConfig) -> ExitCode {
    init_logging(config.verbose);

    let mut failed = false;
    for path in &config.files {
        match repair_index_map(path) {
            Ok(report) => {
                info!("{}: recovered {} images", path.display(), report.images);
                if let Some(offset) = report.broken_at {
                    warn!("  Directory chain broken at offset {}", offset);
                }
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
