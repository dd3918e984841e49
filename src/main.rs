use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use eventshot_processor::cli::{Args, EnhanceModeArg, WatermarkPositionArg};
use eventshot_processor::dispatch::CaptureDispatcher;
use eventshot_processor::image_processing::crop::CropSettings;
use eventshot_processor::image_processing::enhance::{EnhanceMode, EnhancementPolicy};
use eventshot_processor::image_processing::face_detect::{
    FaceLocator, NullLocator, SeetaFaceLocator,
};
use eventshot_processor::image_processing::watermark::{HorizontalPosition, WatermarkSettings};
use eventshot_processor::image_processing::{PipelineConfig, ProcessingEngine};
use eventshot_processor::remote::{
    EnhancerSettings, GalleryClient, HttpEnhancer, RemoteEnhancer, UnavailableEnhancer,
    UploadMetadata, UploadSink,
};
use eventshot_processor::utils::{
    create_progress_bar, format_duration, validate_inputs, verbose_println,
};
use eventshot_processor::watcher::FolderWatcher;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_RETRIES: u32 = 3;
const WATCH_STATS_INTERVAL: Duration = Duration::from_secs(60);

fn enhance_mode_from_arg(arg: EnhanceModeArg) -> EnhanceMode {
    match arg {
        EnhanceModeArg::Disabled => EnhanceMode::Disabled,
        EnhanceModeArg::Traditional => EnhanceMode::TraditionalOnly,
        EnhanceModeArg::Ai => EnhanceMode::AiOnly,
        EnhanceModeArg::Auto => EnhanceMode::AutoWithFallback,
    }
}

fn position_from_arg(arg: WatermarkPositionArg) -> HorizontalPosition {
    match arg {
        WatermarkPositionArg::Left => HorizontalPosition::Left,
        WatermarkPositionArg::Center => HorizontalPosition::Center,
        WatermarkPositionArg::Right => HorizontalPosition::Right,
    }
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let (portrait_ratio, landscape_ratio) =
        args.parse_crop_ratios().map_err(|e| anyhow::anyhow!(e))?;
    let min_resolution = args.parse_min_resolution().map_err(|e| anyhow::anyhow!(e))?;

    Ok(PipelineConfig {
        output_dir: args.output_dir.clone(),
        extensions: args.parse_extensions(),
        enhance: EnhancementPolicy {
            mode: enhance_mode_from_arg(args.enhance_mode),
            fallback_allowed: !args.no_ai_fallback,
            skip_on_failure: args.skip_on_failure,
        },
        face_padding: args.face_padding,
        lut_path: args.lut_path.clone(),
        lut_intensity: args.lut_intensity,
        crop: CropSettings {
            portrait_ratio,
            landscape_ratio,
            min_resolution,
        },
        watermark_path: args.watermark_path.clone(),
        watermark: WatermarkSettings {
            size_ratio: args.watermark_size_ratio,
            horizontal: position_from_arg(args.watermark_position),
            vertical: args.watermark_vertical,
            opacity: args.watermark_opacity,
        },
        jpeg_quality: args.jpeg_quality,
        parallel_jobs: if args.jobs == 0 {
            num_cpus::get()
        } else {
            args.jobs
        },
        verbose: args.verbose,
    })
}

fn build_locator(args: &Args) -> Result<Box<dyn FaceLocator>> {
    match &args.face_model {
        Some(model_path) => {
            let locator = SeetaFaceLocator::from_model_file(model_path, args.min_face_size)
                .with_context(|| format!("Failed to load face model: {:?}", model_path))?;
            Ok(Box::new(locator))
        }
        None => {
            warn!("no face model configured; face protection disabled");
            Ok(Box::new(NullLocator))
        }
    }
}

fn build_remote(args: &Args) -> Result<Arc<dyn RemoteEnhancer>> {
    match &args.ai_endpoint {
        Some(endpoint) => {
            let max_resolution = args
                .parse_ai_max_resolution()
                .map_err(|e| anyhow::anyhow!(e))?;
            let enhancer = HttpEnhancer::new(EnhancerSettings {
                endpoint: endpoint.clone(),
                retry_attempts: args.ai_retries,
                timeout: Duration::from_secs(args.ai_timeout),
                max_resolution,
            })
            .map_err(|e| anyhow::anyhow!("{}", e))?;
            Ok(Arc::new(enhancer))
        }
        None => Ok(Arc::new(UnavailableEnhancer)),
    }
}

fn build_uploader(args: &Args) -> Result<Option<Arc<dyn UploadSink>>> {
    let (Some(url), Some(event_id)) = (&args.upload_url, &args.event_id) else {
        return Ok(None);
    };

    let metadata = UploadMetadata {
        event_id: event_id.clone(),
        uploader_name: args.uploader_name.clone(),
        album_name: args.album_name.clone(),
        source: "tethered".to_string(),
    };
    let client = GalleryClient::new(url.clone(), metadata, UPLOAD_TIMEOUT, UPLOAD_RETRIES)
        .context("Failed to build gallery upload client")?;
    Ok(Some(Arc::new(client)))
}

fn run_watch_mode(args: &Args, engine: ProcessingEngine) -> Result<()> {
    let watch_dir = args
        .watch_dir
        .clone()
        .context("watch mode requires --watch <DIR>")?;

    let extensions = engine.config().extensions.clone();
    let worker_count = engine.config().parallel_jobs;
    let dispatcher = CaptureDispatcher::new(Arc::new(engine), worker_count, worker_count * 8);

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Shutdown requested, finishing in-flight captures...");
        running_handler.store(false, Ordering::SeqCst);
    })
    .context("Failed to install shutdown handler")?;

    println!(
        "{}",
        style(format!("Watching: {}", watch_dir.display())).bold()
    );
    println!("{}", style("Press Ctrl-C to stop").dim());
    println!();

    let mut watcher = FolderWatcher::new(
        watch_dir,
        extensions,
        Duration::from_secs(args.poll_interval),
    );
    watcher.run(&dispatcher, &running, WATCH_STATS_INTERVAL);

    let stats = dispatcher.stats();
    let report = dispatcher.shutdown(Duration::from_secs(args.shutdown_grace));
    let snapshot = stats.snapshot();

    println!();
    println!("{}", style("Session Summary:").bold().green());
    println!("  Captured: {}", style(snapshot.captured).bold().cyan());
    println!("  Processed: {}", style(snapshot.processed).bold().green());
    if snapshot.errored > 0 {
        println!("  Failed: {}", style(snapshot.errored).bold().red());
    }
    if snapshot.uploaded > 0 || snapshot.upload_failed > 0 {
        println!("  Uploaded: {}", style(snapshot.uploaded).bold().green());
        if snapshot.upload_failed > 0 {
            println!(
                "  Upload failures (journaled): {}",
                style(snapshot.upload_failed).bold().yellow()
            );
        }
    }
    if snapshot.duplicates > 0 {
        println!(
            "  Duplicates skipped: {}",
            style(snapshot.duplicates).dim()
        );
    }
    if !report.clean {
        println!(
            "  {}",
            style(format!(
                "{} capture(s) abandoned at shutdown",
                report.abandoned
            ))
            .bold()
            .yellow()
        );
    }

    Ok(())
}

fn run_batch_mode(args: &Args, engine: ProcessingEngine) -> Result<()> {
    let start_time = Instant::now();

    let image_files = engine.discover_images(&args.input_paths)?;
    if image_files.is_empty() {
        println!(
            "{}",
            style("No images found with specified extensions").red()
        );
        return Ok(());
    }
    println!("Found {} image(s)", style(image_files.len()).bold());

    let progress = create_progress_bar(image_files.len() as u64);
    progress.set_message("Processing captures");

    let results = engine.process_batch(&image_files, |_done, _total| {
        progress.inc(1);
    })?;
    progress.finish_with_message("Processing complete");

    let successful = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - successful;
    let uploaded = results
        .iter()
        .filter(|r| r.as_ref().map(|res| res.uploaded).unwrap_or(false))
        .count();
    let total_time = start_time.elapsed();

    println!();
    println!("{}", style("Results Summary:").bold().green());
    println!(
        "  Successfully processed: {}",
        style(successful).bold().green()
    );
    if failed > 0 {
        println!("  Failed: {}", style(failed).bold().red());
    }
    if uploaded > 0 {
        println!("  Uploaded: {}", style(uploaded).bold().cyan());
    }
    println!(
        "  Total processing time: {}",
        style(format_duration(total_time)).bold()
    );
    if successful > 0 {
        println!(
            "  Average time per image: {}",
            style(format_duration(total_time / image_files.len() as u32)).dim()
        );
    }

    if failed > 0 {
        println!();
        println!("{}", style("Errors encountered:").bold().red());
        let mut error_count = 0;
        for (i, result) in results.iter().enumerate() {
            if let Err(e) = result {
                error_count += 1;
                let filename = image_files
                    .get(i)
                    .and_then(|p| p.file_name())
                    .and_then(|name| name.to_str())
                    .unwrap_or("unknown");
                println!(
                    "  {}: {} - {}",
                    style(format!("#{}", error_count)).dim(),
                    style(filename).bold().red(),
                    e
                );
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = Args::parse();
    args.load_and_merge_config()?;

    println!(
        "{}",
        style("EventShot Processor - Event Photography Pipeline")
            .bold()
            .blue()
    );
    println!(
        "{}",
        style("Face-protected enhancement, grading, watermark, delivery").dim()
    );
    println!();

    validate_inputs(&args)?;

    let config = build_config(&args)?;

    if config.verbose {
        println!("{}", style("Configuration:").bold());
        println!("  Output directory: {}", config.output_dir.display());
        println!("  Extensions: {:?}", config.extensions);
        println!("  Enhancement mode: {:?}", config.enhance.mode);
        println!("  AI fallback: {}", config.enhance.fallback_allowed);
        println!("  Skip on failure: {}", config.enhance.skip_on_failure);
        println!("  Face model: {:?}", args.face_model);
        println!("  Face padding: {}px", config.face_padding);
        println!("  LUT: {:?}", config.lut_path);
        println!("  LUT intensity: {}", config.lut_intensity);
        println!(
            "  Crop ratios: portrait {}:{}, landscape {}:{}",
            config.crop.portrait_ratio.0,
            config.crop.portrait_ratio.1,
            config.crop.landscape_ratio.0,
            config.crop.landscape_ratio.1
        );
        println!("  Watermark: {:?}", config.watermark_path);
        println!("  Upload URL: {:?}", args.upload_url);
        println!("  Parallel jobs: {}", config.parallel_jobs);
        println!("  JPEG quality: {}", config.jpeg_quality);
        println!();
    }

    std::fs::create_dir_all(&config.output_dir).context("Failed to create output directory")?;

    let locator = build_locator(&args)?;
    let remote = build_remote(&args)?;
    let uploader = build_uploader(&args)?;

    if args.ai_endpoint.is_none()
        && matches!(args.enhance_mode, EnhanceModeArg::Ai | EnhanceModeArg::Auto)
    {
        verbose_println(
            args.verbose,
            "No --ai-endpoint configured; AI enhancement will fall back or fail per policy",
        );
    }

    let engine = ProcessingEngine::new(config, locator, remote, uploader);

    if args.watch_dir.is_some() {
        run_watch_mode(&args, engine)
    } else {
        run_batch_mode(&args, engine)
    }
}
