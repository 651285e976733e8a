mod config;
mod headless;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use futures::future::join_all;
use indicatif::MultiProgress;
use tracing_subscriber::{fmt, EnvFilter};

use courier_core::{
    BlobRegistry, BundleLoader, CacheRegistry, CourierConfig, MediaOrchestrator, ProbeOutcome,
    ProgressTracker, ReadinessTracker, Report, RequestEngine, ResourceHost, SessionState,
    VideoWrapper,
};

use config::{AppConfig, VideoDef};
use headless::{HeadlessHost, HeadlessWrapper};

const BUNDLES_UNIT: &str = "bundles";

fn version_string() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");

    if GIT_HASH.is_empty() {
        VERSION
    } else {
        // Called once by clap.
        Box::leak(format!("{VERSION} ({GIT_HASH})").into_boxed_str())
    }
}

/// Warm and inspect the media and library caches a page delivers from.
#[derive(Parser)]
#[command(name = "courier", version = version_string(), about)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every configured video and library bundle into the cache.
    Prefetch {
        /// Page origin the assets are delivered to. Overrides config file.
        #[arg(long)]
        origin: Option<String>,

        /// Cache directory. Overrides config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Keep buckets in memory for this run only.
        #[arg(long, default_value_t = false, conflicts_with = "cache_dir")]
        in_memory: bool,

        /// Extra video URL to load (repeatable).
        #[arg(long = "video")]
        videos: Vec<String>,

        #[arg(long, default_value_t = false)]
        no_aos: bool,

        #[arg(long, default_value_t = false)]
        no_confetti: bool,

        #[arg(long, default_value_t = false)]
        no_fonts: bool,
    },
    /// Send a range probe and report whether the origin serves partial content.
    Probe {
        url: String,
    },
    /// Inspect or evict cache buckets.
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List stored entries.
    List {
        /// Only this bucket. Defaults to the video and libs buckets.
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Delete one entry, or every entry of a bucket.
    Evict {
        #[arg(short, long)]
        bucket: String,

        /// URL key to delete. Omit to clear the bucket.
        #[arg(short, long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut app = load_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Prefetch {
            origin,
            cache_dir,
            in_memory,
            videos,
            no_aos,
            no_confetti,
            no_fonts,
        } => {
            if let Some(origin) = origin {
                app.general.page_origin = origin;
            }
            if let Some(dir) = cache_dir {
                app.cache.dir = dir;
            }
            let offset = app.video.len();
            app.video.extend(videos.into_iter().enumerate().map(|(i, src)| VideoDef {
                id: format!("video-{}", offset + i + 1),
                src: Some(src),
                class: None,
                width: 1920,
                height: 1080,
            }));
            app.batch.aos &= !no_aos;
            app.batch.confetti &= !no_confetti;
            app.batch.additional_font &= !no_fonts;
            run_prefetch(app, in_memory).await
        }
        Commands::Probe { url } => run_probe(app, &url).await,
        Commands::Cache(CacheCommand::List { bucket }) => run_cache_list(app, bucket).await,
        Commands::Cache(CacheCommand::Evict { bucket, key }) => {
            run_cache_evict(app, &bucket, key.as_deref()).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> AppConfig {
    let Some(path) = path else {
        init_tracing("pretty");
        return AppConfig::default();
    };

    match AppConfig::load(path) {
        Ok(c) => {
            init_tracing(&c.general.log_format);
            tracing::info!(path = %path.display(), "Loaded config file");
            c
        }
        Err(e) => {
            init_tracing("pretty");
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn registry_for(app: &AppConfig, in_memory: bool) -> Result<(CourierConfig, CacheRegistry), String> {
    let mut config = app.to_courier_config()?;
    if in_memory {
        config.cache_root = None;
    }
    let engine = RequestEngine::from_config(&config);
    let registry = CacheRegistry::from_config(&config, engine);
    Ok((config, registry))
}

async fn run_prefetch(app: AppConfig, in_memory: bool) -> Result<(), String> {
    let (config, registry) = registry_for(&app, in_memory)?;
    let blobs = BlobRegistry::new(&config.page_origin);
    let tracker = Arc::new(ReadinessTracker::new());

    println!(
        "{} {}",
        style("courier").bold(),
        style(env!("CARGO_PKG_VERSION")).dim()
    );
    println!("  {} {}", style("origin:").dim(), style(&config.page_origin).bold());
    match &config.cache_root {
        Some(dir) => println!("  {} {}", style("cache: ").dim(), dir.display()),
        None => println!("  {} {}", style("cache: ").dim(), style("in memory").dim()),
    }
    println!();

    let multi = MultiProgress::new();
    let videos: Vec<(Arc<HeadlessWrapper>, MediaOrchestrator)> = app
        .video
        .iter()
        .map(|def| {
            let mut unit = config.clone();
            unit.video_progress_name = def.id.clone();
            let orchestrator = MediaOrchestrator::new(
                &registry,
                blobs.clone(),
                Arc::clone(&tracker) as Arc<dyn ProgressTracker>,
                &unit,
            );
            (Arc::new(HeadlessWrapper::new(def.clone(), &multi)), orchestrator)
        })
        .collect();

    let host = Arc::new(HeadlessHost::new(blobs.clone()));
    let loader = BundleLoader::new(
        &registry,
        blobs.clone(),
        Arc::clone(&host) as Arc<dyn ResourceHost>,
        &config,
    )
    .with_manifest(app.bundles.clone());

    let video_jobs = videos.iter().map(|(wrapper, orchestrator)| async move {
        let result = orchestrator
            .load(Arc::clone(wrapper) as Arc<dyn VideoWrapper>)
            .await;
        wrapper.finish();
        (wrapper.id().to_string(), result)
    });
    let load_bundles = !app.batch.is_empty();
    if load_bundles {
        tracker.add();
    }
    let bundle_job = async {
        if !load_bundles {
            return None;
        }
        let result = loader.load(app.batch).await;
        match &result {
            Ok(()) => tracker.complete(BUNDLES_UNIT, false),
            Err(_) => tracker.invalid(BUNDLES_UNIT),
        }
        Some(result)
    };

    let (video_results, bundle_result) = tokio::join!(join_all(video_jobs), bundle_job);

    if tracker.registered() > 0
        && tokio::time::timeout(Duration::from_secs(1), tracker.wait_ready())
            .await
            .is_err()
    {
        tracing::warn!(
            registered = tracker.registered(),
            reported = tracker.reports().len(),
            "Not every unit reported"
        );
    }

    let mut failed = false;
    for (id, result) in &video_results {
        let line = match result {
            Ok(state) => format_state(*state),
            Err(e) => {
                failed |= !e.is_cancelled();
                style(e.to_string()).red().to_string()
            }
        };
        println!("  {:<24} {}", id, line);
    }

    match bundle_result {
        None => println!("  {:<24} {}", BUNDLES_UNIT, style("skipped").dim()),
        Some(Ok(())) => println!(
            "  {:<24} {} {}",
            BUNDLES_UNIT,
            style("loaded").green(),
            style(format!("({} resources)", host.injected().len())).dim()
        ),
        Some(Err(e)) => {
            failed = true;
            println!("  {:<24} {}", BUNDLES_UNIT, style(e.to_string()).red());
        }
    }

    let invalid = tracker
        .reports()
        .iter()
        .filter(|r| matches!(r, Report::Invalid { .. }))
        .count();
    tracing::info!(
        units = tracker.registered(),
        invalid,
        blobs = blobs.len(),
        "Prefetch finished"
    );

    for (wrapper, orchestrator) in &videos {
        orchestrator.release(wrapper.id());
    }

    if failed {
        Err("Prefetch finished with failures".into())
    } else {
        Ok(())
    }
}

async fn run_probe(app: AppConfig, url: &str) -> Result<(), String> {
    let config = app.to_courier_config()?;
    let engine = RequestEngine::from_config(&config);

    let outcome = engine.probe(url, None).await.map_err(|e| e.to_string())?;
    let verdict = match outcome {
        ProbeOutcome::RangesSupported => style("206 ranges supported, streams progressively").green(),
        ProbeOutcome::RangesIgnored => style("200 ranges ignored, plays directly").yellow(),
    };
    println!("{} {}", style(url).bold(), verdict);
    Ok(())
}

async fn run_cache_list(app: AppConfig, bucket: Option<String>) -> Result<(), String> {
    let (_, registry) = registry_for(&app, false)?;
    let names = match bucket {
        Some(name) => vec![name],
        None => vec![app.cache.video_bucket.clone(), app.cache.libs_bucket.clone()],
    };

    for name in names {
        let store = registry.bucket(&name);
        store.open().await.map_err(|e| e.to_string())?;
        let entries = store.entries().await.map_err(|e| e.to_string())?;

        println!("{}", format_separator(&name));
        if entries.is_empty() {
            println!("  {}", style("(empty)").dim());
        }
        for entry in entries {
            println!(
                "  {} {:>10}  {}  {}",
                style(entry.status).green(),
                format_bytes(entry.size),
                style(entry.stored_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                entry.key
            );
        }
    }
    Ok(())
}

async fn run_cache_evict(app: AppConfig, bucket: &str, key: Option<&str>) -> Result<(), String> {
    let (_, registry) = registry_for(&app, false)?;
    let store = registry.bucket(bucket);
    store.open().await.map_err(|e| e.to_string())?;

    match key {
        Some(key) => {
            if store.del(key).await.map_err(|e| e.to_string())? {
                println!("{} {}", style("evicted").yellow(), key);
            } else {
                println!("{} {}", style("not cached").dim(), key);
            }
        }
        None => {
            let removed = store.clear().await.map_err(|e| e.to_string())?;
            println!("{} {} entries from {}", style("evicted").yellow(), removed, bucket);
        }
    }
    Ok(())
}

fn format_state(state: SessionState) -> String {
    let text = state.to_string();
    match state {
        SessionState::Ready | SessionState::Cached => style(text).green().to_string(),
        SessionState::Errored => style(text).red().to_string(),
        _ => style(text).yellow().to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn format_separator(label: &str) -> String {
    let label = format!(" {} ", label);
    let width = 54usize.saturating_sub(label.len());
    format!(
        "{}{}{}",
        style("──").dim(),
        style(label).dim().bold(),
        style("─".repeat(width)).dim()
    )
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().with_writer(std::io::stderr).init();
        }
        _ => {
            fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}
