use anyhow::Result;
use clap::Parser;
use skywatch::{
    AppState, DetectionIngestWorker, FrameCache, Hub, MemoryAttackStore, MemoryDetectionStore,
    SkywatchConfig, StreamServer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "skywatch")]
#[command(about = "Drone detection telemetry backend with live WebSocket fan-out")]
#[command(version)]
#[command(long_about = "Backend service that ingests drone detection telemetry over MQTT, \
captures and normalizes video frames, persists detection records, and fans detections, \
video frames and attack data out to live WebSocket viewers.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "skywatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting Skywatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SkywatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate()?;
    info!("Skywatch configuration loaded and validated");

    // Explicitly constructed, owned instances; no global singletons
    let detection_hub = Hub::spawn(
        "detection",
        config.hub.viewer_queue_capacity,
        config.hub.control_queue_capacity,
    );
    let video_hub = Hub::spawn(
        "video",
        config.hub.frame_queue_capacity,
        config.hub.control_queue_capacity,
    );
    let attack_hub = Hub::spawn(
        "attack",
        config.hub.viewer_queue_capacity,
        config.hub.control_queue_capacity,
    );

    let frame_cache = Arc::new(FrameCache::new());
    let detection_store = Arc::new(MemoryDetectionStore::new());
    let attack_store = Arc::new(MemoryAttackStore::new());

    let shutdown = CancellationToken::new();

    let ingest_worker = DetectionIngestWorker::new(
        config.mqtt.clone(),
        &config.capture.path,
        detection_store,
        Arc::clone(&frame_cache),
        detection_hub.clone(),
    );
    let ingest_task = tokio::spawn(ingest_worker.run(shutdown.clone()));

    let state = AppState {
        detection_hub: detection_hub.clone(),
        video_hub: video_hub.clone(),
        attack_hub: attack_hub.clone(),
        frame_cache,
        attack_store,
    };
    let server = StreamServer::new(config.server.clone(), state);
    let server_shutdown = shutdown.clone();
    let mut server_task = tokio::spawn(async move { server.start(server_shutdown).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("Streaming server stopped"),
                Ok(Err(e)) => error!("Streaming server failed: {}", e),
                Err(e) => error!("Streaming server task panicked: {}", e),
            }
        }
    }

    shutdown.cancel();

    let _ = ingest_task.await;
    if !server_task.is_finished() {
        let _ = server_task.await;
    }

    detection_hub.shutdown().await;
    video_hub.shutdown().await;
    attack_hub.shutdown().await;

    info!("Skywatch stopped");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, fmt, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("skywatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .boxed()
        }
        Some("compact") => {
            fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .boxed()
        }
        Some("pretty") | None => {
            fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Skywatch Configuration File");
    println!("# This is the default configuration with all available options");
    println!();

    match toml::to_string_pretty(&SkywatchConfig::default()) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => eprintln!("Failed to render default configuration: {}", e),
    }
}
