mod alert_egress;
mod live_ws;
mod routes;

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use warden_core::auth::TokenAuthority;
use warden_core::config_loader::WardenConfig;
use warden_core::live::LiveFabric;
use warden_core::persistence::PersistenceManager;
use warden_core::store::{MemoryStore, StoreGateway};
use warden_ingest::pipeline::IngestPipeline;
use warden_source::monitor::SourceMonitor;
use warden_source::remote::SourceHostClient;
use warden_source::scheduler::SyncScheduler;

use alert_egress::AlertEgress;
use routes::AppState;

#[derive(Parser, Debug)]
#[command(name = "contest-warden", version, about = "Contest Warden — Real-time contest proctoring engine")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "warden.toml")]
    config: String,

    /// Bind address (overrides config file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Data directory (overrides config file)
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Generate a default config file and exit
    #[arg(long)]
    generate_config: bool,

    /// Dry-run: load config, validate, print a report, exit
    #[arg(long)]
    dry_run: bool,

    /// Disable the source sync scheduler even when a token is configured
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Generate Config ──────────────────────────────────────────────
    if cli.generate_config {
        let config = WardenConfig::default();
        config.save(&cli.config).map_err(|e| anyhow::anyhow!(e))?;
        println!("Default configuration written to {}", cli.config);
        return Ok(());
    }

    // ── Load Config ──────────────────────────────────────────────────
    let mut config = if std::path::Path::new(&cli.config).exists() {
        WardenConfig::load(&cli.config).map_err(|e| anyhow::anyhow!(e))?
    } else {
        WardenConfig::from_env()
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(data_dir) = cli.data_dir {
        config.general.data_dir = data_dir;
    }
    let log_level = cli.log_level.as_deref().unwrap_or(&config.general.log_level);

    // ── Tracing ──────────────────────────────────────────────────────
    let level = match log_level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Contest Warden v{}", env!("CARGO_PKG_VERSION"));

    // ── Store + Persistence ──────────────────────────────────────────
    let persistence = Arc::new(PersistenceManager::new(&config.general.data_dir));
    if let Err(e) = persistence.init_with_retries(5).await {
        error!(error = %e, dir = %config.general.data_dir, "Store unreachable, giving up");
        std::process::exit(1);
    }

    let store = Arc::new(MemoryStore::new());
    persistence.register(store.clone());
    match persistence.restore_component("warden-store") {
        Ok(true) => {
            let counts = store.counts();
            info!(
                participants = counts.participants,
                events = counts.events,
                analyses = counts.source_analyses,
                "Store restored from snapshot"
            );
        }
        Ok(false) => info!("No snapshot found, starting with an empty store"),
        Err(e) => warn!(error = %e, "Snapshot restore failed, starting with an empty store"),
    }

    // ── Core engine ──────────────────────────────────────────────────
    let fabric = Arc::new(LiveFabric::new());
    let gateway: Arc<dyn StoreGateway> = store.clone();
    let pipeline = Arc::new(IngestPipeline::new(gateway.clone(), fabric.clone()));
    let egress = Arc::new(AlertEgress::new(&config.alerts, &config.general.data_dir));

    if config.auth.token_secret.is_empty() {
        warn!("No token secret configured; dashboard logins are disabled");
    }
    let auth = Arc::new(TokenAuthority::new(&config.auth.token_secret, config.auth.token_ttl_secs));

    // ── Source Monitoring ────────────────────────────────────────────
    let mut monitor = None;
    let mut scheduler = None;
    if config.scheduler_enabled() {
        let client = SourceHostClient::new(&config.source.api_base, &config.source.token)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let m = Arc::new(SourceMonitor::new(
            gateway.clone(),
            fabric.clone(),
            client,
            config.source.similarity_threshold,
        ));
        monitor = Some(m.clone());
        if cli.no_scheduler {
            info!("Sync scheduler disabled by flag; on-demand source operations stay available");
        } else {
            let s = Arc::new(SyncScheduler::new(m, gateway.clone(), config.source.sync_interval_min));
            s.start();
            scheduler = Some(s);
        }
    } else {
        info!("No source token configured; source monitoring disabled");
    }

    // ── Dry Run ──────────────────────────────────────────────────────
    if cli.dry_run {
        let counts = store.counts();
        info!(
            bind = %config.server.bind,
            data_dir = %config.general.data_dir,
            participants = counts.participants,
            scheduler = scheduler.is_some(),
            "Dry-run complete. Configuration valid."
        );
        return Ok(());
    }

    // ── Periodic Snapshots ───────────────────────────────────────────
    if config.general.snapshot_interval_secs > 0 {
        let snap_persistence = persistence.clone();
        let interval = config.general.snapshot_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let results = snap_persistence.snapshot_all();
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    warn!(failed = failed, "Snapshot cycle errors");
                }
            }
        });
    }

    // ── HTTP Server ──────────────────────────────────────────────────
    let state = AppState {
        store: store.clone(),
        fabric: fabric.clone(),
        pipeline: pipeline.clone(),
        monitor,
        auth,
        config: Arc::new(config.clone()),
        egress,
        started_at: warden_core::types::now_ms(),
    };
    let mut app = routes::router(state);
    if let Some(cors) = cors_layer(&config.server.cors_origins) {
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %config.server.bind, "Contest Warden listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── Graceful Shutdown ────────────────────────────────────────────
    info!("Shutting down Contest Warden...");
    if let Some(ref s) = scheduler {
        s.stop();
        info!(cycles = s.cycles_completed(), skipped = s.cycles_skipped(), "Sync scheduler stopped");
    }

    info!("Saving final snapshot...");
    let results = persistence.snapshot_all();
    let ok = results.iter().filter(|r| r.is_ok()).count();

    info!(
        batches = pipeline.batches_processed(),
        alerts = pipeline.alerts_emitted(),
        frames_published = fabric.total_published(),
        frames_delivered = fabric.total_delivered(),
        frames_dropped = fabric.total_dropped(),
        snapshots = ok,
        "Shutdown complete"
    );

    Ok(())
}

fn cors_layer(origins: &[String]) -> Option<tower_http::cors::CorsLayer> {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if origins.is_empty() {
        return None;
    }
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return Some(layer.allow_origin(Any));
    }
    let parsed: Vec<HeaderValue> =
        origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    Some(layer.allow_origin(parsed))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
