use clap::Parser;
use quanthub::active_status::ActiveStatusService;
use quanthub::adapters::dingtalk::DingNotifier;
use quanthub::adapters::kv::{KeyValueStore, MemoryStore, RedisStore};
use quanthub::api::{create_router, AppState};
use quanthub::config::AppConfig;
use quanthub::coordination::{install_signal_handlers, Shutdown};
use quanthub::error::Result;
use quanthub::files::service::{serve_static, FILE_ROOT};
use quanthub::files::{FileService, Uploader};
use quanthub::fleet::FleetService;
use quanthub::intel::service::FILTER_FILE;
use quanthub::intel::IntelService;
use quanthub::notify::service::RECORD_ROOT;
use quanthub::notify::NotifyService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quanthub", about = "Notification and strategy-coordination hub")]
struct Cli {
    /// Config directory or a single TOML file
    #[arg(short, long, default_value = "config")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = AppConfig::load_from(&cli.config)?;

    let (kv, kv_addr): (Arc<dyn KeyValueStore>, String) = if cfg.redis_url.is_empty() {
        warn!("no redis_url configured, using in-memory store; state will not survive restarts");
        (Arc::new(MemoryStore::new()), "memory".to_string())
    } else {
        (
            Arc::new(RedisStore::connect(&cfg.redis_url).await?),
            cfg.redis_url.clone(),
        )
    };

    let ding = DingNotifier::new(cfg.ding.clone());

    let notify = NotifyService::new(
        kv.clone(),
        ding.clone(),
        cfg.notify_mirror_url(),
        RECORD_ROOT,
    );
    notify.spawn_loops();

    let fleet = FleetService::bind(cfg.services.fleet_port, &cfg.services.fleet_bot_secret).await?;
    fleet.spawn_loops();

    let intel = IntelService::new(
        kv.clone(),
        ding.clone(),
        &cfg.ding_admin_mob,
        &cfg.services.intel_bot_secret,
        FILTER_FILE,
    )
    .await;

    let active_status = ActiveStatusService::new(ding.clone(), &cfg.ding_admin_mob);
    active_status.spawn_loops();

    let files = FileService::new(FILE_ROOT);

    spawn_static(PathBuf::from(FILE_ROOT), cfg.services.file_server_port);
    spawn_static(PathBuf::from(RECORD_ROOT), cfg.services.notify_record_port);

    if let Some(up_cfg) = &cfg.uploader {
        Uploader::new(up_cfg)?.spawn();
    }

    let shutdown = Shutdown::new();
    install_signal_handlers(shutdown.clone()).await;

    let state = AppState {
        notify,
        fleet,
        intel,
        active_status,
        files,
        kv_addr,
    };
    let app = create_router(state);
    let listener =
        tokio::net::TcpListener::bind(("0.0.0.0", cfg.services.web_port)).await?;
    info!("hub listening at :{}", cfg.services.web_port);

    let mut rx = shutdown.subscribe();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = rx.changed().await;
        })
        .await?;

    info!("hub stopped");
    Ok(())
}

fn spawn_static(root: PathBuf, port: u16) {
    tokio::spawn(async move {
        if let Err(e) = serve_static(root, port).await {
            error!("static server on port {} failed: {}", port, e);
        }
    });
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
