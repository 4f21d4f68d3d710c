use kairos::config::{Config, DEFAULT_CONFIG_FILE};
use kairos::net::{HttpProber, build_client};
use kairos::quality::QualityAdvisor;
use kairos::scheduler::{AcquisitionScheduler, RunRequest, SchedulerSettings};
use kairos::status::{DEFAULT_HISTORY, StatusBoardHandle};
use kairos::surface::HttpSurface;
use kairos::timesync::TimeSync;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
    let cfg = Config::load(&config_path)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        config = %config_path.display(),
        loglevel = %cfg.basic.loglevel,
        proxy = %cfg.basic.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        enable_multiplexing = cfg.basic.enable_multiplexing,
        deadline = %cfg.schedule.deadline.map(|d| d.to_rfc3339()).unwrap_or_else(|| "<immediate>".to_string()),
        target = %cfg.surface.target,
        "Configuration loaded"
    );
    cfg.log_effective();

    let client = build_client(&cfg.basic)?;
    let prober = Arc::new(HttpProber::new(client.clone()));
    let surface = Arc::new(HttpSurface::from_config(client, &cfg.surface)?);
    let time_sync = Arc::new(TimeSync::new(prober.clone(), cfg.time_sync.clone()));
    let advisor = QualityAdvisor::new(prober, cfg.quality.clone());
    let board = StatusBoardHandle::spawn(DEFAULT_HISTORY).await?;

    let scheduler = AcquisitionScheduler::new(
        time_sync,
        advisor,
        surface,
        Arc::new(board.clone()),
        SchedulerSettings::from_config(&cfg),
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            warn!("Shutdown signal received; canceling run");
            cancel.cancel();
        }
    });

    let report = scheduler
        .run(
            RunRequest {
                target: cfg.surface.target.clone(),
                payload: cfg.surface.payload.clone(),
                deadline: cfg.schedule.deadline,
            },
            &cancel,
        )
        .await;

    match board.history().await {
        Ok(history) => {
            for record in history {
                debug!(stage = %record.stage, at = %record.at, "{}", record.message);
            }
        }
        Err(e) => warn!(error = %e, "Status history unavailable"),
    }
    board.stop();

    println!("{report}");
    if let Some(value) = report.value.as_deref() {
        println!("{value}");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
