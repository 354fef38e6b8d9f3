use anyhow::Result;
use clap::{Parser, Subcommand};
use podkeeper_daemon::config::{ConfigFlags, PodConfig};
use podkeeper_daemon::lock::LockManager;
use podkeeper_daemon::sched::Schedules;
use podkeeper_daemon::supervisor::Supervisorctl;
use podkeeper_daemon::{api, backup, bootstrap, deploy, health, restore, volume};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "podkeeper", version, about = "Lifecycle orchestrator for a single GPU pod")]
struct Cli {
    #[command(flatten)]
    flags: ConfigFlags,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Bootstrap the node, then host the recurring schedules and the
    /// status API.
    Run {
        /// Where the status API will listen.
        #[arg(long, default_value = "127.0.0.1:8666")]
        listen: String,
    },
    /// One-shot boot sequence without schedules.
    Bootstrap,
    /// One deploy-poll tick.
    Deploy,
    /// One health-monitor cycle.
    Health,
    /// One backup cycle.
    Backup,
    /// Pull the latest snapshot from the backup branch onto this node.
    Restore,
    /// Migrate configured directories onto the persistent volume.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Arc::new(PodConfig::resolve(&cli.flags)?);
    let locks = LockManager::new(&config.lock_dir);
    let sup = Supervisorctl::new(config.supervisord_conf.clone());

    match cli.cmd {
        Cmd::Run { listen } => run_daemon(config, listen).await,
        Cmd::Bootstrap => bootstrap::run_bootstrap(&config, &sup).await,
        Cmd::Deploy => {
            let outcome = deploy::run_deploy_cycle(&config, &locks, &sup).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Cmd::Health => {
            let snapshot = health::run_health_cycle(&config, &sup).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Cmd::Backup => {
            let outcome = backup::run_backup_cycle(&config, &locks).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Cmd::Restore => {
            let report = restore::run_restore(&config).await?;
            for path in &report.restored {
                println!("restored {}", path.display());
            }
            Ok(())
        }
        Cmd::Migrate => {
            for (logical, outcome) in volume::run_migration(&config, &sup).await? {
                println!("{}: {outcome:?}", logical.display());
            }
            Ok(())
        }
    }
}

async fn run_daemon(config: Arc<PodConfig>, listen: String) -> Result<()> {
    let sup = Supervisorctl::new(config.supervisord_conf.clone());
    bootstrap::run_bootstrap(&config, &sup).await?;

    let mut sched = Schedules::new();
    bootstrap::register_schedules(&config, &mut sched);

    let app = api::router(api::AppState {
        config: Arc::clone(&config),
    });
    let addr: SocketAddr = listen.parse()?;
    info!("status API listening on http://{addr}");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sched.abort_all();
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
