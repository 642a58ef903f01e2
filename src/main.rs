use clap::{Parser, Subcommand};
use ledger_sync::{
    Collection, ConnectivityMonitor, EngineConfig, HttpGateway, Query, RecordId, RocksStore,
    Schema, SyncCoordinator, SyncHandle, SyncWorker, WorkerSettings,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ledger-sync")]
#[command(about = "Offline-first sync engine for the ledger client", long_about = None)]
struct Args {
    /// Directory holding ledger-sync.toml and .env
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    /// Local store directory (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Remote API base URL (overrides config)
    #[arg(long)]
    base_url: Option<String>,

    /// Start with connectivity reported as offline
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connectivity, queue size and the last drain report
    Status,
    /// List queued mutations
    Pending,
    /// Create a record (queued if the server is unreachable)
    Submit {
        collection: Collection,
        /// Record body as JSON
        json: String,
    },
    /// Read a collection, falling back to the local cache
    Fetch {
        collection: Collection,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Drain the pending queue once
    Sync,
    /// Delete a record on the server
    Delete { collection: Collection, id: String },
    /// Run the background worker; reads `online`/`offline` lines from stdin
    Run,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ledger_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = EngineConfig::load(&args.config_dir)?;
    if let Some(dir) = args.data_dir {
        config.store.data_dir = dir;
    }
    if let Some(url) = args.base_url {
        config.remote.base_url = url;
    }
    config.validate()?;

    let store = Arc::new(RocksStore::new(&config.store.data_dir, Schema::current()));
    let gateway = Arc::new(HttpGateway::from_config(&config)?);
    let monitor = Arc::new(ConnectivityMonitor::new(!args.offline));
    let coordinator = Arc::new(SyncCoordinator::new(
        store,
        gateway,
        monitor.clone(),
        config.retry_policy(),
    ));
    coordinator.initialize().await?;

    match args.command {
        Command::Status => print_json(&coordinator.status().await?)?,
        Command::Pending => {
            let entries: Vec<_> = coordinator.queue().drain_all().await?.collect();
            print_json(&entries)?;
        }
        Command::Submit { collection, json } => {
            let record: serde_json::Value = serde_json::from_str(&json)?;
            print_json(&coordinator.submit(collection, record).await?)?;
        }
        Command::Fetch {
            collection,
            date,
            name,
        } => {
            let fetched = coordinator.fetch(collection, &Query { date, name }).await?;
            coordinator.settle().await;
            print_json(&fetched)?;
        }
        Command::Sync => print_json(&coordinator.sync().await?)?,
        Command::Delete { collection, id } => {
            let id: RecordId = id.parse()?;
            coordinator.delete(collection, &id).await?;
            print_json(&serde_json::json!({ "deleted": id }))?;
        }
        Command::Run => run(coordinator, monitor, WorkerSettings::from_config(&config)).await?,
    }

    Ok(())
}

async fn run(
    coordinator: Arc<SyncCoordinator>,
    monitor: Arc<ConnectivityMonitor>,
    settings: WorkerSettings,
) -> anyhow::Result<()> {
    let worker = SyncWorker::spawn(coordinator.clone(), settings);
    if monitor.is_online() {
        worker.sync_now().await;
    }

    let lines = BufReader::new(tokio::io::stdin()).lines();
    command_loop(lines, shutdown_signal(), &worker, &coordinator, &monitor).await?;

    tracing::info!("Shutting down sync worker");
    worker.stop().await;
    coordinator.settle().await;
    Ok(())
}

/// Apply stdin commands until EOF or `shutdown` resolves.
async fn command_loop<R, S>(
    mut lines: Lines<R>,
    shutdown: S,
    worker: &SyncHandle,
    coordinator: &SyncCoordinator,
    monitor: &ConnectivityMonitor,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line?.as_deref().map(str::trim) {
                    Some("online") => { monitor.report(true); }
                    Some("offline") => { monitor.report(false); }
                    Some("sync") => { worker.sync_now().await; }
                    Some("status") => print_json(&coordinator.status().await?)?,
                    Some("") => {}
                    Some(other) => tracing::warn!("Unknown command '{}'", other),
                    None => break,
                }
            }
            _ = &mut shutdown => break,
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
