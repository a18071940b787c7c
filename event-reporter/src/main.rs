//! event-reporter - queue device events locally and report them to the API
//!
//! Producers hand events to the daemon over a Unix socket; the daemon stores
//! them durably and delivers them in the background, retrying until the
//! server accepts or refuses each one.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/event-reporter/config.toml (~/.config/event-reporter/config.toml)
//! - Queue: $XDG_DATA_HOME/event-reporter/events.db (~/.local/share/event-reporter/events.db)
//! - Logs: $XDG_STATE_HOME/event-reporter/event-reporter.log
//! - Socket: $XDG_RUNTIME_DIR/event-reporter/events.sock

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use event_reporter_core::config::{credentials_path, read_password, write_password};
use event_reporter_core::ipc::Listener;
use event_reporter_core::{ApiClient, Config, DeliveryLoop, EventStore, Schedule};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "event-reporter")]
#[command(about = "Durably queue local events and report them to the Cacophony API")]
#[command(version)]
struct Args {
    /// Config file (default: ~/.config/event-reporter/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Queue database, overriding [store] path
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// Socket to listen on, overriding [ipc] socket_path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path).context("failed to load configuration")?;
    if let Some(db) = args.db {
        config.store.path = Some(db);
    }
    if let Some(socket) = args.socket {
        config.ipc.socket_path = Some(socket);
    }
    config.validate().context("invalid configuration")?;

    let _log_guard = event_reporter_core::logging::init(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    let db_path = config.database_path();
    let socket_path = config.socket_path();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        database = %db_path.display(),
        socket = %socket_path.display(),
        "event-reporter starting"
    );

    let store = EventStore::open(&db_path).context("failed to open event queue")?;
    store
        .migrate()
        .context("failed to run event queue migrations")?;
    let store = Arc::new(store);
    match store.len() {
        Ok(pending) => tracing::info!(pending, "Event queue opened"),
        Err(e) => tracing::warn!(error = %e, "Event queue opened, but counting pending events failed"),
    }

    // Claimed before bootstrap so two instances never register at once.
    let listener = Listener::bind(&socket_path, store.clone())
        .context("failed to claim the event endpoint")?;

    let priv_path = credentials_path(&config_path);
    let password = read_password(&priv_path).context("failed to read device credentials")?;
    let client = ApiClient::bootstrap(
        config.device.clone(),
        password,
        config.reporter.timeout(),
        |password| write_password(&priv_path, password),
    )
    .await
    .context("failed to start a device session")?;
    tracing::info!(
        device = %config.device.device_name,
        registered = client.just_registered(),
        "Device session established"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    })
    .context("failed to set signal handler")?;

    let schedule = Schedule::new(config.reporter.interval(), config.reporter.jitter());
    let delivery = DeliveryLoop::new(store, client, schedule);

    let mut listener_task = tokio::spawn(listener.serve(shutdown_rx.clone()));
    let mut delivery_task = tokio::spawn(delivery.run(shutdown_rx));

    // A panic in either task ends the daemon instead of leaving half of it running.
    tokio::select! {
        result = &mut delivery_task => {
            result.context("delivery task failed")?;
            listener_task.await.context("listener task failed")?;
        }
        result = &mut listener_task => {
            result.context("listener task failed")?;
            delivery_task.await.context("delivery task failed")?;
        }
    }

    tracing::info!("event-reporter stopped");
    Ok(())
}
