//! event-reporter-send - hand one event to a running event-reporter
//!
//! ```text
//! event-reporter-send '{"type":"rpi-power-on"}'
//! event-reporter-send --time 2024-05-01T10:00:00Z '{"type":"audioBait","details":{"volume":8}}'
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use event_reporter_core::ipc::Client;
use event_reporter_core::Config;

#[derive(Parser)]
#[command(name = "event-reporter-send")]
#[command(about = "Queue an event with a running event-reporter")]
#[command(version)]
struct Args {
    /// Daemon socket (default: $XDG_RUNTIME_DIR/event-reporter/events.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// When the event happened, as RFC 3339 (default: now)
    #[arg(short, long)]
    time: Option<String>,

    /// Event details as JSON, e.g. '{"type":"rpi-power-on"}'
    details: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Sent as-is: the daemon stores the bytes and merges repeats by content.
    let value: serde_json::Value =
        serde_json::from_str(&args.details).context("event details must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("event details must be a JSON object");
    }

    let timestamp = match &args.time {
        Some(time) => DateTime::parse_from_rfc3339(time)
            .with_context(|| format!("invalid --time {:?}", time))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let nanos = timestamp
        .timestamp_nanos_opt()
        .context("--time is outside the representable range")?;

    let socket = args.socket.unwrap_or_else(Config::default_socket_path);
    let client = Client::new(&socket);
    client
        .queue(args.details.as_bytes(), nanos)
        .await
        .with_context(|| format!("failed to queue event via {}", socket.display()))?;

    Ok(())
}
