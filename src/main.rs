//! Line-delimited JSON server over stdin/stdout.
//!
//! Each stdin line is one [`ClientCommand`]; a line without a
//! `client` field is attributed to a generated connection id. Each
//! outbound event is one stdout line wrapped in a small addressing
//! envelope, leaving the fan-out to whatever owns the other end of
//! the pipe. Logs go to stderr so they never mix with the protocol.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use planning_poker::config::{Args, FileConfig, ServerConfig};
use planning_poker::gateway::transport::{ServerEvent, TransportGateway};
use planning_poker::gateway::JsonFileStore;
use planning_poker::session::{ClientCommand, SessionEngine};

/// Stdout transport: one JSON line per delivery, with the addressing
/// scope alongside the event.
struct StdoutTransport {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutTransport {
    fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    async fn write(&self, scope: &str, target: Option<&str>, event: ServerEvent) {
        let envelope = serde_json::json!({
            "scope": scope,
            "target": target,
            "event": event,
        });
        let mut line = envelope.to_string();
        line.push('\n');
        let mut out = self.out.lock().await;
        if let Err(err) = out.write_all(line.as_bytes()).await {
            warn!("stdout delivery failed: {}", err);
        }
    }
}

#[async_trait]
impl TransportGateway for StdoutTransport {
    async fn broadcast(&self, room_id: &str, event: ServerEvent) {
        self.write("room", Some(room_id), event).await;
    }

    async fn unicast(&self, client_id: &str, event: ServerEvent) {
        self.write("client", Some(client_id), event).await;
    }

    async fn broadcast_all(&self, event: ServerEvent) {
        self.write("all", None, event).await;
    }
}

/// Parse stdin lines into commands until EOF. Malformed lines are
/// logged and skipped.
async fn read_commands(tx: mpsc::UnboundedSender<ClientCommand>) {
    let default_client = uuid::Uuid::new_v4().to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("stdin read failed: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let mut value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                warn!("discarding malformed command line: {}", err);
                continue;
            }
        };
        if let Some(object) = value.as_object_mut() {
            object
                .entry("client")
                .or_insert_with(|| serde_json::Value::String(default_client.clone()));
        }
        match serde_json::from_value::<ClientCommand>(value) {
            Ok(cmd) => {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
            Err(err) => warn!("discarding malformed command line: {}", err),
        }
    }
    info!("stdin closed; shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("planning_poker=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ServerConfig::from_env();
    if let Some(path) = &args.config {
        config = config.apply_file(&FileConfig::load(path)?);
    }
    let config = config.apply_args(&args);
    info!(
        data_dir = %config.data_dir.display(),
        discussion_secs = config.engine.discussion_window.as_secs(),
        "starting estimation server"
    );

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let transport = Arc::new(StdoutTransport::new());
    let engine = SessionEngine::new(transport, store, config.engine);

    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_commands(tx));
    engine.run(rx).await;
    reader.abort();
    Ok(())
}
