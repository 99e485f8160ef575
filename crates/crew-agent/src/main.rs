//! # crew-agent
//!
//! Crew client binary — connects to a conversation backend, creates a
//! lead conversation, runs one prompt to quiescence (through every
//! delegation round), and streams the output to the terminal.

#![deny(unsafe_code)]

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crew_core::AgentEvent;
use crew_events::EventBus;
use crew_rpc::client::ClientToolHandler;
use crew_rpc::{ClientPool, Connector, NullToolHandler, RpcClient, RpcError};
use crew_runtime::{
    ConversationDriver, DelegationHandler, DriverOptions, SubagentManager, SubagentOptions,
};

/// Crew delegation client.
#[derive(Parser, Debug)]
#[command(name = "crew-agent", about = "Crew delegation client")]
struct Cli {
    /// Backend host (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Backend port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Model for the lead conversation (overrides settings).
    #[arg(long)]
    model: Option<String>,

    /// Workspace root announced to the backend.
    #[arg(long, default_value = ".")]
    workspace_root: String,

    /// The prompt to run.
    prompt: String,
}

/// Dials the backend over TCP. Pool connections (subagents) carry no
/// client tools; the lead connection gets the delegation hook.
struct TcpConnector {
    address: String,
    timeout: Duration,
}

impl TcpConnector {
    async fn dial(&self, handler: Arc<dyn ClientToolHandler>) -> Result<Arc<RpcClient>, RpcError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                RpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", self.address),
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(RpcClient::connect(stream, handler))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Arc<RpcClient>, RpcError> {
        self.dial(Arc::new(NullToolHandler)).await
    }
}

/// Stream lead deltas to stdout; everything else goes through tracing.
fn spawn_printer(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::Delta { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::SubagentSpawned {
            agent_id,
            task_type,
            description,
            ..
        } => {
            info!(%agent_id, %task_type, description, "subagent spawned");
        }
        AgentEvent::SubagentCompleted {
            agent_id,
            status,
            duration_ms,
            ..
        } => {
            info!(%agent_id, ?status, duration_ms, "subagent resolved");
        }
        AgentEvent::TeamStarted {
            round, task_count, ..
        } => {
            info!(round, task_count, "waiting on delegated tasks");
        }
        AgentEvent::TeamFinished {
            round,
            succeeded,
            failed,
            ..
        } => {
            info!(round, succeeded, failed, "delegation round resolved");
        }
        AgentEvent::Error { message, .. } => {
            error!(message, "turn failed");
        }
        AgentEvent::Cancelled { .. } => {
            warn!("turn cancelled");
        }
        other => {
            debug!(
                event_type = other.event_type(),
                conversation_id = %other.conversation_id(),
                "event"
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings = crew_settings::load_settings().unwrap_or_default();
    crew_logging::init(&settings.logging);

    let host = args.host.unwrap_or_else(|| settings.backend.host.clone());
    let port = args.port.unwrap_or(settings.backend.port);
    let connector = Arc::new(TcpConnector {
        address: format!("{host}:{port}"),
        timeout: Duration::from_millis(settings.backend.connect_timeout_ms),
    });

    let bus = Arc::new(EventBus::with_capacity(settings.runtime.event_buffer));
    let pool = Arc::new(ClientPool::new(
        connector.clone(),
        settings.backend.max_clients,
    ));
    let manager = Arc::new(SubagentManager::new(
        pool.clone(),
        bus.clone(),
        SubagentOptions {
            workspace_root: args.workspace_root.clone(),
            default_model: settings.backend.default_model.clone(),
            timeout: Duration::from_millis(settings.runtime.subagent_timeout_ms),
            max_per_round: settings.runtime.max_subagents_per_round,
        },
    ));

    let client = connector
        .dial(Arc::new(DelegationHandler::new(manager.clone())))
        .await
        .with_context(|| format!("failed to connect to {host}:{port}"))?;

    let driver = ConversationDriver::create(
        client.clone(),
        bus.clone(),
        manager,
        DriverOptions {
            workspace_root: args.workspace_root,
            model: args
                .model
                .unwrap_or_else(|| settings.backend.default_model.clone()),
            max_rounds: settings.runtime.max_rounds,
        },
    )
    .await
    .context("failed to create conversation")?;

    let printer = spawn_printer(&bus);
    let outcome = driver
        .send_turn(&args.prompt)
        .await
        .context("turn failed")?;
    println!();
    info!(
        turns = outcome.turns,
        rounds = outcome.rounds,
        "conversation quiescent"
    );

    pool.shutdown();
    client.close();
    printer.abort();
    Ok(())
}
