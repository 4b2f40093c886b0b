//! HTTP status endpoint — exposes unit state as JSON.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use gondola_services::{CommandRecord, UnitState};

#[derive(Clone)]
pub struct StatusState {
    pub unit: Arc<UnitState>,
    pub peers: Vec<u8>,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UnitReport {
    pub cam_id:             u8,
    pub leader_id:          u8,
    pub is_leader:          bool,
    pub election_enabled:   bool,
    pub synchronize_images: bool,
    pub current_file_id:    u32,
    pub peers:              Vec<u8>,
    pub polling_order:      Vec<u8>,
    pub downlinks:          Vec<LinkInfo>,
    pub commands:           CommandInfo,
}

#[derive(Debug, Serialize)]
pub struct LinkInfo {
    pub name:             String,
    pub bytes_per_second: u32,
    pub queued_packets:   usize,
    pub total_bytes_sent: u64,
}

#[derive(Debug, Serialize)]
pub struct CommandInfo {
    pub total:  usize,
    pub latest: Option<CommandRecord>,
    pub last_failed: Option<CommandRecord>,
}

/// Snapshot of the unit, also downlinked by `get_status_report`.
pub async fn unit_report(unit: &UnitState, peers: &[u8]) -> UnitReport {
    let mut downlinks: Vec<LinkInfo> = unit
        .downlinks()
        .iter()
        .map(|l| LinkInfo {
            name:             l.key().clone(),
            bytes_per_second: l.bytes_per_second(),
            queued_packets:   l.queued_packets(),
            total_bytes_sent: l.total_bytes_sent(),
        })
        .collect();
    downlinks.sort_by(|a, b| a.name.cmp(&b.name));

    let commands = {
        let log = unit.log().lock().await;
        CommandInfo {
            total:       log.total(),
            latest:      log.latest().cloned(),
            last_failed: log.last_failed().cloned(),
        }
    };

    UnitReport {
        cam_id:             unit.cam_id(),
        leader_id:          unit.leader_id(),
        is_leader:          unit.is_leader(),
        election_enabled:   unit.election_enabled(),
        synchronize_images: unit.synchronize_images(),
        current_file_id:    unit.current_file_id(),
        peers:              peers.to_vec(),
        polling_order:      unit.polling_order().await,
        downlinks,
        commands,
    }
}

async fn handle_status(State(state): State<StatusState>) -> Json<UnitReport> {
    Json(unit_report(&state.unit, &state.peers).await)
}

// ── /commands ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CommandsResponse {
    pub commands: Vec<CommandRecord>,
}

async fn handle_commands(State(state): State<StatusState>) -> Json<CommandsResponse> {
    let commands = state.unit.log().lock().await.history().to_vec();
    Json(CommandsResponse { commands })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub async fn serve(state: StatusState, port: u16, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/status",   get(handle_status))
        .route("/commands", get(handle_commands))
        .with_state(state);

    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
