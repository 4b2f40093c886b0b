//! gondolad — per-unit daemon of the gondola camera payload.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use gondola_core::command_table::standard_registry;
use gondola_core::config::GondolaConfig;
use gondola_services::{
    new_peer_table, serve_rpc, Coordinator, LocalUnit, NetworkPeer, Peer, UnitState,
};

mod controller;
mod status;
mod unit;

use controller::OutboxController;

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("failed to resolve {addr}"))?
        .next()
        .with_context(|| format!("no address for {addr}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GondolaConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GondolaConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        GondolaConfig::default()
    });

    let cam_id = config.unit.cam_id;
    tracing::info!(cam_id, "gondolad starting");

    let peer_addresses = config.peer_addresses()?;
    let mut peer_ids: Vec<u8> = peer_addresses.keys().copied().collect();
    if !peer_ids.contains(&cam_id) {
        peer_ids.push(cam_id);
        peer_ids.sort_unstable();
    }

    // Shared state
    let state = Arc::new(UnitState::from_config(&config, &peer_ids));
    // Every outbox payload must fit one file id on the smallest link.
    let max_payload = state
        .downlinks()
        .iter()
        .map(|link| link.max_payload())
        .min()
        .unwrap_or(controller::MAX_PAYLOAD)
        .min(controller::MAX_PAYLOAD);
    let controller = Arc::new(
        OutboxController::new(
            state.clone(),
            peer_ids.clone(),
            config.unit.outbox_dir.clone(),
            config.unit.spool_dir.clone(),
        )
        .with_max_payload(max_payload),
    );
    match controller.prepare_outbox().await {
        Ok(dir) => tracing::info!(outbox = %dir.display(), max_payload, "outbox ready"),
        Err(e) => tracing::warn!(error = %e, "outbox unavailable, no files will be downlinked from it"),
    }
    let local: Arc<LocalUnit> = Arc::new(LocalUnit::new(state.clone(), controller));

    // Peers
    let ping_timeout = Duration::from_millis(config.unit.ping_timeout_ms);
    let peers = new_peer_table();
    peers.insert(cam_id, local.clone() as Arc<dyn Peer>);
    for (&id, addr) in &peer_addresses {
        if id == cam_id {
            continue;
        }
        match resolve(addr).await {
            Ok(addr) => {
                peers.insert(id, Arc::new(NetworkPeer::new(id, addr, ping_timeout)) as Arc<dyn Peer>);
                tracing::info!(unit = id, %addr, "peer configured");
            }
            Err(e) => tracing::warn!(unit = id, error = %e, "peer skipped"),
        }
    }

    let registry = standard_registry().context("failed to build command registry")?;
    let coordinator = Coordinator::new(state.clone(), peers, registry, &config.groups)
        .with_ping_timeout(ping_timeout)
        .with_short_status_interval(Duration::from_secs(config.unit.short_status_interval_s))
        .with_synchronized_image_delay(
            Duration::try_from_secs_f64(config.unit.synchronized_image_delay_s).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "invalid synchronized image delay, using 2 s");
                Duration::from_secs(2)
            }),
        );

    // Sockets
    let rpc_socket = Arc::new(
        UdpSocket::bind(format!("{}:{}", config.rpc.bind, config.rpc.port))
            .await
            .context("failed to bind rpc socket")?,
    );
    tracing::info!(addr = %rpc_socket.local_addr()?, "rpc listening");

    let uplink_socket = Arc::new(
        UdpSocket::bind(format!("{}:{}", config.uplink.bind, config.uplink.port))
            .await
            .context("failed to bind uplink socket")?,
    );
    tracing::info!(addr = %uplink_socket.local_addr()?, "uplink listening");

    let output_socket = Arc::new(
        UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind downlink socket")?,
    );
    let mut downlinks = HashMap::new();
    for (name, link) in &config.downlinks {
        if link.address.is_empty() {
            continue;
        }
        match resolve(&link.address).await {
            Ok(addr) => {
                tracing::info!(link = %name, %addr, bytes_per_second = link.bytes_per_second, "downlink configured");
                downlinks.insert(name.clone(), addr);
            }
            Err(e) => tracing::warn!(link = %name, error = %e, "downlink skipped"),
        }
    }
    let lowrate = if config.lowrate.address.is_empty() {
        None
    } else {
        Some(resolve(&config.lowrate.address).await?)
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let rpc_task = tokio::spawn(serve_rpc(rpc_socket, local, shutdown_tx.subscribe()));

    let unit_task = tokio::spawn(
        unit::UnitLoop::new(
            coordinator,
            uplink_socket,
            unit::Outputs {
                socket: output_socket,
                downlinks,
                lowrate,
            },
            Duration::from_millis(config.unit.loop_interval_ms.max(1)),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let status_task = {
        let state = status::StatusState {
            unit: state.clone(),
            peers: peer_ids,
        };
        tokio::spawn(status::serve(state, config.status.port, shutdown_tx.subscribe()))
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = rpc_task           => tracing::error!("rpc task exited: {:?}", r),
        r = unit_task          => tracing::error!("unit loop exited: {:?}", r),
        r = status_task        => tracing::error!("status server exited: {:?}", r),
    }

    Ok(())
}
