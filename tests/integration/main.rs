//! Gondola integration test harness.
//!
//! Every test builds a small payload in one process. Each unit gets its own
//! RPC socket on 127.0.0.1 answered by `serve_rpc`, and the coordinator under
//! test reaches the other units through `NetworkPeer`, the same way gondolad
//! wires them.
//!
//!   cargo test --test integration

mod commanding;
mod election;
mod files;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use gondola_core::command_table::standard_registry;
use gondola_core::config::GroupsConfig;
use gondola_core::short_status::ShortStatus;
use gondola_core::{CommandPacket, Invocation, Packet};
use gondola_services::{
    new_downlink_set, new_peer_table, serve_rpc, Controller, Coordinator, DownlinkSet,
    HirateDownlink, LocalUnit, NetworkPeer, Peer, UnitState,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const PING_TIMEOUT: Duration = Duration::from_millis(200);

/// Camera side of a test unit: records commands, hands out scripted payloads.
#[derive(Default)]
pub struct ScriptedController {
    executed: Mutex<Vec<Invocation>>,
    payloads: Mutex<VecDeque<Bytes>>,
    refuse: Mutex<Vec<String>>,
    image_requests: Mutex<Vec<f64>>,
}

impl ScriptedController {
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.iter().map(|i| i.name.clone()).collect()
    }

    pub async fn push_payload(&self, payload: impl Into<Bytes>) {
        self.payloads.lock().await.push_back(payload.into());
    }

    pub async fn refuse(&self, command: &str) {
        self.refuse.lock().await.push(command.to_string());
    }

    pub async fn image_requests(&self) -> Vec<f64> {
        self.image_requests.lock().await.clone()
    }
}

#[async_trait]
impl Controller for ScriptedController {
    async fn execute(&self, invocation: &Invocation) -> Result<()> {
        if self.refuse.lock().await.contains(&invocation.name) {
            anyhow::bail!("{} refused", invocation.name);
        }
        self.executed.lock().await.push(invocation.clone());
        Ok(())
    }

    async fn next_payload(&self) -> Result<Option<Bytes>> {
        Ok(self.payloads.lock().await.pop_front())
    }

    async fn queue_depth(&self) -> usize {
        self.payloads.lock().await.len()
    }

    async fn request_standard_image_at(&self, timestamp: f64) -> Result<()> {
        self.image_requests.lock().await.push(timestamp);
        Ok(())
    }

    async fn fill_status(&self, status: &mut ShortStatus) {
        let _ = status.set("focus_step", 2000u16);
    }
}

/// One highrate link fast enough that pacing never holds a test back.
pub fn test_downlinks() -> DownlinkSet {
    let downlinks = new_downlink_set();
    downlinks.insert("highrate".into(), HirateDownlink::new("highrate", 1_000_000, 500));
    downlinks
}

/// A unit answering peer calls on its own loopback socket.
pub struct TestUnit {
    pub id: u8,
    pub addr: SocketAddr,
    pub state: Arc<UnitState>,
    pub controller: Arc<ScriptedController>,
    pub local: Arc<LocalUnit>,
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<Result<()>>>,
}

impl TestUnit {
    pub async fn spawn(id: u8, leader: u8) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let addr = socket.local_addr()?;
        let state = Arc::new(UnitState::new(id, leader, true, test_downlinks()));
        let controller = Arc::new(ScriptedController::default());
        let local = Arc::new(LocalUnit::new(state.clone(), controller.clone()));
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(serve_rpc(socket, local.clone(), shutdown.subscribe()));
        Ok(Self {
            id,
            addr,
            state,
            controller,
            local,
            shutdown,
            task: Some(task),
        })
    }

    /// Stop answering. The socket closes once the server task ends.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn network_peer(&self) -> Arc<dyn Peer> {
        Arc::new(NetworkPeer::new(self.id, self.addr, PING_TIMEOUT))
    }
}

/// A bound socket nobody reads: calls to it time out.
pub async fn silent_peer(id: u8) -> Result<(UdpSocket, Arc<dyn Peer>)> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let peer: Arc<dyn Peer> = Arc::new(NetworkPeer::new(id, socket.local_addr()?, PING_TIMEOUT));
    Ok((socket, peer))
}

/// Coordinator of `local`, reaching `remotes` over the network.
pub fn coordinator(local: &TestUnit, remotes: &[Arc<dyn Peer>]) -> Result<Coordinator> {
    let peers = new_peer_table();
    peers.insert(local.id, local.local.clone() as Arc<dyn Peer>);
    for peer in remotes {
        peers.insert(peer.id(), peer.clone());
    }
    Ok(Coordinator::new(local.state.clone(), peers, standard_registry()?, &GroupsConfig::default())
        .with_ping_timeout(PING_TIMEOUT))
}

/// A science command frame carrying `invocations`.
pub fn command_frame(sequence: u16, destination: u8, invocations: &[Invocation]) -> Result<Bytes> {
    let registry = standard_registry()?;
    let mut payload = Vec::new();
    for invocation in invocations {
        payload.extend_from_slice(&registry.encode_invocation(invocation)?);
    }
    Ok(CommandPacket::new(sequence, destination, payload)?.encode())
}
