//! Peers: the units a leader relays commands to and pulls data from.
//!
//! A unit reaches every unit through the same [`Peer`] trait, itself
//! included, so the leader path never special-cases its own id.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use dashmap::DashMap;
use gondola_core::Invocation;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerError {
    #[error("unit {id} unreachable: {reason}")]
    Unreachable { id: u8, reason: String },
    #[error("unit {id} did not answer within {after_ms} ms")]
    Timeout { id: u8, after_ms: u64 },
    #[error("unit {id} rejected the call: {reason}")]
    Rejected { id: u8, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Remote operations one unit exposes to the others.
#[async_trait]
pub trait Peer: Send + Sync {
    fn id(&self) -> u8;

    /// Liveness check. `Ok(())` means the unit is up and answering.
    async fn ping(&self) -> Result<(), PeerError>;

    /// Next chunk of data the unit wants downlinked, if any.
    async fn get_next_payload(&self) -> Result<Option<Bytes>, PeerError>;

    /// Run one decoded command on the unit.
    async fn invoke(&self, invocation: &Invocation) -> Result<(), PeerError>;

    /// Encoded short status of the unit.
    async fn short_status(&self) -> Result<Bytes, PeerError>;

    /// One-byte health summary of the unit.
    async fn summary_byte(&self) -> Result<u8, PeerError>;

    /// Payloads the unit still has waiting for downlink.
    async fn downlink_queue_depth(&self) -> Result<usize, PeerError>;

    /// Queue the standard image taken nearest `timestamp` (Unix seconds).
    async fn request_standard_image_at(&self, timestamp: f64) -> Result<(), PeerError>;
}

/// Unit id → handle.
pub type PeerTable = Arc<DashMap<u8, Arc<dyn Peer>>>;

pub fn new_peer_table() -> PeerTable {
    Arc::new(DashMap::new())
}

// ── Loopback peer ─────────────────────────────────────────────────────────────

/// In-process peer with scripted behaviour, for tests and simulations.
pub struct LoopbackPeer {
    id: u8,
    alive: AtomicBool,
    payloads: Mutex<VecDeque<Bytes>>,
    invocations: Mutex<Vec<Invocation>>,
    status: Mutex<Bytes>,
    summary: AtomicU8,
    reject: Mutex<Option<String>>,
    image_requests: Mutex<Vec<f64>>,
}

impl LoopbackPeer {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            payloads: Mutex::new(VecDeque::new()),
            invocations: Mutex::new(Vec::new()),
            status: Mutex::new(Bytes::new()),
            summary: AtomicU8::new(0),
            reject: Mutex::new(None),
            image_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub async fn push_payload(&self, payload: impl Into<Bytes>) {
        self.payloads.lock().await.push_back(payload.into());
    }

    pub async fn set_status(&self, status: Bytes) {
        *self.status.lock().await = status;
    }

    pub fn set_summary(&self, summary: u8) {
        self.summary.store(summary, Ordering::SeqCst);
    }

    /// Make every later `invoke` fail with `reason`.
    pub async fn reject_invocations(&self, reason: impl Into<String>) {
        *self.reject.lock().await = Some(reason.into());
    }

    pub async fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().await.clone()
    }

    /// Timestamps of every standard image requested so far.
    pub async fn image_requests(&self) -> Vec<f64> {
        self.image_requests.lock().await.clone()
    }

    fn check_alive(&self) -> Result<(), PeerError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PeerError::Unreachable {
                id: self.id,
                reason: "down".into(),
            })
        }
    }
}

#[async_trait]
impl Peer for LoopbackPeer {
    fn id(&self) -> u8 {
        self.id
    }

    async fn ping(&self) -> Result<(), PeerError> {
        self.check_alive()
    }

    async fn get_next_payload(&self) -> Result<Option<Bytes>, PeerError> {
        self.check_alive()?;
        Ok(self.payloads.lock().await.pop_front())
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), PeerError> {
        self.check_alive()?;
        if let Some(reason) = self.reject.lock().await.clone() {
            return Err(PeerError::Rejected { id: self.id, reason });
        }
        self.invocations.lock().await.push(invocation.clone());
        Ok(())
    }

    async fn short_status(&self) -> Result<Bytes, PeerError> {
        self.check_alive()?;
        Ok(self.status.lock().await.clone())
    }

    async fn summary_byte(&self) -> Result<u8, PeerError> {
        self.check_alive()?;
        Ok(self.summary.load(Ordering::SeqCst))
    }

    async fn downlink_queue_depth(&self) -> Result<usize, PeerError> {
        self.check_alive()?;
        Ok(self.payloads.lock().await.len())
    }

    async fn request_standard_image_at(&self, timestamp: f64) -> Result<(), PeerError> {
        self.check_alive()?;
        self.image_requests.lock().await.push(timestamp);
        Ok(())
    }
}
