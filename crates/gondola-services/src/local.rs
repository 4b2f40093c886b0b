//! The unit's own end of the peer capability.
//!
//! [`LocalUnit`] answers peer calls for this unit: link-management commands
//! are applied to the shared [`UnitState`], everything else goes to the
//! [`Controller`] that owns the camera side.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use gondola_core::short_status::{OneByteSummary, ShortStatus};
use gondola_core::Invocation;

use crate::coordinator::{unix_now, Applied, UnitState};
use crate::peer::{Peer, PeerError};

/// Camera-side collaborator of a unit.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Carry out a command the link layer does not handle itself.
    async fn execute(&self, invocation: &Invocation) -> anyhow::Result<()>;

    /// Next payload waiting for downlink, oldest first.
    async fn next_payload(&self) -> anyhow::Result<Option<Bytes>>;

    /// Payloads still waiting.
    async fn queue_depth(&self) -> usize;

    /// Queue the standard image taken nearest `timestamp` for downlink.
    async fn request_standard_image_at(&self, timestamp: f64) -> anyhow::Result<()>;

    /// Fill the camera record fields the controller knows about.
    async fn fill_status(&self, status: &mut ShortStatus);

    /// Whether the acquisition pipeline is running.
    fn pipeline_alive(&self) -> bool {
        false
    }
}

pub struct LocalUnit {
    state: Arc<UnitState>,
    controller: Arc<dyn Controller>,
}

impl LocalUnit {
    pub fn new(state: Arc<UnitState>, controller: Arc<dyn Controller>) -> Self {
        Self { state, controller }
    }

    pub fn state(&self) -> &Arc<UnitState> {
        &self.state
    }

    pub async fn summary(&self) -> OneByteSummary {
        OneByteSummary {
            is_leader: self.state.is_leader(),
            controller_alive: true,
            pipeline_alive: self.controller.pipeline_alive(),
            files_to_downlink: self.controller.queue_depth().await > 0,
            time_synced: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Peer for LocalUnit {
    fn id(&self) -> u8 {
        self.state.cam_id()
    }

    async fn ping(&self) -> Result<(), PeerError> {
        Ok(())
    }

    async fn get_next_payload(&self) -> Result<Option<Bytes>, PeerError> {
        self.controller.next_payload().await.map_err(|e| PeerError::Rejected {
            id: self.id(),
            reason: format!("{e:#}"),
        })
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), PeerError> {
        let rejected = |reason: String| PeerError::Rejected { id: self.id(), reason };
        match self.state.apply(invocation).await {
            Ok(Applied::Done) => Ok(()),
            Ok(Applied::Forward) => self
                .controller
                .execute(invocation)
                .await
                .map_err(|e| rejected(format!("{e:#}"))),
            Err(e) => Err(rejected(e.to_string())),
        }
    }

    async fn short_status(&self) -> Result<Bytes, PeerError> {
        let mut status = ShortStatus::camera();
        let fields = [
            ("message_id", f64::from(self.state.cam_id())),
            ("timestamp", unix_now()),
            ("leader_id", f64::from(self.state.leader_id())),
        ];
        for (name, value) in fields {
            status.set(name, value).map_err(|e| PeerError::Transport(e.to_string()))?;
        }
        self.controller.fill_status(&mut status).await;
        status.mark_unset_invalid();
        status.encode().map_err(|e| PeerError::Transport(e.to_string()))
    }

    async fn summary_byte(&self) -> Result<u8, PeerError> {
        Ok(self.summary().await.encode())
    }

    async fn downlink_queue_depth(&self) -> Result<usize, PeerError> {
        Ok(self.controller.queue_depth().await)
    }

    async fn request_standard_image_at(&self, timestamp: f64) -> Result<(), PeerError> {
        self.controller
            .request_standard_image_at(timestamp)
            .await
            .map_err(|e| PeerError::Rejected {
                id: self.id(),
                reason: format!("{e:#}"),
            })
    }
}
