//! Unit loop — reads uplink bytes, runs the election, and writes downlink
//! packets. Owns the coordinator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use gondola_services::{Coordinator, UplinkScanner};

const ELECTION_PERIOD: Duration = Duration::from_secs(1);

/// Where released packets go.
pub struct Outputs {
    pub socket: Arc<UdpSocket>,
    /// Link name → destination. Links missing here are dropped.
    pub downlinks: HashMap<String, SocketAddr>,
    pub lowrate: Option<SocketAddr>,
}

pub struct UnitLoop {
    coordinator: Coordinator,
    uplink: Arc<UdpSocket>,
    outputs: Outputs,
    scanner: UplinkScanner,
    loop_interval: Duration,
    last_election: Option<Instant>,
    shutdown: broadcast::Receiver<()>,
}

impl UnitLoop {
    pub fn new(
        coordinator: Coordinator,
        uplink: Arc<UdpSocket>,
        outputs: Outputs,
        loop_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            coordinator,
            uplink,
            outputs,
            scanner: UplinkScanner::new(),
            loop_interval,
            last_election: None,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.loop_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("unit loop shutting down");
                    return Ok(());
                }

                result = self.uplink.recv_from(&mut buf) => {
                    match result {
                        Ok((n, from)) => {
                            tracing::trace!(bytes = n, %from, "uplink bytes");
                            self.on_uplink(&buf[..n]).await;
                        }
                        Err(e) => tracing::warn!(error = %e, "uplink recv failed"),
                    }
                }

                _ = interval.tick() => {
                    self.step(Instant::now()).await;
                }
            }
        }
    }

    async fn on_uplink(&mut self, data: &[u8]) {
        for packet in self.scanner.push(data) {
            let Some(frame) = self.coordinator.handle_uplink(&packet).await else { continue };
            match self.outputs.lowrate {
                Some(addr) => {
                    if let Err(e) = self.outputs.socket.send_to(&frame, addr).await {
                        tracing::warn!(%addr, error = %e, "lowrate send failed");
                    }
                }
                None => tracing::debug!("lowrate disabled, status frame dropped"),
            }
        }
    }

    /// One scheduler pass.
    pub async fn step(&mut self, now: Instant) {
        let election_due = self
            .last_election
            .map_or(true, |last| now.saturating_duration_since(last) >= ELECTION_PERIOD);
        if election_due {
            self.coordinator.determine_leader().await;
            self.last_election = Some(now);
        }

        let released = if self.coordinator.is_leader() {
            self.coordinator.autosend_short_status(now).await;
            self.coordinator.service_downlinks(now).await
        } else {
            self.coordinator.tick_downlinks(now)
        };

        for (link, packet) in released {
            let Some(addr) = self.outputs.downlinks.get(&link) else {
                tracing::trace!(%link, "no address for link, packet dropped");
                continue;
            };
            if let Err(e) = self.outputs.socket.send_to(&packet, *addr).await {
                tracing::warn!(%link, %addr, error = %e, "downlink send failed");
            }
        }
    }
}
