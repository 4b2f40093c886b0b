//! Leader coordination.
//!
//! Every unit runs a [`Coordinator`]. It decides who leads, dispatches
//! uplinked command packets to their destination units and, on the leader,
//! polls units round-robin for downlink data and assembles status summaries.
//!
//! [`UnitState`] is the part shared with the RPC side: leadership, polling
//! order, the downlink queues and the command log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Mutex;

use gondola_core::command::LIST_ARGUMENT;
use gondola_core::command_table::{
    destination_name, DESTINATION_ALL_CAMERAS, DESTINATION_NARROWFIELD_CAMERAS, DESTINATION_SUPER_COMMAND,
    DESTINATION_WIDEFIELD_CAMERAS, MAX_CAMERA_ID, USE_BULLY_ELECTION,
};
use gondola_core::config::{GondolaConfig, GroupsConfig};
use gondola_core::short_status::{ShortStatus, StatusError, NO_RESPONSE_SUMMARY};
use gondola_core::wire::{CommandPacket, Packet};
use gondola_core::{CommandError, CommandRegistry, Invocation};

use crate::command_log::{CommandLogger, CommandStatus};
use crate::downlink::{frame_lowrate, new_downlink_set, DownlinkSet, HirateDownlink};
use crate::peer::{Peer, PeerTable};
use crate::uplink::UplinkPacket;

/// Links reported in the leader status record.
const REPORTED_LINKS: [&str; 3] = ["highrate", "openport", "los"];

/// Short status frames assume about this many bytes.
const SHORT_STATUS_APPROX_BYTES: f64 = 100.0;

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ── Shared unit state ─────────────────────────────────────────────────────────

/// What applying a command to the unit state left to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Fully handled here.
    Done,
    /// Still needs the camera controller.
    Forward,
}

#[derive(Debug, Default)]
struct PollingOrder {
    order: Vec<u8>,
    index: usize,
}

pub struct UnitState {
    cam_id: u8,
    leader_id: AtomicU8,
    election_enabled: AtomicBool,
    synchronize_images: AtomicBool,
    file_id: AtomicU32,
    polling: Mutex<PollingOrder>,
    downlinks: DownlinkSet,
    log: Mutex<CommandLogger>,
}

impl UnitState {
    pub fn new(cam_id: u8, initial_leader_id: u8, election_enabled: bool, downlinks: DownlinkSet) -> Self {
        Self {
            cam_id,
            leader_id: AtomicU8::new(initial_leader_id),
            election_enabled: AtomicBool::new(election_enabled),
            synchronize_images: AtomicBool::new(false),
            file_id: AtomicU32::new(0),
            polling: Mutex::new(PollingOrder::default()),
            downlinks,
            log: Mutex::new(CommandLogger::new()),
        }
    }

    /// State for the unit `config` describes, with its downlinks and the
    /// configured polling order (every peer by id when none is given).
    pub fn from_config(config: &GondolaConfig, peer_ids: &[u8]) -> Self {
        let downlinks = new_downlink_set();
        for (name, link) in &config.downlinks {
            downlinks.insert(name.clone(), HirateDownlink::from_config(name, link));
        }
        let order = if config.unit.polling_order.is_empty() {
            let mut ids = peer_ids.to_vec();
            ids.sort_unstable();
            ids
        } else {
            config.unit.polling_order.clone()
        };
        Self::new(
            config.unit.cam_id,
            config.unit.initial_leader_id,
            config.unit.election_enabled,
            downlinks,
        )
        .with_polling_order(order)
    }

    pub fn with_polling_order(mut self, order: Vec<u8>) -> Self {
        self.polling = Mutex::new(PollingOrder { order, index: 0 });
        self
    }

    pub fn cam_id(&self) -> u8 {
        self.cam_id
    }

    pub fn leader_id(&self) -> u8 {
        self.leader_id.load(Ordering::SeqCst)
    }

    pub fn is_leader(&self) -> bool {
        self.leader_id() == self.cam_id
    }

    pub fn election_enabled(&self) -> bool {
        self.election_enabled.load(Ordering::SeqCst)
    }

    pub fn synchronize_images(&self) -> bool {
        self.synchronize_images.load(Ordering::SeqCst)
    }

    pub fn downlinks(&self) -> &DownlinkSet {
        &self.downlinks
    }

    pub fn log(&self) -> &Mutex<CommandLogger> {
        &self.log
    }

    /// File id for the next enqueued payload; increments on every call.
    pub fn next_file_id(&self) -> u32 {
        self.file_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_file_id(&self) -> u32 {
        self.file_id.load(Ordering::SeqCst)
    }

    pub async fn polling_order(&self) -> Vec<u8> {
        self.polling.lock().await.order.clone()
    }

    pub async fn set_polling_order(&self, order: Vec<u8>) {
        tracing::info!(?order, "peer polling order set");
        *self.polling.lock().await = PollingOrder { order, index: 0 };
    }

    /// True when the next poll begins a pass over the polling order.
    pub async fn polling_round_starts(&self) -> bool {
        let polling = self.polling.lock().await;
        !polling.order.is_empty() && polling.index % polling.order.len() == 0
    }

    /// Unit to poll next; advances the round robin.
    pub async fn next_polled_unit(&self) -> Option<u8> {
        let mut polling = self.polling.lock().await;
        if polling.order.is_empty() {
            return None;
        }
        let index = polling.index % polling.order.len();
        polling.index = (index + 1) % polling.order.len();
        Some(polling.order[index])
    }

    async fn record(&self, sequence_number: u16, status: CommandStatus, details: impl Into<String>) {
        self.log.lock().await.add(sequence_number, status, details);
    }

    fn set_leader(&self, leader_id: u8) {
        if leader_id == self.cam_id {
            self.election_enabled.store(false, Ordering::SeqCst);
            if self.is_leader() {
                tracing::info!("requested to become leader, already leader");
            } else {
                tracing::info!("becoming leader by direct command");
                self.leader_id.store(leader_id, Ordering::SeqCst);
            }
        } else if leader_id == USE_BULLY_ELECTION {
            tracing::info!("leadership returned to the election");
            self.election_enabled.store(true, Ordering::SeqCst);
        } else {
            if self.is_leader() {
                tracing::warn!(leader_id, "was leader, another unit has been commanded to lead");
            } else {
                tracing::info!(leader_id, "unit commanded to lead");
            }
            self.leader_id.store(leader_id, Ordering::SeqCst);
            self.election_enabled.store(false, Ordering::SeqCst);
        }
    }

    /// Apply the part of a command that concerns link management.
    pub async fn apply(&self, invocation: &Invocation) -> Result<Applied, CommandError> {
        match invocation.name.as_str() {
            "set_peer_polling_order" => {
                let order = invocation
                    .list(LIST_ARGUMENT)?
                    .iter()
                    .map(|v| {
                        v.as_i64().and_then(|id| u8::try_from(id).ok()).ok_or_else(|| CommandError::WrongType {
                            argument: LIST_ARGUMENT.to_string(),
                            expected: "unit id",
                        })
                    })
                    .collect::<Result<Vec<u8>, _>>()?;
                self.set_polling_order(order).await;
                Ok(Applied::Done)
            }
            "flush_downlink_queues" => {
                for mut link in self.downlinks.iter_mut() {
                    link.flush();
                }
                Ok(Applied::Forward)
            }
            "use_synchronized_images" => {
                let synchronize = invocation.int("synchronize")? != 0;
                tracing::info!(synchronize, "synchronized images");
                self.synchronize_images.store(synchronize, Ordering::SeqCst);
                Ok(Applied::Done)
            }
            "set_leader" => {
                self.set_leader(int_arg(invocation, "leader_id", "u8")?);
                Ok(Applied::Done)
            }
            "set_downlink_bandwidth" => {
                for mut link in self.downlinks.iter_mut() {
                    let name = link.key().clone();
                    if REPORTED_LINKS.contains(&name.as_str()) {
                        link.set_bandwidth(int_arg(invocation, &name, "u32")?);
                    } else {
                        tracing::error!(link = %name, "unknown link, can't set its bandwidth");
                    }
                }
                Ok(Applied::Done)
            }
            _ => Ok(Applied::Forward),
        }
    }
}

fn int_arg<T: TryFrom<i64>>(invocation: &Invocation, key: &str, ty: &'static str) -> Result<T, CommandError> {
    let value = invocation.int(key)?;
    T::try_from(value).map_err(|_| CommandError::OutOfRange {
        argument: key.to_string(),
        value: value.to_string(),
        ty,
    })
}

// ── Coordinator ───────────────────────────────────────────────────────────────

/// One entry of the status rotation answered to science data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Leader,
    Camera(u8),
    Lidar,
}

fn default_status_order() -> Vec<StatusSource> {
    let mut order = vec![StatusSource::Leader];
    order.extend((0..=MAX_CAMERA_ID).map(StatusSource::Camera));
    order.push(StatusSource::Lidar);
    order
}

/// Destination code → member unit ids.
pub fn destination_table(cam_id: u8, peer_ids: &[u8], groups: &GroupsConfig) -> HashMap<u8, Vec<u8>> {
    let mut table: HashMap<u8, Vec<u8>> = peer_ids.iter().map(|&id| (id, vec![id])).collect();

    let mut all: Vec<u8> = groups.widefield.iter().chain(&groups.narrowfield).copied().collect();
    if all.is_empty() {
        all = peer_ids.to_vec();
    }
    all.sort_unstable();
    all.dedup();

    table.insert(DESTINATION_ALL_CAMERAS, all);
    table.insert(DESTINATION_WIDEFIELD_CAMERAS, groups.widefield.clone());
    table.insert(DESTINATION_NARROWFIELD_CAMERAS, groups.narrowfield.clone());
    table.insert(DESTINATION_SUPER_COMMAND, vec![cam_id]);
    table
}

pub struct Coordinator {
    state: Arc<UnitState>,
    peers: PeerTable,
    registry: CommandRegistry,
    destinations: HashMap<u8, Vec<u8>>,
    status_order: Vec<StatusSource>,
    status_index: usize,
    ping_timeout: Duration,
    short_status_interval: Option<Duration>,
    last_autosend: Option<Instant>,
    synchronized_image_delay: Duration,
}

impl Coordinator {
    /// `peers` must already hold every unit, this one included.
    pub fn new(state: Arc<UnitState>, peers: PeerTable, registry: CommandRegistry, groups: &GroupsConfig) -> Self {
        let mut peer_ids: Vec<u8> = peers.iter().map(|p| *p.key()).collect();
        peer_ids.sort_unstable();
        let destinations = destination_table(state.cam_id(), &peer_ids, groups);
        Self {
            state,
            peers,
            registry,
            destinations,
            status_order: default_status_order(),
            status_index: 0,
            ping_timeout: Duration::from_millis(500),
            short_status_interval: None,
            last_autosend: None,
            synchronized_image_delay: Duration::from_secs(2),
        }
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Zero disables the automatic short status.
    pub fn with_short_status_interval(mut self, interval: Duration) -> Self {
        self.short_status_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// How far in the past synchronized images are requested.
    pub fn with_synchronized_image_delay(mut self, delay: Duration) -> Self {
        self.synchronized_image_delay = delay;
        self
    }

    pub fn state(&self) -> &Arc<UnitState> {
        &self.state
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn destination(&self, code: u8) -> Option<&[u8]> {
        self.destinations.get(&code).map(Vec::as_slice)
    }

    pub fn is_leader(&self) -> bool {
        self.state.is_leader()
    }

    fn peer(&self, id: u8) -> Option<Arc<dyn Peer>> {
        self.peers.get(&id).map(|p| p.value().clone())
    }

    /// Ping `id` under the ping timeout.
    pub async fn check_peer(&self, id: u8) -> bool {
        let Some(peer) = self.peer(id) else {
            tracing::debug!(unit = id, "no such peer");
            return false;
        };
        match tokio::time::timeout(self.ping_timeout, peer.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::debug!(unit = id, error = %e, "ping failed");
                false
            }
            Err(_) => {
                tracing::debug!(unit = id, "ping timed out");
                false
            }
        }
    }

    // ── Election ──────────────────────────────────────────────────────────────

    /// Keep the assumed leader while it answers; elect again once it stops.
    pub async fn determine_leader(&self) -> u8 {
        let leader = self.state.leader_id();
        if !self.state.election_enabled() || leader == self.state.cam_id() {
            return leader;
        }
        if self.check_peer(leader).await {
            return leader;
        }
        tracing::warn!(leader, "leader did not answer, running election");
        self.identify_leader().await
    }

    /// The lowest-numbered unit that answers leads; with no lower unit
    /// answering, this one does.
    pub async fn identify_leader(&self) -> u8 {
        let cam_id = self.state.cam_id();
        let mut lower: Vec<u8> = self.peers.iter().map(|p| *p.key()).filter(|id| *id < cam_id).collect();
        lower.sort_unstable();

        let mut leader = cam_id;
        for id in lower {
            if self.check_peer(id).await {
                leader = id;
                break;
            }
        }
        let previous = self.state.leader_id.swap(leader, Ordering::SeqCst);
        if previous != leader {
            tracing::info!(previous, leader, is_self = leader == cam_id, "leader changed");
        }
        leader
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    pub async fn handle_uplink(&mut self, packet: &UplinkPacket) -> Option<Bytes> {
        match packet {
            UplinkPacket::ScienceDataRequest => {
                if !self.is_leader() {
                    return None;
                }
                let summary = self.next_status_summary().await?;
                match frame_lowrate(&summary) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        tracing::error!(error = %e, "status summary does not fit a lowrate frame");
                        None
                    }
                }
            }
            UplinkPacket::ScienceCommand(frame) => {
                self.process_command_packet(frame).await;
                None
            }
        }
    }

    /// Ping every member of the packet's destination, then run its commands
    /// on each. Returns the logged outcome, or `None` when the packet was
    /// undecodable or not ours to handle.
    pub async fn process_command_packet(&self, frame: &[u8]) -> Option<CommandStatus> {
        let packet = match CommandPacket::decode(frame) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode command packet");
                return None;
            }
        };
        let sequence = packet.sequence_number;
        let destination = packet.destination;

        if destination != DESTINATION_SUPER_COMMAND && !self.is_leader() {
            tracing::debug!(sequence, "not leader and not a super command, ignoring");
            return None;
        }

        let Some(members) = self.destinations.get(&destination).cloned() else {
            let details = format!("unknown destination {}", destination_name(destination));
            tracing::warn!(sequence, %details, "command rejected");
            self.state.record(sequence, CommandStatus::CommandError, details).await;
            return Some(CommandStatus::CommandError);
        };

        let mut unreachable = Vec::new();
        for &id in &members {
            if !self.check_peer(id).await {
                unreachable.push(id);
            }
        }
        if !unreachable.is_empty() {
            let details = format!(
                "ping failure for destination {}, units {unreachable:?}",
                destination_name(destination)
            );
            tracing::warn!(sequence, %details, "command rejected");
            self.state
                .record(sequence, CommandStatus::FailedToPingDestination, details)
                .await;
            return Some(CommandStatus::FailedToPingDestination);
        }

        let invocations = match self.registry.decode_all(&packet.payload) {
            Ok(v) => v,
            Err(e) => {
                let details = format!("failed to decode commands: {e}");
                tracing::warn!(sequence, %details, "command rejected");
                self.state.record(sequence, CommandStatus::CommandError, details).await;
                return Some(CommandStatus::CommandError);
            }
        };

        for &id in &members {
            let Some(peer) = self.peer(id) else { continue };
            for invocation in &invocations {
                tracing::debug!(sequence, unit = id, %invocation, "executing command");
                if let Err(e) = peer.invoke(invocation).await {
                    let details = format!("failure executing {invocation} on unit {id}: {e}");
                    tracing::warn!(sequence, %details, "command failed");
                    self.state.record(sequence, CommandStatus::CommandError, details).await;
                    return Some(CommandStatus::CommandError);
                }
            }
        }

        tracing::info!(
            sequence,
            destination = %destination_name(destination),
            commands = invocations.len(),
            "command packet executed"
        );
        self.state.record(sequence, CommandStatus::Ok, "").await;
        Some(CommandStatus::Ok)
    }

    // ── Status ────────────────────────────────────────────────────────────────

    /// Next non-empty record of the status rotation.
    pub async fn next_status_summary(&mut self) -> Option<Bytes> {
        for _ in 0..self.status_order.len() {
            let source = self.status_order[self.status_index];
            self.status_index = (self.status_index + 1) % self.status_order.len();

            let result = match source {
                StatusSource::Leader => match self.leader_status().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build leader status");
                        None
                    }
                },
                StatusSource::Lidar => None,
                StatusSource::Camera(id) => self.camera_status(id).await,
            };
            if let Some(status) = result.filter(|s| !s.is_empty()) {
                return Some(status);
            }
        }
        None
    }

    async fn camera_status(&self, id: u8) -> Option<Bytes> {
        let peer = self.peer(id)?;
        if !self.check_peer(id).await {
            tracing::warn!(unit = id, "unable to reach unit for short status");
            return None;
        }
        match peer.short_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!(unit = id, error = %e, "short status failed");
                None
            }
        }
    }

    /// The leader record: one summary byte per unit, command log and link stats.
    pub async fn leader_status(&self) -> Result<Bytes, StatusError> {
        let mut status = ShortStatus::leader();
        status.set("timestamp", unix_now())?;
        status.set("leader_id", self.state.leader_id())?;
        for id in 0..=MAX_CAMERA_ID {
            status.set(&format!("status_byte_camera_{id}"), NO_RESPONSE_SUMMARY)?;
        }

        let mut ids: Vec<u8> = self.peers.iter().map(|p| *p.key()).filter(|id| *id <= MAX_CAMERA_ID).collect();
        ids.sort_unstable();
        for id in ids {
            let peer = self.peer(id);
            let byte = match peer {
                Some(peer) if self.check_peer(id).await => match peer.summary_byte().await {
                    Ok(byte) => byte,
                    Err(e) => {
                        tracing::warn!(unit = id, error = %e, "summary byte failed after successful ping");
                        NO_RESPONSE_SUMMARY
                    }
                },
                _ => {
                    tracing::warn!(unit = id, "unit not answering, reporting no response");
                    NO_RESPONSE_SUMMARY
                }
            };
            status.set(&format!("status_byte_camera_{id}"), byte)?;
        }
        status.set("status_byte_lidar", NO_RESPONSE_SUMMARY)?;

        {
            let log = self.state.log.lock().await;
            if let Some(record) = log.latest() {
                status.set("last_command_sequence", record.sequence_number)?;
            }
            if let Some(record) = log.highest_sequence() {
                status.set("highest_command_sequence", record.sequence_number)?;
            }
            if let Some(skip) = log.last_sequence_skip() {
                status.set("last_outstanding_sequence", skip)?;
            }
            status.set("total_commands_received", log.total() as f64)?;
            if let Some(record) = log.last_failed() {
                status.set("last_failed_sequence", record.sequence_number)?;
            }
        }

        status.set("current_file_id", self.state.current_file_id())?;
        for name in REPORTED_LINKS {
            if let Some(link) = self.state.downlinks.get(name) {
                status.set(&format!("bytes_sent_{name}"), link.total_bytes_sent() as f64)?;
                status.set(&format!("packets_queued_{name}"), link.queued_packets() as f64)?;
                status.set(&format!("bytes_per_sec_{name}"), link.bytes_per_second())?;
            }
        }

        // Unknown counters, charge controllers included, go out as invalid.
        status.mark_unset_invalid();
        status.encode()
    }

    // ── Downlinks ─────────────────────────────────────────────────────────────

    fn link_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.downlinks.iter().map(|l| l.key().clone()).collect();
        names.sort();
        names
    }

    async fn fetch_payload(&self, id: u8) -> Option<Bytes> {
        let peer = self.peer(id)?;
        if !self.check_peer(id).await {
            tracing::debug!(unit = id, "skipping unreachable unit for downlink data");
            return None;
        }
        match peer.get_next_payload().await {
            Ok(payload) => payload.filter(|p| !p.is_empty()),
            Err(e) => {
                tracing::warn!(unit = id, error = %e, "failed to get downlink data");
                None
            }
        }
    }

    /// One scheduler pass over every link. A link with capacity pulls the
    /// next payload from the polled unit; any other link releases at most one
    /// packet. Returns the packets to write, by link name.
    pub async fn service_downlinks(&mut self, now: Instant) -> Vec<(String, Bytes)> {
        let mut released = Vec::new();
        for name in self.link_names() {
            let has_capacity = self.state.downlinks.get(&name).is_some_and(|l| l.has_capacity());
            if has_capacity {
                if self.state.synchronize_images() && self.state.polling_round_starts().await {
                    self.request_synchronized_images().await;
                }
                let Some(id) = self.state.next_polled_unit().await else { continue };
                let Some(payload) = self.fetch_payload(id).await else {
                    tracing::trace!(unit = id, link = %name, "no data obtained");
                    continue;
                };
                self.enqueue_payload(&name, id, &payload);
            } else if let Some(mut link) = self.state.downlinks.get_mut(&name) {
                if let Some(packet) = link.tick(now) {
                    released.push((name.clone(), packet));
                }
            }
        }
        released
    }

    /// Queue a polled payload on `name`. A payload too large for one file id
    /// goes out as several consecutive files.
    fn enqueue_payload(&self, name: &str, unit: u8, payload: &[u8]) {
        let Some(mut link) = self.state.downlinks.get_mut(name) else { return };
        let max = link.max_payload().max(1);
        if payload.len() > max {
            tracing::warn!(link = %name, unit, len = payload.len(), max, "payload exceeds one file, splitting");
        }
        for chunk in payload.chunks(max) {
            let file_id = self.state.next_file_id();
            if let Err(e) = link.enqueue(chunk, file_id, false) {
                tracing::error!(link = %name, unit, file_id, len = chunk.len(), error = %e, "payload dropped");
            }
        }
    }

    /// Ask every live unit whose downlink queue is empty for the standard
    /// image taken `synchronized_image_delay` ago, so all cameras send the
    /// same moment. Returns how many units were asked.
    pub async fn request_synchronized_images(&self) -> usize {
        let timestamp = unix_now() - self.synchronized_image_delay.as_secs_f64();
        let mut ids: Vec<u8> = self.peers.iter().map(|p| *p.key()).collect();
        ids.sort_unstable();

        let mut requested = 0;
        for id in ids {
            let Some(peer) = self.peer(id) else { continue };
            if !self.check_peer(id).await {
                continue;
            }
            match peer.downlink_queue_depth().await {
                Ok(0) => {}
                Ok(depth) => {
                    tracing::debug!(unit = id, depth, "unit still has data queued, skipping synchronized image");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(unit = id, error = %e, "queue depth query failed");
                    continue;
                }
            }
            tracing::debug!(unit = id, timestamp, "requesting standard image");
            match peer.request_standard_image_at(timestamp).await {
                Ok(()) => requested += 1,
                Err(e) => tracing::warn!(unit = id, error = %e, "standard image request failed"),
            }
        }
        requested
    }

    /// Release queued packets without pulling new data.
    pub fn tick_downlinks(&self, now: Instant) -> Vec<(String, Bytes)> {
        let mut released = Vec::new();
        for name in self.link_names() {
            if let Some(mut link) = self.state.downlinks.get_mut(&name) {
                if let Some(packet) = link.tick(now) {
                    released.push((name.clone(), packet));
                }
            }
        }
        released
    }

    /// Put a status summary at the head of every link fast enough to carry
    /// one per interval. Returns how many links got one.
    pub async fn autosend_short_status(&mut self, now: Instant) -> usize {
        let Some(interval) = self.short_status_interval else { return 0 };
        if let Some(last) = self.last_autosend {
            if now.saturating_duration_since(last) < interval {
                return 0;
            }
        }

        let needed = SHORT_STATUS_APPROX_BYTES / interval.as_secs_f64();
        let mut sent = 0;
        for name in self.link_names() {
            let bytes_per_second = self.state.downlinks.get(&name).map_or(0, |l| l.bytes_per_second());
            if f64::from(bytes_per_second) <= needed {
                tracing::debug!(link = %name, bytes_per_second, "bandwidth too low for short status");
                continue;
            }
            let Some(summary) = self.next_status_summary().await else { continue };
            let file_id = self.state.next_file_id();
            if let Some(mut link) = self.state.downlinks.get_mut(&name) {
                match link.enqueue(&summary, file_id, true) {
                    Ok(_) => {
                        tracing::info!(link = %name, file_id, "short status queued");
                        self.last_autosend = Some(now);
                        sent += 1;
                    }
                    Err(e) => tracing::warn!(link = %name, error = %e, "failed to queue short status"),
                }
            }
        }
        sent
    }
}
