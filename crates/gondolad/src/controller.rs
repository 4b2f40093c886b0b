//! Outbox controller — the camera side of a unit as the daemon runs it.
//!
//! Files dropped into the outbox directory are downlinked oldest first.
//! Command results (requested files, shell output, reports) are queued ahead
//! of the outbox so they go out on the next poll.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use gondola_core::short_status::ShortStatus;
use gondola_core::Invocation;
use gondola_services::{Controller, UnitState};

use crate::status::unit_report;

/// Largest payload handed out per poll. Bigger outbox files are split.
pub const MAX_PAYLOAD: usize = 30_000;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraSettings {
    pub focus_step: Option<u16>,
    pub exposure_us: Option<u32>,
    pub row_offset: u16,
    pub column_offset: u16,
    pub num_rows: u16,
    pub num_columns: u16,
    pub scale_by: f64,
    pub quality: f64,
    pub image_requests: u32,
    /// Capture time of the last synchronized standard image asked for.
    pub synchronized_image_at: Option<f64>,
}

pub struct OutboxController {
    state: Arc<UnitState>,
    peers: Vec<u8>,
    outbox_dir: PathBuf,
    spool_dir: PathBuf,
    max_payload: usize,
    pending: Mutex<VecDeque<Bytes>>,
    settings: Mutex<CameraSettings>,
}

impl OutboxController {
    pub fn new(state: Arc<UnitState>, peers: Vec<u8>, outbox_dir: PathBuf, spool_dir: PathBuf) -> Self {
        Self {
            state,
            peers,
            outbox_dir,
            spool_dir,
            max_payload: MAX_PAYLOAD,
            pending: Mutex::new(VecDeque::new()),
            settings: Mutex::new(CameraSettings::default()),
        }
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload.max(1);
        self
    }

    /// Create the outbox directory if it is missing.
    pub async fn prepare_outbox(&self) -> Result<&Path> {
        tokio::fs::create_dir_all(&self.outbox_dir)
            .await
            .with_context(|| format!("failed to create outbox {}", self.outbox_dir.display()))?;
        Ok(&self.outbox_dir)
    }

    pub async fn settings(&self) -> CameraSettings {
        self.settings.lock().await.clone()
    }

    async fn queue(&self, data: &[u8]) {
        let mut pending = self.pending.lock().await;
        for chunk in data.chunks(self.max_payload) {
            pending.push_back(Bytes::copy_from_slice(chunk));
        }
    }

    /// Move the oldest outbox file into the pending queue.
    async fn take_outbox_file(&self) -> Result<bool> {
        let Some(path) = oldest_file(&self.outbox_dir).await? else {
            return Ok(false);
        };
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to remove {}", path.display()))?;
        tracing::info!(path = %path.display(), bytes = data.len(), "outbox file queued");
        self.queue(&data).await;
        Ok(true)
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn request_specific_file(&self, invocation: &Invocation) -> Result<()> {
        let max = invocation.int("max_num_bytes")?;
        let request_id = invocation.int("request_id")?;
        let filename = String::from_utf8_lossy(invocation.bytes("filename")?).into_owned();
        let data = read_part(Path::new(&filename), max).await?;
        tracing::info!(request_id, filename = %filename, bytes = data.len(), "requested file queued");
        self.queue(&data).await;
        Ok(())
    }

    async fn run_shell_command(&self, invocation: &Invocation) -> Result<()> {
        let max = usize::try_from(invocation.int("max_num_bytes_returned")?)?;
        let request_id = invocation.int("request_id")?;
        let timeout = Duration::try_from_secs_f64(invocation.float("timeout")?)
            .context("invalid shell command timeout")?;
        let command_line = String::from_utf8_lossy(invocation.bytes("command_line")?).into_owned();

        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .with_context(|| format!("failed to create {}", self.spool_dir.display()))?;
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command_line)
            .current_dir(&self.spool_dir)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(timeout, child).await {
            Ok(output) => output.with_context(|| format!("failed to spawn '{}'", command_line))?,
            Err(_) => bail!("'{}' timed out after {:?}", command_line, timeout),
        };

        let mut data = output.stdout;
        data.extend_from_slice(&output.stderr);
        data.truncate(max);
        tracing::info!(
            request_id,
            exit_code = output.status.code().unwrap_or(-1),
            bytes = data.len(),
            "shell command finished"
        );
        self.queue(&data).await;
        Ok(())
    }

    async fn get_status_report(&self, invocation: &Invocation) -> Result<()> {
        let compress = invocation.int("compress")? != 0;
        let report = StatusReport {
            unit: unit_report(&self.state, &self.peers).await,
            camera: self.settings().await,
            outbox_waiting: count_files(&self.outbox_dir).await,
        };
        let text = if compress {
            serde_json::to_vec(&report)?
        } else {
            serde_json::to_vec_pretty(&report)?
        };
        self.queue(&text).await;
        Ok(())
    }

    async fn get_command_history(&self) -> Result<()> {
        let text = self.state.log().lock().await.to_json()?;
        self.queue(text.as_bytes()).await;
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusReport {
    unit: crate::status::UnitReport,
    camera: CameraSettings,
    outbox_waiting: usize,
}

#[async_trait]
impl Controller for OutboxController {
    async fn execute(&self, invocation: &Invocation) -> Result<()> {
        match invocation.name.as_str() {
            "set_focus" => {
                let step = u16::try_from(invocation.int("focus_step")?)?;
                self.settings.lock().await.focus_step = Some(step);
                tracing::info!(focus_step = step, "focus set");
            }
            "set_exposure" => {
                let us = u32::try_from(invocation.int("exposure_time_us")?)?;
                self.settings.lock().await.exposure_us = Some(us);
                tracing::info!(exposure_us = us, "exposure set");
            }
            "set_standard_image_parameters" => {
                let mut s = self.settings.lock().await;
                s.row_offset = u16::try_from(invocation.int("row_offset")?)?;
                s.column_offset = u16::try_from(invocation.int("column_offset")?)?;
                s.num_rows = u16::try_from(invocation.int("num_rows")?)?;
                s.num_columns = u16::try_from(invocation.int("num_columns")?)?;
                s.scale_by = invocation.float("scale_by")?;
                s.quality = invocation.float("quality")?;
            }
            "request_specific_images" => {
                let request_id = invocation.int("request_id")?;
                let num_images = invocation.int("num_images")?;
                self.settings.lock().await.image_requests += 1;
                tracing::info!(request_id, num_images, "image request recorded");
            }
            "request_specific_file" => self.request_specific_file(invocation).await?,
            "run_shell_command" => self.run_shell_command(invocation).await?,
            "get_status_report" => self.get_status_report(invocation).await?,
            "get_command_history" => self.get_command_history().await?,
            "flush_downlink_queues" => {
                let dropped = {
                    let mut pending = self.pending.lock().await;
                    let n = pending.len();
                    pending.clear();
                    n
                };
                tracing::info!(dropped, "pending payloads flushed");
            }
            other => bail!("unsupported command {other}"),
        }
        Ok(())
    }

    async fn next_payload(&self) -> Result<Option<Bytes>> {
        if let Some(payload) = self.pending.lock().await.pop_front() {
            return Ok(Some(payload));
        }
        if !self.take_outbox_file().await? {
            return Ok(None);
        }
        Ok(self.pending.lock().await.pop_front())
    }

    async fn queue_depth(&self) -> usize {
        self.pending.lock().await.len() + count_files(&self.outbox_dir).await
    }

    async fn request_standard_image_at(&self, timestamp: f64) -> Result<()> {
        let mut settings = self.settings.lock().await;
        settings.image_requests += 1;
        settings.synchronized_image_at = Some(timestamp);
        tracing::info!(timestamp, "synchronized standard image requested");
        Ok(())
    }

    async fn fill_status(&self, status: &mut ShortStatus) {
        let settings = self.settings().await;
        if let Some(step) = settings.focus_step {
            let _ = status.set("focus_step", step);
        }
        if let Some(us) = settings.exposure_us {
            let _ = status.set("exposure_us", us);
        }
    }
}

// ── Files ─────────────────────────────────────────────────────────────────────

async fn outbox_entries(dir: &Path) -> Vec<(std::time::SystemTime, PathBuf)> {
    let mut entries = Vec::new();
    let Ok(mut read) = tokio::fs::read_dir(dir).await else {
        return entries;
    };
    while let Ok(Some(entry)) = read.next_entry().await {
        let Ok(meta) = entry.metadata().await else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        entries.push((modified, entry.path()));
    }
    entries
}

async fn oldest_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = outbox_entries(dir).await;
    entries.sort();
    Ok(entries.into_iter().next().map(|(_, path)| path))
}

async fn count_files(dir: &Path) -> usize {
    outbox_entries(dir).await.len()
}

/// Whole file for 0, the first `max` bytes for positive, the last `-max` for negative.
async fn read_part(path: &Path, max: i64) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata().await?.len();
    let mut data = Vec::new();
    match max {
        0 => {
            file.read_to_end(&mut data).await?;
        }
        n if n > 0 => {
            file.take(n.unsigned_abs()).read_to_end(&mut data).await?;
        }
        n => {
            let start = len.saturating_sub(n.unsigned_abs());
            file.seek(std::io::SeekFrom::Start(start)).await?;
            file.read_to_end(&mut data).await?;
        }
    }
    Ok(data)
}
