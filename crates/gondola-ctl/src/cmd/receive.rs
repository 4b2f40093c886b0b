//! Ground receiver: recover files and status records from downlinked bytes.
//!
//! Datagrams normally carry ground-link packets from the GSE. Hirate payloads
//! hold a stream of file fragments; lowrate payloads hold one status record.
//! With `--raw` the datagrams are what a unit writes to its links directly.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;

use gondola_core::short_status::ShortStatus;
use gondola_core::stuffing::{unstuff, ESCAPE_BYTE};
use gondola_core::wire::SIP_START_BYTE;
use gondola_core::{FilePacket, GroundPacket, StreamScanner};
use gondola_services::{store_completed, unframe_lowrate, CompletedFile, FileReassembler};

use super::flag_value;

#[derive(Debug)]
pub enum Received {
    Status(ShortStatus),
    File(CompletedFile),
}

pub struct Receiver {
    raw: bool,
    unstuff: bool,
    ground: StreamScanner<GroundPacket>,
    files: StreamScanner<FilePacket>,
    reassembler: FileReassembler,
}

impl Receiver {
    pub fn new(raw: bool, unstuff: bool) -> Self {
        Self {
            raw,
            unstuff,
            ground: StreamScanner::new(),
            files: StreamScanner::new(),
            reassembler: FileReassembler::new(),
        }
    }

    pub async fn handle(&mut self, datagram: &[u8]) -> Vec<Received> {
        let mut received = Vec::new();
        if self.raw {
            if datagram.first() == Some(&SIP_START_BYTE) {
                received.extend(self.lowrate(datagram));
            } else {
                received.extend(self.hirate(datagram).await);
            }
            return received;
        }

        for packet in self.ground.push(datagram) {
            if packet.is_lowrate() {
                received.extend(self.lowrate(&packet.payload));
            } else if packet.is_hirate() {
                received.extend(self.hirate(&packet.payload).await);
            } else {
                tracing::debug!(origin = packet.origin, "ignoring packet of unknown origin");
            }
        }
        received
    }

    fn lowrate(&self, payload: &[u8]) -> Option<Received> {
        let record = unframe_lowrate(payload).unwrap_or(payload);
        match ShortStatus::decode_any(record) {
            Ok(status) => Some(Received::Status(status)),
            Err(e) => {
                tracing::warn!(error = %e, bytes = record.len(), "undecodable lowrate payload");
                None
            }
        }
    }

    async fn hirate(&mut self, data: &[u8]) -> Vec<Received> {
        let mut completed = Vec::new();
        for mut packet in self.files.push(data) {
            if self.unstuff {
                match unstuff(&packet.payload, ESCAPE_BYTE) {
                    Ok(plain) => packet.payload = Bytes::from(plain),
                    Err(e) => {
                        tracing::warn!(file_id = packet.file_id, error = %e, "failed to unstuff fragment");
                        continue;
                    }
                }
            }
            if let Some(file) = self.reassembler.add_fragment(packet).await {
                completed.push(Received::File(file));
            }
        }
        completed
    }
}

pub async fn cmd_receive(args: &[&str]) -> Result<()> {
    let mut port: u16 = 4002;
    let mut out = PathBuf::from("downlink");
    let mut raw = false;
    let mut unstuff = false;

    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--listen" => {
                port = flag_value(args, &mut i, "--listen")?
                    .parse()
                    .context("--listen must be a port number")?;
            }
            "--out" => out = PathBuf::from(flag_value(args, &mut i, "--out")?),
            "--raw" => raw = true,
            "--unstuff" => unstuff = true,
            other => anyhow::bail!("unexpected receive argument {other}"),
        }
        i += 1;
    }

    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    println!("Listening on {} → {}", socket.local_addr()?, out.display());

    let mut receiver = Receiver::new(raw, unstuff);
    let mut buf = vec![0u8; 65_536];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            result = socket.recv_from(&mut buf) => {
                let (n, _) = result.context("receive failed")?;
                for item in receiver.handle(&buf[..n]).await {
                    match item {
                        Received::Status(status) => print_status(&status),
                        Received::File(file) => {
                            let path = store_completed(&out, &file)?;
                            println!("  file {} complete: {} bytes → {}", file.file_id, file.data.len(), path.display());
                        }
                    }
                }
            }
        }
    }
}

fn print_status(status: &ShortStatus) {
    println!("── short status ({:?}) ──", status.kind());
    for (name, value) in status.entries() {
        match value {
            Some(v) => println!("  {name:<28} {v}"),
            None => println!("  {name:<28} -"),
        }
    }
}
