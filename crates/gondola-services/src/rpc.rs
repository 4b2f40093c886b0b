//! Peer calls over UDP.
//!
//! One JSON request per datagram, one JSON response back to the sender:
//!
//!   {"op":"ping"}                         → {"ok":"pong"}
//!   {"op":"next_payload"}                 → {"ok":{"payload":"<hex>"|null}}
//!   {"op":"invoke","invocation":{...}}    → {"ok":"done"}
//!   {"op":"short_status"}                 → {"ok":{"status":"<hex>"}}
//!   {"op":"summary_byte"}                 → {"ok":{"summary":12}}
//!   {"op":"queue_depth"}                  → {"ok":{"depth":3}}
//!   {"op":"request_standard_image_at","timestamp":1.7e9} → {"ok":"done"}
//!
//! Failures come back as `{"error":"..."}`. Every client call runs under a
//! timeout so a dead unit costs the caller at most that long.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use gondola_core::Invocation;

use crate::peer::{Peer, PeerError};

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM: usize = 65_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    Ping,
    NextPayload,
    Invoke { invocation: Invocation },
    ShortStatus,
    SummaryByte,
    QueueDepth,
    RequestStandardImageAt { timestamp: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    Pong,
    /// Hex-encoded payload bytes.
    Payload(Option<String>),
    Done,
    Status(String),
    Summary(u8),
    Depth(usize),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<RpcReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(reply: RpcReply) -> Self {
        Self { ok: Some(reply), error: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { ok: None, error: Some(message.into()) }
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// A unit reached over the network.
#[derive(Debug, Clone)]
pub struct NetworkPeer {
    id: u8,
    addr: SocketAddr,
    timeout: Duration,
}

impl NetworkPeer {
    pub fn new(id: u8, addr: SocketAddr, timeout: Duration) -> Self {
        Self { id, addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn call(&self, request: &RpcRequest) -> Result<RpcReply, PeerError> {
        let after_ms = self.timeout.as_millis() as u64;
        match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout { id: self.id, after_ms }),
        }
    }

    async fn exchange(&self, request: &RpcRequest) -> Result<RpcReply, PeerError> {
        let transport = |e: std::io::Error| PeerError::Transport(e.to_string());

        let bind: SocketAddr = if self.addr.is_ipv6() {
            "[::]:0".parse().map_err(|_| PeerError::Transport("bad bind address".into()))?
        } else {
            "0.0.0.0:0".parse().map_err(|_| PeerError::Transport("bad bind address".into()))?
        };
        // A fresh socket per call keeps late replies from answering the next request.
        let socket = UdpSocket::bind(bind).await.map_err(transport)?;
        socket.connect(self.addr).await.map_err(transport)?;

        let body = serde_json::to_vec(request).map_err(|e| PeerError::Transport(e.to_string()))?;
        socket.send(&body).await.map_err(|e| PeerError::Unreachable {
            id: self.id,
            reason: e.to_string(),
        })?;

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = socket.recv(&mut buf).await.map_err(|e| PeerError::Unreachable {
            id: self.id,
            reason: e.to_string(),
        })?;
        let response: RpcResponse =
            serde_json::from_slice(&buf[..len]).map_err(|e| PeerError::Transport(e.to_string()))?;

        match (response.ok, response.error) {
            (_, Some(reason)) => Err(PeerError::Rejected { id: self.id, reason }),
            (Some(reply), None) => Ok(reply),
            (None, None) => Err(PeerError::Transport("empty response".into())),
        }
    }

    fn unexpected(&self, reply: RpcReply) -> PeerError {
        PeerError::Transport(format!("unit {} sent unexpected reply {reply:?}", self.id))
    }

    fn decode_hex(&self, text: &str) -> Result<Bytes, PeerError> {
        hex::decode(text)
            .map(Bytes::from)
            .map_err(|e| PeerError::Transport(format!("bad hex from unit {}: {e}", self.id)))
    }
}

#[async_trait]
impl Peer for NetworkPeer {
    fn id(&self) -> u8 {
        self.id
    }

    async fn ping(&self) -> Result<(), PeerError> {
        match self.call(&RpcRequest::Ping).await? {
            RpcReply::Pong => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    async fn get_next_payload(&self) -> Result<Option<Bytes>, PeerError> {
        match self.call(&RpcRequest::NextPayload).await? {
            RpcReply::Payload(None) => Ok(None),
            RpcReply::Payload(Some(text)) => self.decode_hex(&text).map(Some),
            other => Err(self.unexpected(other)),
        }
    }

    async fn invoke(&self, invocation: &Invocation) -> Result<(), PeerError> {
        let request = RpcRequest::Invoke {
            invocation: invocation.clone(),
        };
        match self.call(&request).await? {
            RpcReply::Done => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    async fn short_status(&self) -> Result<Bytes, PeerError> {
        match self.call(&RpcRequest::ShortStatus).await? {
            RpcReply::Status(text) => self.decode_hex(&text),
            other => Err(self.unexpected(other)),
        }
    }

    async fn summary_byte(&self) -> Result<u8, PeerError> {
        match self.call(&RpcRequest::SummaryByte).await? {
            RpcReply::Summary(byte) => Ok(byte),
            other => Err(self.unexpected(other)),
        }
    }

    async fn downlink_queue_depth(&self) -> Result<usize, PeerError> {
        match self.call(&RpcRequest::QueueDepth).await? {
            RpcReply::Depth(depth) => Ok(depth),
            other => Err(self.unexpected(other)),
        }
    }

    async fn request_standard_image_at(&self, timestamp: f64) -> Result<(), PeerError> {
        match self.call(&RpcRequest::RequestStandardImageAt { timestamp }).await? {
            RpcReply::Done => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Answer peer calls on `socket` with `handler` until shutdown.
///
/// Each request runs on its own task so a slow command never delays pings.
pub async fn serve_rpc(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn Peer>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    tracing::info!(addr = ?socket.local_addr().ok(), unit = handler.id(), "rpc server starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("rpc server shutting down");
                return Ok(());
            }

            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "rpc recv_from failed");
                        continue;
                    }
                };
                let request: RpcRequest = match serde_json::from_slice(&buf[..len]) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(%from, error = %e, "malformed rpc request");
                        let reply = RpcResponse::error(format!("malformed request: {e}"));
                        send_response(&socket, from, &reply).await;
                        continue;
                    }
                };

                let socket = socket.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let response = answer(handler.as_ref(), request).await;
                    send_response(&socket, from, &response).await;
                });
            }
        }
    }
}

async fn answer(handler: &dyn Peer, request: RpcRequest) -> RpcResponse {
    let result = match request {
        RpcRequest::Ping => handler.ping().await.map(|_| RpcReply::Pong),
        RpcRequest::NextPayload => handler
            .get_next_payload()
            .await
            .map(|p| RpcReply::Payload(p.map(hex::encode))),
        RpcRequest::Invoke { invocation } => {
            tracing::debug!(%invocation, "rpc invoke");
            handler.invoke(&invocation).await.map(|_| RpcReply::Done)
        }
        RpcRequest::ShortStatus => handler.short_status().await.map(|s| RpcReply::Status(hex::encode(s))),
        RpcRequest::SummaryByte => handler.summary_byte().await.map(RpcReply::Summary),
        RpcRequest::QueueDepth => handler.downlink_queue_depth().await.map(RpcReply::Depth),
        RpcRequest::RequestStandardImageAt { timestamp } => handler
            .request_standard_image_at(timestamp)
            .await
            .map(|_| RpcReply::Done),
    };
    match result {
        Ok(reply) => RpcResponse::ok(reply),
        Err(e) => RpcResponse::error(e.to_string()),
    }
}

async fn send_response(socket: &UdpSocket, to: SocketAddr, response: &RpcResponse) {
    let body = match serde_json::to_vec(response) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize rpc response");
            return;
        }
    };
    if body.len() > MAX_DATAGRAM {
        tracing::warn!(%to, len = body.len(), "rpc response too large, sending error instead");
        let fallback = RpcResponse::error(format!("response of {} bytes exceeds datagram limit", body.len()));
        match serde_json::to_vec(&fallback) {
            Ok(body) => {
                if let Err(e) = socket.send_to(&body, to).await {
                    tracing::warn!(%to, error = %e, "failed to send rpc error response");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize rpc error response"),
        }
        return;
    }
    if let Err(e) = socket.send_to(&body, to).await {
        tracing::warn!(%to, error = %e, "failed to send rpc response");
    }
}
