//! Build a science command and send it towards the payload.
//!
//! By default the command is wrapped for the GSE and the tool waits for the
//! GSE acknowledgement. With `--sip` the bare science command frame is sent
//! straight to a unit's uplink port, as the SIP would deliver it.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::net::UdpSocket;

use gondola_core::command_table::{destination_name, parse_destination, standard_registry, DESTINATION_SUPER_COMMAND};
use gondola_core::wire::GSE_ACK_LEN;
use gondola_core::{CommandPacket, CommandRegistry, GseAck, GseCommandPacket, LinkTuple, Packet};

use super::flag_value;

const DEFAULT_TARGET: &str = "127.0.0.1:4001";
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub name: String,
    pub pairs: Vec<(String, String)>,
    pub destination: u8,
    pub sequence_number: u16,
    pub link: LinkTuple,
    pub target: String,
    pub sip: bool,
}

impl CommandRequest {
    pub fn parse(args: &[&str]) -> Result<Self> {
        let Some((name, rest)) = args.split_first() else {
            bail!("command requires a command name");
        };
        let mut request = CommandRequest {
            name: name.to_string(),
            pairs: Vec::new(),
            destination: DESTINATION_SUPER_COMMAND,
            sequence_number: 0,
            link: LinkTuple::Tdrss,
            target: DEFAULT_TARGET.to_string(),
            sip: false,
        };

        let mut i = 0;
        while i < rest.len() {
            match rest[i] {
                "--dest" => {
                    let text = flag_value(rest, &mut i, "--dest")?;
                    request.destination =
                        parse_destination(text).with_context(|| format!("unknown destination {text}"))?;
                }
                "--seq" => {
                    request.sequence_number = flag_value(rest, &mut i, "--seq")?
                        .parse()
                        .context("--seq must be a number")?;
                }
                "--link" => {
                    let text = flag_value(rest, &mut i, "--link")?;
                    request.link = LinkTuple::from_name(text)
                        .with_context(|| format!("unknown link {text}, expected los1|los2|tdrss|iridium"))?;
                }
                "--to" => request.target = flag_value(rest, &mut i, "--to")?.to_string(),
                "--sip" => request.sip = true,
                pair => {
                    let (key, value) = pair
                        .split_once('=')
                        .with_context(|| format!("expected key=value, got {pair}"))?;
                    request.pairs.push((key.to_string(), value.to_string()));
                }
            }
            i += 1;
        }
        Ok(request)
    }

    /// Encoded command bytes for the packet payload.
    pub fn payload(&self, registry: &CommandRegistry) -> Result<Bytes> {
        let command = registry
            .get(&self.name)
            .with_context(|| format!("unknown command {}, see `gondola-ctl list`", self.name))?;
        let args = command.parse_args(self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(command.encode(&args)?)
    }

    /// The frame to put on the wire.
    pub fn frame(&self, registry: &CommandRegistry) -> Result<Bytes> {
        let payload = self.payload(registry)?;
        let frame = if self.sip {
            CommandPacket::new(self.sequence_number, self.destination, payload)?.encode()
        } else {
            GseCommandPacket::new(self.link, self.sequence_number, self.destination, &payload)?.encode()
        };
        Ok(frame)
    }
}

pub async fn cmd_command(args: &[&str]) -> Result<()> {
    let request = CommandRequest::parse(args)?;
    let registry = standard_registry()?;
    let frame = request.frame(&registry)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await.context("failed to bind socket")?;
    socket
        .send_to(&frame, request.target.as_str())
        .await
        .with_context(|| format!("failed to send to {}", request.target))?;

    println!(
        "Sent {} #{} to {} via {} ({} bytes)",
        request.name,
        request.sequence_number,
        destination_name(request.destination),
        request.target,
        frame.len()
    );

    if request.sip {
        return Ok(());
    }

    let mut buf = [0u8; 64];
    let n = match tokio::time::timeout(ACK_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(received) => received.context("failed to read acknowledgement")?,
        Err(_) => bail!("no acknowledgement from GSE within {:?}", ACK_TIMEOUT),
    };
    let (ack, _) = GseAck::decode(&buf[..n.min(GSE_ACK_LEN)])?;
    println!("GSE: {}", ack.description());
    if ack != GseAck::Transmitted {
        std::process::exit(2);
    }
    Ok(())
}
