//! Unit status and command history.

use anyhow::Result;
use serde::Deserialize;

use gondola_services::CommandRecord;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    cam_id: u8,
    leader_id: u8,
    is_leader: bool,
    election_enabled: bool,
    synchronize_images: bool,
    current_file_id: u32,
    peers: Vec<u8>,
    polling_order: Vec<u8>,
    downlinks: Vec<LinkInfo>,
    commands: CommandInfo,
}

#[derive(Deserialize)]
struct LinkInfo {
    name: String,
    bytes_per_second: u32,
    queued_packets: usize,
    total_bytes_sent: u64,
}

#[derive(Deserialize)]
struct CommandInfo {
    total: usize,
    latest: Option<CommandRecord>,
    last_failed: Option<CommandRecord>,
}

#[derive(Deserialize)]
struct CommandsResponse {
    commands: Vec<CommandRecord>,
}

fn describe(record: &CommandRecord) -> String {
    let details = if record.details.is_empty() {
        String::new()
    } else {
        format!(" ({})", record.details)
    };
    format!("#{} {:?}{}", record.sequence_number, record.status, details)
}

fn ids(list: &[u8]) -> String {
    list.iter().map(u8::to_string).collect::<Vec<_>>().join(", ")
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Gondola Unit {}", resp.cam_id);
    println!("═══════════════════════════════════════");
    println!("  Leader           : {}{}", resp.leader_id, if resp.is_leader { " (self)" } else { "" });
    println!("  Election         : {}", if resp.election_enabled { "enabled" } else { "disabled" });
    println!("  Synchronized     : {}", resp.synchronize_images);
    println!("  Next file id     : {}", resp.current_file_id);
    println!("  Peers            : [{}]", ids(&resp.peers));
    println!("  Polling order    : [{}]", ids(&resp.polling_order));

    println!("\n  Downlinks:");
    for link in &resp.downlinks {
        println!(
            "  ┌─ {} {}",
            if link.bytes_per_second > 0 { "✓" } else { "✗" },
            link.name
        );
        println!("  │  rate   : {} B/s", link.bytes_per_second);
        println!("  │  queued : {} packets", link.queued_packets);
        println!("  └─ sent   : {} bytes", link.total_bytes_sent);
    }

    println!("\n  Commands processed : {}", resp.commands.total);
    if let Some(latest) = &resp.commands.latest {
        println!("  Latest             : {}", describe(latest));
    }
    if let Some(failed) = &resp.commands.last_failed {
        println!("  Last failure       : {}", describe(failed));
    }

    Ok(())
}

pub async fn cmd_commands(port: u16) -> Result<()> {
    let resp: CommandsResponse = get_json(&format!("{}/commands", base_url(port))).await?;

    if resp.commands.is_empty() {
        println!("No commands processed yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Command History ({})", resp.commands.len());
    println!("═══════════════════════════════════════");
    for record in &resp.commands {
        println!("  {:>14.3}  {}", record.timestamp, describe(record));
    }
    Ok(())
}
