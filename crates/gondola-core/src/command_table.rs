//! The flight command set and destination codes.
//!
//! Command numbers follow registration order below, so appending is safe and
//! reordering breaks every ground tool built against an older table.

use crate::command::{ArgType, CommandError, CommandRegistry, Schema};

// ── Destination codes ─────────────────────────────────────────────────────────

pub const DESTINATION_ALL_CAMERAS: u8 = 255;
pub const DESTINATION_WIDEFIELD_CAMERAS: u8 = 254;
pub const DESTINATION_NARROWFIELD_CAMERAS: u8 = 253;
pub const DESTINATION_LIDAR: u8 = 252;
/// Whichever unit receives the packet, leader or not.
pub const DESTINATION_SUPER_COMMAND: u8 = 251;

/// Highest single-unit destination.
pub const MAX_CAMERA_ID: u8 = 7;

/// `set_leader` argument that hands leadership back to the election.
pub const USE_BULLY_ELECTION: u8 = 254;

pub fn destination_name(code: u8) -> String {
    match code {
        DESTINATION_ALL_CAMERAS => "all".into(),
        DESTINATION_WIDEFIELD_CAMERAS => "widefield".into(),
        DESTINATION_NARROWFIELD_CAMERAS => "narrowfield".into(),
        DESTINATION_LIDAR => "lidar".into(),
        DESTINATION_SUPER_COMMAND => "super".into(),
        id => format!("camera {id}"),
    }
}

/// Accepts a group name or a unit number.
pub fn parse_destination(text: &str) -> Option<u8> {
    match text.to_ascii_lowercase().as_str() {
        "all" => Some(DESTINATION_ALL_CAMERAS),
        "widefield" => Some(DESTINATION_WIDEFIELD_CAMERAS),
        "narrowfield" => Some(DESTINATION_NARROWFIELD_CAMERAS),
        "lidar" => Some(DESTINATION_LIDAR),
        "super" => Some(DESTINATION_SUPER_COMMAND),
        other => other.parse().ok(),
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub fn standard_registry() -> Result<CommandRegistry, CommandError> {
    use ArgType::*;

    let mut r = CommandRegistry::new();
    r.register("set_focus", Schema::fixed(&[("focus_step", U16)]), "")?;
    r.register("set_exposure", Schema::fixed(&[("exposure_time_us", U32)]), "")?;
    r.register(
        "set_standard_image_parameters",
        Schema::fixed(&[
            ("row_offset", U16),
            ("column_offset", U16),
            ("num_rows", U16),
            ("num_columns", U16),
            ("scale_by", F32),
            ("quality", F32),
        ]),
        "",
    )?;
    r.register(
        "request_specific_images",
        Schema::fixed(&[
            ("timestamp", F64),
            ("request_id", U32),
            ("num_images", U16),
            ("step", I32),
            ("row_offset", U16),
            ("column_offset", U16),
            ("num_rows", U16),
            ("num_columns", U16),
            ("scale_by", F32),
            ("quality", F32),
        ]),
        "",
    )?;
    r.register(
        "set_peer_polling_order",
        Schema::list(U8),
        "argument is a list of unit ids in polling order",
    )?;
    r.register(
        "request_specific_file",
        Schema::string(&[("max_num_bytes", I32), ("request_id", U32)], "filename"),
        "negative max_num_bytes takes the tail of the file",
    )?;
    r.register(
        "run_shell_command",
        Schema::string(
            &[("max_num_bytes_returned", U32), ("request_id", U32), ("timeout", F32)],
            "command_line",
        ),
        "timeout is the maximum number of seconds the command may run",
    )?;
    r.register(
        "get_status_report",
        Schema::fixed(&[("compress", U8), ("request_id", U32)]),
        "non-zero compress shrinks the report for downlink",
    )?;
    r.register("flush_downlink_queues", Schema::fixed(&[]), "")?;
    r.register(
        "use_synchronized_images",
        Schema::fixed(&[("synchronize", U8)]),
        "non-zero means images should be synchronized",
    )?;
    r.register(
        "set_downlink_bandwidth",
        Schema::fixed(&[("openport", U32), ("highrate", U32), ("los", U32)]),
        "bytes per second; 0 disables a link",
    )?;
    r.register(
        "set_leader",
        Schema::fixed(&[("leader_id", U8)]),
        "254 returns leadership to the election",
    )?;
    r.register("get_command_history", Schema::fixed(&[("request_id", U32)]), "")?;

    tracing::debug!(total = r.len(), "built command registry");
    Ok(r)
}
