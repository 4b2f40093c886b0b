//! Compact fixed-layout status records for the lowrate link.
//!
//! A record is an ordered table of named numeric fields, each with a binary
//! type, packed big-endian with no padding. Every field must be set before
//! encoding. Integer fields never fail to encode: out-of-range values are
//! clipped to `[min, max - 1]` and the type's maximum is reserved to mean
//! "invalid". `status_byte_*` fields are bit summaries where 0xFF is a real
//! value, so they pass through unclipped.

use bytes::{Bytes, BytesMut};

use crate::command::ArgType;

pub const LEADER_MESSAGE_ID: u8 = 254;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatusError {
    #[error("no status field named {0:?}")]
    UnknownField(String),

    #[error("status field {0} was never set")]
    Unset(&'static str),

    #[error("{kind:?} status is {expected} bytes, got {received}")]
    WrongLength {
        kind: StatusKind,
        expected: usize,
        received: usize,
    },

    #[error("empty status payload")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusField {
    pub name: &'static str,
    pub ty: ArgType,
}

const fn f(name: &'static str, ty: ArgType) -> StatusField {
    StatusField { name, ty }
}

use ArgType::{F32, F64, I16, I8, U16, U32, U8};

/// Record sent by every camera unit.
pub const CAMERA_FIELDS: &[StatusField] = &[
    f("message_id", U8),
    f("timestamp", F64),
    f("leader_id", U8),
    f("free_disk_root_mb", U32),
    f("free_disk_var_mb", U32),
    f("free_disk_data_1_mb", U32),
    f("free_disk_data_2_mb", U32),
    f("free_disk_data_3_mb", U32),
    f("free_disk_data_4_mb", U32),
    f("total_images_captured", U32),
    f("camera_packet_resent", U32),
    f("camera_packet_missed", U32),
    f("camera_frames_dropped", U32),
    f("camera_timestamp_offset_us", I16),
    f("exposure_us", U32),
    f("focus_step", U16),
    f("aperture_times_100", U16),
    f("pressure", F32),
    f("lens_wall_temp", I8),
    f("dcdc_wall_temp", I8),
    f("labjack_temp", I8),
    f("camera_temp", I8),
    f("ccd_temp", I8),
    f("rail_12_mv", U16),
    f("cpu_temp", I8),
    f("sda_temp", I8),
    f("sdb_temp", I8),
    f("sdc_temp", I8),
    f("sdd_temp", I8),
    f("sde_temp", I8),
    f("sdf_temp", I8),
];

/// Record sent on behalf of the whole payload by the leader.
pub const LEADER_FIELDS: &[StatusField] = &[
    f("message_id", U8),
    f("timestamp", F64),
    f("leader_id", U8),
    f("status_byte_camera_0", U8),
    f("status_byte_camera_1", U8),
    f("status_byte_camera_2", U8),
    f("status_byte_camera_3", U8),
    f("status_byte_camera_4", U8),
    f("status_byte_camera_5", U8),
    f("status_byte_camera_6", U8),
    f("status_byte_camera_7", U8),
    f("status_byte_lidar", U8),
    f("last_command_sequence", U16),
    f("highest_command_sequence", U16),
    f("last_outstanding_sequence", U16),
    f("total_commands_received", U16),
    f("last_failed_sequence", U16),
    f("current_file_id", U32),
    f("bytes_sent_highrate", U32),
    f("bytes_sent_openport", U32),
    f("bytes_sent_los", U32),
    f("packets_queued_highrate", U8),
    f("packets_queued_openport", U8),
    f("packets_queued_los", U8),
    f("bytes_per_sec_highrate", U16),
    f("bytes_per_sec_openport", U16),
    f("bytes_per_sec_los", U16),
    f("charge_cont_1_solar_voltage", I16),
    f("charge_cont_1_solar_current", I16),
    f("charge_cont_1_battery_voltage", I16),
    f("charge_cont_1_battery_current", I16),
    f("charge_cont_1_battery_temp", I8),
    f("charge_cont_1_heatsink_temp", I8),
    f("charge_cont_2_solar_voltage", I16),
    f("charge_cont_2_solar_current", I16),
    f("charge_cont_2_battery_voltage", I16),
    f("charge_cont_2_battery_current", I16),
    f("charge_cont_2_battery_temp", I8),
    f("charge_cont_2_heatsink_temp", I8),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Camera,
    Leader,
}

impl StatusKind {
    pub fn fields(self) -> &'static [StatusField] {
        match self {
            StatusKind::Camera => CAMERA_FIELDS,
            StatusKind::Leader => LEADER_FIELDS,
        }
    }

    pub fn encoded_size(self) -> usize {
        self.fields().iter().map(|f| f.ty.width()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShortStatus {
    kind: StatusKind,
    values: Vec<Option<f64>>,
}

impl ShortStatus {
    pub fn new(kind: StatusKind) -> Self {
        let mut status = Self {
            kind,
            values: vec![None; kind.fields().len()],
        };
        if kind == StatusKind::Leader {
            status.values[0] = Some(LEADER_MESSAGE_ID as f64);
        }
        status
    }

    pub fn camera() -> Self {
        Self::new(StatusKind::Camera)
    }

    pub fn leader() -> Self {
        Self::new(StatusKind::Leader)
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn set(&mut self, name: &str, value: impl Into<f64>) -> Result<(), StatusError> {
        let index = self.index(name)?;
        self.values[index] = Some(value.into());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.index(name).ok().and_then(|i| self.values[i])
    }

    /// Fields in wire order with their current values.
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, Option<f64>)> + '_ {
        self.kind.fields().iter().zip(&self.values).map(|(f, v)| (f.name, *v))
    }

    /// Set every field not yet populated to NaN, which encodes as "invalid".
    pub fn mark_unset_invalid(&mut self) {
        for value in self.values.iter_mut().filter(|v| v.is_none()) {
            *value = Some(f64::NAN);
        }
    }

    pub fn encode(&self) -> Result<Bytes, StatusError> {
        let mut out = BytesMut::with_capacity(self.kind.encoded_size());
        for (field, value) in self.kind.fields().iter().zip(&self.values) {
            let value = value.ok_or_else(|| {
                tracing::error!(field = field.name, "encoding status before all values were set");
                StatusError::Unset(field.name)
            })?;
            encode_field(field, value, &mut out);
        }
        Ok(out.freeze())
    }

    pub fn decode(kind: StatusKind, buf: &[u8]) -> Result<Self, StatusError> {
        let expected = kind.encoded_size();
        if buf.len() != expected {
            return Err(StatusError::WrongLength {
                kind,
                expected,
                received: buf.len(),
            });
        }
        let mut cursor = 0;
        let values = kind
            .fields()
            .iter()
            .map(|field| {
                let value = field.ty.unpack(&buf[cursor..]).as_f64();
                cursor += field.ty.width();
                value
            })
            .collect();
        Ok(Self { kind, values })
    }

    /// Pick the record type from the message id in the first byte.
    pub fn decode_any(buf: &[u8]) -> Result<Self, StatusError> {
        match buf.first() {
            None => Err(StatusError::Empty),
            Some(&LEADER_MESSAGE_ID) => Self::decode(StatusKind::Leader, buf),
            Some(_) => Self::decode(StatusKind::Camera, buf),
        }
    }

    fn index(&self, name: &str) -> Result<usize, StatusError> {
        self.kind
            .fields()
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| StatusError::UnknownField(name.to_string()))
    }
}

fn encode_field(field: &StatusField, value: f64, out: &mut BytesMut) {
    let Some((min, max)) = field.ty.int_range() else {
        field.ty.put_float(out, value);
        return;
    };

    if field.name.starts_with("status_byte") {
        let coerced = if value.is_finite() && value >= min as f64 && value <= max as f64 {
            value as i64
        } else {
            tracing::warn!(field = field.name, value, "status byte out of range, sending 0");
            0
        };
        field.ty.put_int(out, coerced);
        return;
    }

    let max_valid = max - 1;
    let coerced = if value.is_nan() {
        tracing::warn!(field = field.name, "invalid value, sending the reserved maximum");
        max
    } else if value < min as f64 {
        tracing::warn!(field = field.name, value, clipped = min, "clipping status field");
        min
    } else if value > max_valid as f64 {
        tracing::warn!(field = field.name, value, clipped = max_valid, "clipping status field");
        max_valid
    } else {
        value as i64
    };
    field.ty.put_int(out, coerced);
}

// ── One-byte summary ──────────────────────────────────────────────────────────

/// Per-camera health packed into one byte of the leader record.
///
/// Bits, least significant first: is_leader, controller_alive,
/// pipeline_alive, files_to_downlink, ptp_synced, time_synced,
/// taking_images, writing_images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneByteSummary {
    pub is_leader: bool,
    pub controller_alive: bool,
    pub pipeline_alive: bool,
    pub files_to_downlink: bool,
    pub ptp_synced: bool,
    pub time_synced: bool,
    pub taking_images: bool,
    pub writing_images: bool,
}

/// Reported for a camera that did not answer. Unreachable from a live unit,
/// which always has a controller.
pub const NO_RESPONSE_SUMMARY: u8 = 0b0000_1100;

impl OneByteSummary {
    pub fn encode(&self) -> u8 {
        [
            self.is_leader,
            self.controller_alive,
            self.pipeline_alive,
            self.files_to_downlink,
            self.ptp_synced,
            self.time_synced,
            self.taking_images,
            self.writing_images,
        ]
        .iter()
        .enumerate()
        .fold(0, |acc, (bit, set)| acc | ((*set as u8) << bit))
    }

    pub fn decode(byte: u8) -> Self {
        let bit = |n: u8| byte & (1 << n) != 0;
        Self {
            is_leader: bit(0),
            controller_alive: bit(1),
            pipeline_alive: bit(2),
            files_to_downlink: bit(3),
            ptp_synced: bit(4),
            time_synced: bit(5),
            taking_images: bit(6),
            writing_images: bit(7),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_camera() -> ShortStatus {
        let mut ss = ShortStatus::camera();
        for (name, value) in [
            ("message_id", 0.0),
            ("timestamp", 123.133),
            ("leader_id", 0.0),
            ("free_disk_root_mb", 123000.0),
            ("free_disk_var_mb", 127000.0),
            ("free_disk_data_1_mb", 123000.0),
            ("free_disk_data_2_mb", 123000.0),
            ("free_disk_data_3_mb", 123000.0),
            ("free_disk_data_4_mb", 123000.0),
            ("total_images_captured", 49494.0),
            ("camera_packet_resent", 0.0),
            ("camera_packet_missed", 0.0),
            ("camera_frames_dropped", 0.0),
            ("camera_timestamp_offset_us", 65.0),
            ("exposure_us", 4774.0),
            ("focus_step", 2000.0),
            ("aperture_times_100", 123.0),
            ("pressure", 101033.3),
            ("lens_wall_temp", 30.0),
            ("dcdc_wall_temp", 25.0),
            ("labjack_temp", 28.0),
            ("camera_temp", 50.0),
            ("ccd_temp", 53.0),
            ("rail_12_mv", 12000.0),
            ("cpu_temp", 70.0),
            ("sda_temp", 55.0),
            ("sdb_temp", 45.0),
            ("sdc_temp", 48.0),
            ("sdd_temp", 47.0),
            ("sde_temp", 46.0),
            ("sdf_temp", 77.0),
        ] {
            ss.set(name, value).unwrap();
        }
        ss
    }

    #[test]
    fn record_sizes_fit_a_lowrate_frame() {
        assert_eq!(StatusKind::Camera.encoded_size(), 78);
        assert_eq!(StatusKind::Leader.encoded_size(), 74);
    }

    #[test]
    fn incomplete_status_refuses_to_encode() {
        assert!(matches!(ShortStatus::camera().encode(), Err(StatusError::Unset("message_id"))));
    }

    #[test]
    fn camera_values_survive_encoding() {
        let original = filled_camera();
        let decoded = ShortStatus::decode_any(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded.kind(), StatusKind::Camera);
        for ((name, a), (_, b)) in original.entries().zip(decoded.entries()) {
            let (a, b) = (a.unwrap(), b.unwrap());
            assert!((a - b).abs() < 0.1, "{name}: {a} vs {b}");
        }
    }

    #[test]
    fn integers_are_clipped() {
        let mut ss = filled_camera();
        ss.set("free_disk_root_mb", 12_300_000_000.0).unwrap();
        ss.set("focus_step", 200_000.0).unwrap();
        ss.set("lens_wall_temp", 300.0).unwrap();
        ss.set("dcdc_wall_temp", -225.0).unwrap();
        ss.set("exposure_us", f64::NAN).unwrap();

        let decoded = ShortStatus::decode(StatusKind::Camera, &ss.encode().unwrap()).unwrap();
        assert_eq!(decoded.get("free_disk_root_mb"), Some(4_294_967_294.0));
        assert_eq!(decoded.get("focus_step"), Some(65534.0));
        assert_eq!(decoded.get("lens_wall_temp"), Some(126.0));
        assert_eq!(decoded.get("dcdc_wall_temp"), Some(-128.0));
        assert_eq!(decoded.get("exposure_us"), Some(u32::MAX as f64));
    }

    #[test]
    fn leader_status_bytes_pass_through() {
        let mut ss = ShortStatus::leader();
        ss.set("status_byte_camera_0", 0xFF).unwrap();
        ss.set("status_byte_camera_1", NO_RESPONSE_SUMMARY).unwrap();
        ss.mark_unset_invalid();

        let encoded = ss.encode().unwrap();
        assert_eq!(encoded[0], LEADER_MESSAGE_ID);
        let decoded = ShortStatus::decode_any(&encoded).unwrap();
        assert_eq!(decoded.kind(), StatusKind::Leader);
        assert_eq!(decoded.get("status_byte_camera_0"), Some(255.0));
        assert_eq!(decoded.get("status_byte_camera_1"), Some(12.0));
        // Unset status bytes were NaN and go out as 0; other ints as their maximum.
        assert_eq!(decoded.get("status_byte_lidar"), Some(0.0));
        assert_eq!(decoded.get("current_file_id"), Some(u32::MAX as f64));
        assert!(decoded.get("timestamp").unwrap().is_nan());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(matches!(
            ShortStatus::decode(StatusKind::Camera, &[0u8; 10]),
            Err(StatusError::WrongLength { expected: 78, received: 10, .. })
        ));
        assert_eq!(ShortStatus::decode_any(&[]), Err(StatusError::Empty));
        assert!(ShortStatus::camera().set("nope", 1).is_err());
    }

    #[test]
    fn one_byte_summary_bits() {
        let summary = OneByteSummary {
            is_leader: true,
            taking_images: true,
            ..Default::default()
        };
        assert_eq!(summary.encode(), 0b0100_0001);
        assert_eq!(OneByteSummary::decode(0b0100_0001), summary);

        let no_response = OneByteSummary {
            pipeline_alive: true,
            files_to_downlink: true,
            ..Default::default()
        };
        assert_eq!(no_response.encode(), NO_RESPONSE_SUMMARY);
    }
}
