//! Configuration for a gondola unit and the ground tools.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GONDOLA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gondola/config.toml
//!   3. ~/.config/gondola/config.toml

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::stuffing::max_unstuffed_len;
use crate::wire::FILE_MAX_PAYLOAD;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GondolaConfig {
    pub unit: UnitConfig,
    pub rpc: RpcConfig,
    /// Unit id → RPC address (`host:port`) of every unit, this one included.
    pub peers: BTreeMap<String, String>,
    pub groups: GroupsConfig,
    pub uplink: UplinkConfig,
    pub lowrate: LowrateConfig,
    /// Named hirate links.
    pub downlinks: BTreeMap<String, DownlinkConfig>,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub cam_id: u8,
    /// Leader assumed at startup, before the first election.
    pub initial_leader_id: u8,
    pub election_enabled: bool,
    pub loop_interval_ms: u64,
    /// Bound on every call to a peer.
    pub ping_timeout_ms: u64,
    /// Seconds between automatic short status frames. 0 = never.
    pub short_status_interval_s: u64,
    /// How far back synchronized image requests reach, in seconds.
    pub synchronized_image_delay_s: f64,
    /// Order the leader polls units for downlink data. Empty = every peer by id.
    pub polling_order: Vec<u8>,
    /// Files dropped here are queued for downlink, oldest first.
    pub outbox_dir: PathBuf,
    /// Where command output and requested files are staged.
    pub spool_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupsConfig {
    pub widefield: Vec<u8>,
    pub narrowfield: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UplinkConfig {
    pub bind: String,
    /// UDP port the SIP bytes arrive on.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LowrateConfig {
    /// Destination of lowrate frames. Empty = lowrate disabled.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownlinkConfig {
    pub address: String,
    /// 0 = link disabled.
    pub bytes_per_second: u32,
    pub packet_size: usize,
    pub byte_stuffing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GondolaConfig {
    fn default() -> Self {
        let mut downlinks = BTreeMap::new();
        downlinks.insert("highrate".to_string(), DownlinkConfig::new("127.0.0.1:4002", 700));
        downlinks.insert("openport".to_string(), DownlinkConfig::new("127.0.0.1:4003", 10_000));
        downlinks.insert("los".to_string(), DownlinkConfig::new("127.0.0.1:4004", 0));

        let mut peers = BTreeMap::new();
        peers.insert("0".to_string(), "127.0.0.1:4040".to_string());

        Self {
            unit: UnitConfig::default(),
            rpc: RpcConfig::default(),
            peers,
            groups: GroupsConfig::default(),
            uplink: UplinkConfig::default(),
            lowrate: LowrateConfig::default(),
            downlinks,
            status: StatusConfig::default(),
        }
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            cam_id: 0,
            initial_leader_id: 0,
            election_enabled: true,
            loop_interval_ms: 100,
            ping_timeout_ms: 500,
            short_status_interval_s: 10,
            synchronized_image_delay_s: 2.0,
            polling_order: Vec::new(),
            outbox_dir: data_dir().join("outbox"),
            spool_dir: data_dir().join("spool"),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 4040,
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 4001,
        }
    }
}

impl Default for LowrateConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4005".into(),
        }
    }
}

impl DownlinkConfig {
    pub fn new(address: &str, bytes_per_second: u32) -> Self {
        Self {
            address: address.into(),
            bytes_per_second,
            ..Default::default()
        }
    }
}

impl Default for DownlinkConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            bytes_per_second: 0,
            packet_size: 1000,
            byte_stuffing: false,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gondola")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("gondola")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("peer key {0:?} is not a unit id")]
    InvalidPeerId(String),
    #[error("downlink {name}: {reason}")]
    InvalidDownlink { name: String, reason: String },
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GondolaConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            GondolaConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject link settings no fragment could be built for.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, link) in &self.downlinks {
            let invalid = |reason: String| ConfigError::InvalidDownlink { name: name.clone(), reason };
            if link.packet_size == 0 || link.packet_size > FILE_MAX_PAYLOAD {
                return Err(invalid(format!(
                    "packet_size {} outside 1..={FILE_MAX_PAYLOAD}",
                    link.packet_size
                )));
            }
            if link.byte_stuffing && max_unstuffed_len(link.packet_size) == 0 {
                return Err(invalid(format!(
                    "packet_size {} leaves no room for stuffed data",
                    link.packet_size
                )));
            }
        }
        Ok(())
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GONDOLA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GondolaConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Peer table with numeric ids.
    pub fn peer_addresses(&self) -> Result<BTreeMap<u8, String>, ConfigError> {
        self.peers
            .iter()
            .map(|(id, addr)| {
                id.parse::<u8>()
                    .map(|id| (id, addr.clone()))
                    .map_err(|_| ConfigError::InvalidPeerId(id.clone()))
            })
            .collect()
    }

    /// Apply GONDOLA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GONDOLA_UNIT__CAM_ID") {
            if let Ok(id) = v.parse() {
                self.unit.cam_id = id;
            }
        }
        if let Ok(v) = std::env::var("GONDOLA_UNIT__INITIAL_LEADER_ID") {
            if let Ok(id) = v.parse() {
                self.unit.initial_leader_id = id;
            }
        }
        if let Ok(v) = std::env::var("GONDOLA_UPLINK__PORT") {
            if let Ok(p) = v.parse() {
                self.uplink.port = p;
            }
        }
        if let Ok(v) = std::env::var("GONDOLA_STATUS__PORT") {
            if let Ok(p) = v.parse() {
                self.status.port = p;
            }
        }
        if let Ok(v) = std::env::var("GONDOLA_RPC__PORT") {
            if let Ok(p) = v.parse() {
                self.rpc.port = p;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_standard_links() {
        let config = GondolaConfig::default();
        assert_eq!(config.downlinks.len(), 3);
        assert_eq!(config.downlinks["los"].bytes_per_second, 0);
        assert_eq!(config.downlinks["highrate"].packet_size, 1000);
        assert!(config.unit.election_enabled);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = GondolaConfig::from_toml(
            r#"
            [unit]
            cam_id = 3

            [peers]
            0 = "10.0.0.10:4040"
            3 = "10.0.0.13:4040"

            [groups]
            widefield = [0, 3]
            "#,
        )
        .unwrap();
        assert_eq!(config.unit.cam_id, 3);
        assert_eq!(config.unit.ping_timeout_ms, 500);
        assert_eq!(config.groups.widefield, vec![0, 3]);
        let peers = config.peer_addresses().unwrap();
        assert_eq!(peers[&3], "10.0.0.13:4040");
    }

    #[test]
    fn packet_size_must_fit_a_fragment() {
        assert!(GondolaConfig::default().validate().is_ok());

        let mut config = GondolaConfig::default();
        config.downlinks.get_mut("highrate").unwrap().packet_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDownlink { ref name, .. }) if name == "highrate"));

        config.downlinks.get_mut("highrate").unwrap().packet_size = FILE_MAX_PAYLOAD + 1;
        assert!(config.validate().is_err());

        let link = config.downlinks.get_mut("highrate").unwrap();
        link.packet_size = 2;
        link.byte_stuffing = true;
        assert!(config.validate().is_err());

        config.downlinks.get_mut("highrate").unwrap().packet_size = FILE_MAX_PAYLOAD;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_peer_id_is_reported() {
        let mut config = GondolaConfig::default();
        config.peers.insert("camera".into(), "x:1".into());
        assert!(matches!(config.peer_addresses(), Err(ConfigError::InvalidPeerId(_))));
    }

    #[test]
    fn write_default_if_missing_creates_file() {
        let tmp = std::env::temp_dir()
            .join(format!("gondola-config-test-{}", std::process::id()));
        let config_path = tmp.join("config.toml");
        std::fs::create_dir_all(&tmp).unwrap();

        unsafe {
            std::env::set_var("GONDOLA_CONFIG", config_path.to_str().unwrap());
            std::env::set_var("GONDOLA_UNIT__CAM_ID", "5");
        }

        let path = GondolaConfig::write_default_if_missing().expect("write_default_if_missing failed");
        assert!(path.exists());

        let config = GondolaConfig::load().expect("load should succeed");
        assert_eq!(config.unit.cam_id, 5);
        assert_eq!(config.downlinks.len(), 3);

        unsafe {
            std::env::remove_var("GONDOLA_CONFIG");
            std::env::remove_var("GONDOLA_UNIT__CAM_ID");
        }
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
