//! gondola-services — the link-management layer of a unit: downlink queues,
//! uplink parsing, file fragmentation and reassembly, the peer capability and
//! its RPC transport, the command log, and the leader coordinator.

pub mod command_log;
pub mod coordinator;
pub mod downlink;
pub mod file_transfer;
pub mod local;
pub mod peer;
pub mod rpc;
pub mod uplink;

pub use command_log::{CommandLogger, CommandRecord, CommandStatus};
pub use coordinator::{destination_table, Applied, Coordinator, StatusSource, UnitState};
pub use downlink::{frame_lowrate, new_downlink_set, unframe_lowrate, DownlinkSet, HirateDownlink};
pub use file_transfer::{fragment_payload, store_completed, CompletedFile, FileReassembler};
pub use local::{Controller, LocalUnit};
pub use peer::{new_peer_table, LoopbackPeer, Peer, PeerError, PeerTable};
pub use rpc::{serve_rpc, NetworkPeer, RpcReply, RpcRequest, RpcResponse};
pub use uplink::{parse_uplink, UplinkPacket, UplinkScanner};
