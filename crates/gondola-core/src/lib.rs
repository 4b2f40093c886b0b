//! gondola-core — wire formats, command encoding, and status records shared by
//! the onboard daemon and the ground tools. Everything here is synchronous and
//! free of I/O apart from configuration loading.

pub mod command;
pub mod command_table;
pub mod config;
pub mod scanner;
pub mod short_status;
pub mod stuffing;
pub mod wire;

pub use command::{Args, ArgType, Command, CommandError, CommandRegistry, Invocation, Schema, Value};
pub use scanner::{scan, StreamScanner};
pub use wire::{
    CommandPacket, FilePacket, GroundPacket, GseAck, GseCommandPacket, LinkTuple, Packet,
    PacketError,
};
