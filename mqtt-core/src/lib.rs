//! Wire codec for MQTT v3.1 / v3.1.1 control packets.
//!
//! This crate is a pure, stateless translation layer between bytes and
//! [`Packet`] values. It performs no I/O of its own beyond the small
//! buffering [`PacketReader`] needs to turn a blocking `Read` into "one
//! packet at a time"; everything else — sockets, reconnection, keep-alive —
//! lives in `mqtt-client`.

#[macro_use]
extern crate bitflags;

mod decode;
mod encode;
mod error;
mod packet;
mod reader;

pub use crate::decode::parse;
pub use crate::encode::encode;
pub use crate::error::Error;
pub use crate::packet::{
    Connect, ConnectAck, ConnectFlags, ConnectReturnCode, FixedHeader, LastWill, Packet, PacketId,
    ProtocolVersion, Publish, PublishAck, PublishComplete, PublishFlags, PublishReceived,
    PublishRelease, QoS, Subscribe, SubscribeAck, SubscribeReturnCode, Type, Unsubscribe,
    UnsubscribeAck, MAX_REMAINING_LENGTH,
};
pub use crate::reader::PacketReader;

pub type Result<T> = std::result::Result<T, Error>;
