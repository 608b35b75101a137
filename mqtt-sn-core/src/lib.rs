//! Wire codec for MQTT-SN v1.2 Control Packets.
//!
//! Like [`mqtt_core`], this crate is a pure, stateless translation layer between bytes and
//! [`Packet`] values; it performs no I/O and knows nothing about the gateway/client session that
//! would drive these packets over a datagram transport.

#[macro_use]
extern crate bitflags;

mod decode;
mod encode;
mod error;
mod packet;

pub use crate::decode::parse;
pub use crate::encode::encode;
pub use crate::error::Error;
pub use crate::packet::{
    Advertise, Connack, Connect, Disconnect, Flags, Gwinfo, Packet, PacketIdAck, Pingreq, Puback,
    Publish, QoS, Regack, Register, ReturnCode, Searchgw, Subscribe, SubscribeTopic, Suback,
    TopicId, TopicIdType, Type, Unsubscribe, Willmsg, Willtopic, Willtopicresp, MAX_BODY_LENGTH,
    PROTOCOL_ID,
};

pub type Result<T> = std::result::Result<T, Error>;
