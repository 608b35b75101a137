use derive_more::{Display, Error};

use crate::packet::MAX_BODY_LENGTH;

/// Everything that can go wrong translating between bytes and [`crate::Packet`]s.
#[derive(Debug, Display, Error)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    Io(std::io::Error),

    /// The message type octet does not name a known MQTT-SN packet type.
    #[display(fmt = "unknown message type: {:#04x}", _0)]
    UnknownMessageType(u8),

    /// The one-byte length said 1 (the escape for the 3-byte form) but fewer than 2 more bytes
    /// followed, or a one-byte length of 0 was used.
    #[display(fmt = "malformed length field")]
    MalformedLength,

    /// The body was shorter than the message type requires.
    #[display(fmt = "malformed packet body")]
    MalformedBody,

    /// A required string field was not valid UTF-8.
    #[display(fmt = "invalid utf-8 in packet field")]
    InvalidUtf8,

    /// The stream ended mid-packet.
    #[display(fmt = "truncated packet")]
    TruncatedPacket,

    /// An encoded body would exceed the protocol's maximum message length.
    #[display(fmt = "packet body of {} bytes exceeds the {} byte limit", _0, MAX_BODY_LENGTH)]
    PacketTooLarge(usize),

    /// The parsed length header did not match the number of bytes actually supplied.
    #[display(fmt = "Length of packet is not the same as the length header")]
    LengthMismatch,

    /// Connect's protocol-id byte was not [`crate::packet::PROTOCOL_ID`].
    #[display(fmt = "Unsupported protocol ID number: {}", _0)]
    UnsupportedProtocolId(u8),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
