use derive_more::{Display, Error};

use crate::packet::MAX_REMAINING_LENGTH;

/// Everything that can go wrong translating between bytes and [`crate::Packet`]s.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// The underlying stream failed while a [`crate::PacketReader`] was filling its buffer.
    #[display(fmt = "{}", _0)]
    Io(std::io::Error),

    /// The fixed header's type nibble does not name a known control packet type.
    #[display(fmt = "unknown packet type: {}", _0)]
    UnknownPacketType(u8),

    /// A variable-byte integer used a fifth continuation byte.
    #[display(fmt = "malformed variable byte integer")]
    MalformedVariableByteInteger,

    /// The fixed header declared a body this packet type never carries, or the body was too
    /// short for the fields the packet type requires.
    #[display(fmt = "malformed packet body")]
    MalformedBody,

    /// A required string field (client id, topic, username, …) was not valid UTF-8.
    #[display(fmt = "invalid utf-8 in packet field")]
    InvalidUtf8,

    /// The stream ended mid-packet.
    #[display(fmt = "truncated packet")]
    TruncatedPacket,

    /// A Connect packet must carry a client id unless `clean_session` is set (v3.1.1) or one can
    /// be generated (v3.1.0).
    #[display(fmt = "missing client id")]
    MissingClientId,

    /// v3.1.1 forbids a password without a username.
    #[display(fmt = "password given without a username")]
    PasswordWithoutUsername,

    /// A Subscribe/Unsubscribe packet was built with zero topic filters.
    #[display(fmt = "subscribe/unsubscribe requires at least one topic filter")]
    EmptyTopicFilterList,

    /// The serialized remaining-length would exceed the four-byte variable-byte integer's range.
    #[display(fmt = "packet body of {} bytes exceeds the {} byte limit", _0, MAX_REMAINING_LENGTH)]
    PacketTooLarge(usize),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}
