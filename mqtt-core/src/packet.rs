use bytes::Bytes;
use num_enum::TryFromPrimitive;

/// Packet Identifier.
///
/// The variable header component of many of the Control Packet types includes a 2 byte Packet
/// Identifier field. Valid values run 1 … 0xFFFF; 0 is never used.
pub type PacketId = u16;

/// The largest value a four-byte variable-byte integer can encode.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// The protocol name/level pair a Connect packet is allowed to carry.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum ProtocolVersion {
    /// `"MQIsdp"`, level 3.
    V310,
    /// `"MQTT"`, level 4.
    V311,
}

impl ProtocolVersion {
    pub(crate) fn name(self) -> &'static [u8] {
        match self {
            ProtocolVersion::V310 => b"MQIsdp",
            ProtocolVersion::V311 => b"MQTT",
        }
    }

    pub(crate) fn level(self) -> u8 {
        match self {
            ProtocolVersion::V310 => 3,
            ProtocolVersion::V311 => 4,
        }
    }
}

/// MQTT Control Packet type, the high nibble of the fixed header's first byte.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    CONNECT = 1,
    CONNACK = 2,
    PUBLISH = 3,
    PUBACK = 4,
    PUBREC = 5,
    PUBREL = 6,
    PUBCOMP = 7,
    SUBSCRIBE = 8,
    SUBACK = 9,
    UNSUBSCRIBE = 10,
    UNSUBACK = 11,
    PINGREQ = 12,
    PINGRESP = 13,
    DISCONNECT = 14,
}

/// Fixed header shared by every MQTT Control Packet.
#[derive(Debug, PartialEq, Clone)]
pub struct FixedHeader {
    pub packet_type: Type,
    pub packet_flags: u8,
    pub remaining_length: usize,
}

/// Quality of Service levels.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive)]
pub enum QoS {
    /// The message arrives at the receiver either once or not at all; no acknowledgement.
    AtMostOnce = 0,
    /// Guaranteed to arrive at least once; acknowledged by Puback.
    AtLeastOnce = 1,
    /// Guaranteed to arrive exactly once (not implemented by the publish path; see crate docs).
    ExactlyOnce = 2,
}

/// MQTT Control Packets.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    Connect(Connect),
    ConnectAck(ConnectAck),
    Publish(Publish),
    PublishAck(PublishAck),
    PublishReceived(PublishReceived),
    PublishRelease(PublishRelease),
    PublishComplete(PublishComplete),
    Subscribe(Subscribe),
    SubscribeAck(SubscribeAck),
    Unsubscribe(Unsubscribe),
    UnsubscribeAck(UnsubscribeAck),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> Type {
        match self {
            Packet::Connect(_) => Type::CONNECT,
            Packet::ConnectAck(_) => Type::CONNACK,
            Packet::Publish(_) => Type::PUBLISH,
            Packet::PublishAck(_) => Type::PUBACK,
            Packet::PublishReceived(_) => Type::PUBREC,
            Packet::PublishRelease(_) => Type::PUBREL,
            Packet::PublishComplete(_) => Type::PUBCOMP,
            Packet::Subscribe(_) => Type::SUBSCRIBE,
            Packet::SubscribeAck(_) => Type::SUBACK,
            Packet::Unsubscribe(_) => Type::UNSUBSCRIBE,
            Packet::UnsubscribeAck(_) => Type::UNSUBACK,
            Packet::PingReq => Type::PINGREQ,
            Packet::PingResp => Type::PINGRESP,
            Packet::Disconnect => Type::DISCONNECT,
        }
    }
}

/// Client request to connect to a Server.
#[derive(Debug, PartialEq, Clone)]
pub struct Connect {
    pub protocol_version: ProtocolVersion,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub last_will: Option<LastWill>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

bitflags! {
    /// Connect Flags byte (bit 0 reserved, always 0).
    #[derive(Default)]
    pub struct ConnectFlags: u8 {
        const USERNAME      = 0b1000_0000;
        const PASSWORD      = 0b0100_0000;
        const WILL_RETAIN   = 0b0010_0000;
        const WILL_QOS      = 0b0001_1000;
        const LAST_WILL     = 0b0000_0100;
        const CLEAN_SESSION = 0b0000_0010;
    }
}

const WILL_QOS_SHIFT: u8 = 3;

impl ConnectFlags {
    pub fn qos(self) -> QoS {
        QoS::try_from((self & Self::WILL_QOS).bits() >> WILL_QOS_SHIFT).unwrap_or(QoS::AtMostOnce)
    }
}

impl From<QoS> for ConnectFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << WILL_QOS_SHIFT)
    }
}

/// Last Will and Testament carried by a Connect packet.
#[derive(Debug, PartialEq, Clone)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub message: Bytes,
}

/// Connect acknowledgment.
#[derive(Debug, PartialEq, Clone)]
pub struct ConnectAck {
    /// Only meaningful under v3.1.1; a v3.1.0 server always sends 0 here.
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

bitflags! {
    #[derive(Default)]
    pub struct ConnectAckFlags: u8 {
        const SESSION_PRESENT = 0b0000_0001;
    }
}

/// Connect Return Code.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum ConnectReturnCode {
    ConnectionAccepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServiceUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// A short, stable description of the return code, suitable for surfacing in a connect
    /// error message.
    pub fn message(self) -> &'static str {
        match self {
            ConnectReturnCode::ConnectionAccepted => "connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "client identifier rejected",
            ConnectReturnCode::ServiceUnavailable => "server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorised",
        }
    }

    pub fn is_accepted(self) -> bool {
        self == ConnectReturnCode::ConnectionAccepted
    }
}

/// Publish message.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish {
    /// Set on every retransmission of a qos>0 Publish; must be 0 for qos=0 and on first send.
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    /// Present only when `qos > AtMostOnce`.
    pub packet_id: Option<PacketId>,
    pub payload: Bytes,
}

bitflags! {
    #[derive(Default)]
    pub struct PublishFlags: u8 {
        const DUP = 0b0000_1000;
        const QOS = 0b0000_0110;
        const RETAIN = 0b0000_0001;
    }
}

const PUBLISH_QOS_SHIFT: u8 = 1;

impl Publish {
    pub fn flags(&self) -> PublishFlags {
        let mut flags = PublishFlags::from(self.qos);
        if self.dup {
            flags |= PublishFlags::DUP;
        }
        if self.retain {
            flags |= PublishFlags::RETAIN;
        }
        flags
    }
}

impl PublishFlags {
    pub fn qos(self) -> QoS {
        QoS::try_from((self & Self::QOS).bits() >> PUBLISH_QOS_SHIFT).unwrap_or(QoS::AtMostOnce)
    }
}

impl From<QoS> for PublishFlags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate((qos as u8) << PUBLISH_QOS_SHIFT)
    }
}

/// Publish acknowledgment (qos 1).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishAck {
    pub packet_id: PacketId,
}

/// Publish received, assured delivery part 1 (qos 2; codec-only, see crate docs).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishReceived {
    pub packet_id: PacketId,
}

/// Publish release, assured delivery part 2 (qos 2; codec-only, see crate docs).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishRelease {
    pub packet_id: PacketId,
}

/// Publish complete, assured delivery part 3 (qos 2; codec-only, see crate docs).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PublishComplete {
    pub packet_id: PacketId,
}

/// Client subscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe {
    pub packet_id: PacketId,
    /// Never empty; encode() rejects an empty list.
    pub subscriptions: Vec<(String, QoS)>,
}

/// Subscribe acknowledgment.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeAck {
    pub packet_id: PacketId,
    pub status: Vec<SubscribeReturnCode>,
}

/// Per-topic-filter result of a Subscribe.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

impl SubscribeReturnCode {
    pub const FAILURE: u8 = 0x80;
}

impl From<SubscribeReturnCode> for u8 {
    fn from(code: SubscribeReturnCode) -> u8 {
        match code {
            SubscribeReturnCode::Success(qos) => qos as u8,
            SubscribeReturnCode::Failure => SubscribeReturnCode::FAILURE,
        }
    }
}

/// Unsubscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe {
    pub packet_id: PacketId,
    /// Never empty; encode() rejects an empty list.
    pub topic_filters: Vec<String>,
}

/// Unsubscribe acknowledgment.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct UnsubscribeAck {
    pub packet_id: PacketId,
}
