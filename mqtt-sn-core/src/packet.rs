use bytes::Bytes;
use num_enum::TryFromPrimitive;

/// The largest body MQTT-SN v1.2 allows; the 3-byte length form still tops out here.
pub const MAX_BODY_LENGTH: usize = 65_531;

/// The only protocol id value a Connect packet's `protocol_id` field may carry.
pub const PROTOCOL_ID: u8 = 0x01;

/// Quality of service, widened to include MQTT-SN's unconnected publish level.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum QoS {
    /// Unconnected publish; no gateway registration, no acknowledgement.
    AtMostOnceNoConnect,
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(QoS::AtMostOnce),
            0b01 => Some(QoS::AtLeastOnce),
            0b10 => Some(QoS::ExactlyOnce),
            0b11 => Some(QoS::AtMostOnceNoConnect),
            _ => None,
        }
    }

    pub(crate) fn bits(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0b00,
            QoS::AtLeastOnce => 0b01,
            QoS::ExactlyOnce => 0b10,
            QoS::AtMostOnceNoConnect => 0b11,
        }
    }
}

/// How a Publish/Subscribe/Unsubscribe packet names its topic.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
pub enum TopicIdType {
    Normal,
    Predefined,
    Short,
}

impl TopicIdType {
    pub(crate) fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0b00 => Some(TopicIdType::Normal),
            0b01 => Some(TopicIdType::Predefined),
            0b10 => Some(TopicIdType::Short),
            _ => None,
        }
    }

    pub(crate) fn bits(self) -> u8 {
        match self {
            TopicIdType::Normal => 0b00,
            TopicIdType::Predefined => 0b01,
            TopicIdType::Short => 0b10,
        }
    }
}

/// A topic identified either by its 2-byte numeric id or, for short topics, by the literal
/// 2-character name carried inline.
#[derive(Debug, Eq, PartialEq, Clone, Hash)]
pub enum TopicId {
    Normal(u16),
    Predefined(u16),
    Short(String),
}

bitflags! {
    /// Flags byte shared by Publish, Subscribe, Unsubscribe, Willtopic and Willtopicupd.
    #[derive(Default)]
    pub struct Flags: u8 {
        const DUP           = 0b1000_0000;
        const QOS           = 0b0110_0000;
        const RETAIN        = 0b0001_0000;
        const WILL          = 0b0000_1000;
        const CLEAN_SESSION = 0b0000_0100;
        const TOPIC_ID_TYPE = 0b0000_0011;
    }
}

const QOS_SHIFT: u8 = 5;

impl Flags {
    pub(crate) fn qos(self) -> Option<QoS> {
        QoS::from_bits((self & Self::QOS).bits() >> QOS_SHIFT)
    }

    pub(crate) fn topic_id_type(self) -> Option<TopicIdType> {
        TopicIdType::from_bits((self & Self::TOPIC_ID_TYPE).bits())
    }
}

impl From<QoS> for Flags {
    fn from(qos: QoS) -> Self {
        Self::from_bits_truncate(qos.bits() << QOS_SHIFT)
    }
}

impl From<TopicIdType> for Flags {
    fn from(topic_id_type: TopicIdType) -> Self {
        Self::from_bits_truncate(topic_id_type.bits())
    }
}

/// MQTT-SN v1.2 message type octet.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum Type {
    ADVERTISE = 0x00,
    SEARCHGW = 0x01,
    GWINFO = 0x02,
    CONNECT = 0x04,
    CONNACK = 0x05,
    WILLTOPICREQ = 0x06,
    WILLTOPIC = 0x07,
    WILLMSGREQ = 0x08,
    WILLMSG = 0x09,
    REGISTER = 0x0A,
    REGACK = 0x0B,
    PUBLISH = 0x0C,
    PUBACK = 0x0D,
    PUBCOMP = 0x0E,
    PUBREC = 0x0F,
    PUBREL = 0x10,
    SUBSCRIBE = 0x12,
    SUBACK = 0x13,
    UNSUBSCRIBE = 0x14,
    UNSUBACK = 0x15,
    PINGREQ = 0x16,
    PINGRESP = 0x17,
    DISCONNECT = 0x18,
    WILLTOPICUPD = 0x1A,
    WILLTOPICRESP = 0x1B,
    WILLMSGUPD = 0x1C,
    WILLMSGRESP = 0x1D,
}

/// Connect Return Code, shared by Connack/Regack/Suback/Willtopicresp/Willmsgresp.
#[repr(u8)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
pub enum ReturnCode {
    Accepted = 0x00,
    RejectedCongestion = 0x01,
    RejectedInvalidTopicId = 0x02,
    RejectedNotSupported = 0x03,
}

impl ReturnCode {
    /// A short, stable description of the return code, suitable for surfacing in a connect
    /// error message.
    pub fn message(self) -> &'static str {
        match self {
            ReturnCode::Accepted => "accepted",
            ReturnCode::RejectedCongestion => "rejected: congestion",
            ReturnCode::RejectedInvalidTopicId => "rejected: invalid topic ID",
            ReturnCode::RejectedNotSupported => "rejected: not supported",
        }
    }
}

/// MQTT-SN Control Packets.
#[derive(Debug, PartialEq, Clone)]
pub enum Packet {
    Advertise(Advertise),
    Searchgw(Searchgw),
    Gwinfo(Gwinfo),
    Connect(Connect),
    Connack(Connack),
    Willtopicreq,
    Willtopic(Willtopic),
    Willmsgreq,
    Willmsg(Willmsg),
    Register(Register),
    Regack(Regack),
    Publish(Publish),
    Puback(Puback),
    Pubcomp(PacketIdAck),
    Pubrec(PacketIdAck),
    Pubrel(PacketIdAck),
    Subscribe(Subscribe),
    Suback(Suback),
    Unsubscribe(Unsubscribe),
    Unsuback(PacketIdAck),
    Pingreq(Pingreq),
    Pingresp,
    Disconnect(Disconnect),
    Willtopicupd(Willtopic),
    Willtopicresp(Willtopicresp),
    Willmsgupd(Willmsg),
    Willmsgresp(Willtopicresp),
}

impl Packet {
    pub fn packet_type(&self) -> Type {
        match self {
            Packet::Advertise(_) => Type::ADVERTISE,
            Packet::Searchgw(_) => Type::SEARCHGW,
            Packet::Gwinfo(_) => Type::GWINFO,
            Packet::Connect(_) => Type::CONNECT,
            Packet::Connack(_) => Type::CONNACK,
            Packet::Willtopicreq => Type::WILLTOPICREQ,
            Packet::Willtopic(_) => Type::WILLTOPIC,
            Packet::Willmsgreq => Type::WILLMSGREQ,
            Packet::Willmsg(_) => Type::WILLMSG,
            Packet::Register(_) => Type::REGISTER,
            Packet::Regack(_) => Type::REGACK,
            Packet::Publish(_) => Type::PUBLISH,
            Packet::Puback(_) => Type::PUBACK,
            Packet::Pubcomp(_) => Type::PUBCOMP,
            Packet::Pubrec(_) => Type::PUBREC,
            Packet::Pubrel(_) => Type::PUBREL,
            Packet::Subscribe(_) => Type::SUBSCRIBE,
            Packet::Suback(_) => Type::SUBACK,
            Packet::Unsubscribe(_) => Type::UNSUBSCRIBE,
            Packet::Unsuback(_) => Type::UNSUBACK,
            Packet::Pingreq(_) => Type::PINGREQ,
            Packet::Pingresp => Type::PINGRESP,
            Packet::Disconnect(_) => Type::DISCONNECT,
            Packet::Willtopicupd(_) => Type::WILLTOPICUPD,
            Packet::Willtopicresp(_) => Type::WILLTOPICRESP,
            Packet::Willmsgupd(_) => Type::WILLMSGUPD,
            Packet::Willmsgresp(_) => Type::WILLMSGRESP,
        }
    }
}

/// Gateway advertisement broadcast.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Advertise {
    pub gateway_id: u8,
    pub duration: u16,
}

/// Client broadcast looking for gateways.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Searchgw {
    pub radius: u8,
}

/// Gateway's reply to Searchgw (or its own unsolicited broadcast).
#[derive(Debug, PartialEq, Clone)]
pub struct Gwinfo {
    pub gateway_id: u8,
    /// Present only when a client (not the gateway itself) relays this message.
    pub gateway_address: Option<Bytes>,
}

/// Client request to connect to a gateway.
#[derive(Debug, PartialEq, Clone)]
pub struct Connect {
    pub will: bool,
    pub clean_session: bool,
    pub duration: u16,
    pub client_id: String,
}

/// Gateway's reply to Connect.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Connack {
    pub return_code: ReturnCode,
}

/// Client's will topic, sent in reply to Willtopicreq (or to update it later).
#[derive(Debug, PartialEq, Clone)]
pub struct Willtopic {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
}

/// Client's will message, sent in reply to Willmsgreq (or to update it later).
#[derive(Debug, PartialEq, Clone)]
pub struct Willmsg {
    pub message: Bytes,
}

/// Gateway's reply to Willtopicupd/Willmsgupd.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Willtopicresp {
    pub return_code: ReturnCode,
}

/// Registers a topic name against a topic id, in either direction.
#[derive(Debug, PartialEq, Clone)]
pub struct Register {
    pub topic_id: u16,
    pub msg_id: u16,
    pub topic_name: String,
}

/// Acknowledges a Register.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Regack {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: ReturnCode,
}

/// Publish message.
#[derive(Debug, PartialEq, Clone)]
pub struct Publish {
    pub dup: bool,
    /// `None` when the wire flags carried the reserved topic-id-type value `0b11`.
    pub qos: Option<QoS>,
    pub retain: bool,
    pub topic_id_type: Option<TopicIdType>,
    pub topic_id: TopicId,
    pub msg_id: u16,
    pub data: Bytes,
}

/// Acknowledges a Publish (qos 1/2 only).
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Puback {
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: ReturnCode,
}

/// Generic `{msg_id}`-only acknowledgement shared by Pubrec/Pubrel/Pubcomp/Unsuback.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct PacketIdAck {
    pub msg_id: u16,
}

/// Client subscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Subscribe {
    pub dup: bool,
    pub qos: Option<QoS>,
    pub msg_id: u16,
    pub topic: SubscribeTopic,
}

/// A Subscribe/Unsubscribe names its topic either by filter string or by predefined/short id,
/// mirroring the `topic_id_type` bits that select how the trailing bytes are interpreted.
#[derive(Debug, PartialEq, Clone)]
pub enum SubscribeTopic {
    Name(String),
    Predefined(u16),
    Short(String),
}

/// Acknowledges a Subscribe.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Suback {
    pub qos: Option<QoS>,
    pub topic_id: u16,
    pub msg_id: u16,
    pub return_code: ReturnCode,
}

/// Client unsubscribe request.
#[derive(Debug, PartialEq, Clone)]
pub struct Unsubscribe {
    pub msg_id: u16,
    pub topic: SubscribeTopic,
}

/// Client keep-alive; optionally carries its client id when sent while asleep.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Pingreq {
    pub client_id: Option<String>,
}

/// Graceful disconnect; a non-zero duration requests the "asleep" state instead of disconnecting.
#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Disconnect {
    pub duration: Option<u16>,
}
