use std::mem;

use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::packet::*;

const LENGTH_FIELD_SIZE: usize = mem::size_of::<u16>();

trait BufMutExt: BufMut {
    fn put_utf8_str(&mut self, s: &str) {
        self.put_binary(s.as_bytes())
    }

    fn put_binary(&mut self, s: &[u8]) {
        self.put_u16(s.len() as u16);
        self.put_slice(s)
    }

    fn put_varint(&mut self, mut n: usize) {
        loop {
            let b = (n % 0x80) as u8;
            n >>= 7;
            if n > 0 {
                self.put_u8(0x80 | b);
            } else {
                self.put_u8(b);
                break;
            }
        }
    }
}

impl<T: BufMut> BufMutExt for T {}

fn size_of_varint(n: usize) -> usize {
    match n {
        n if n <= 127 => 1,
        n if n <= 16_383 => 2,
        n if n <= 2_097_151 => 3,
        _ => 4,
    }
}

impl Packet {
    fn packet_flags(&self) -> u8 {
        match self {
            Packet::Publish(publish) => publish.flags().bits(),
            Packet::PublishRelease(_) | Packet::Subscribe(_) | Packet::Unsubscribe(_) => 0x02,
            _ => 0,
        }
    }

    fn remaining_length(&self) -> usize {
        match self {
            Packet::Connect(connect) => connect.size(),
            Packet::ConnectAck(_) => 2,
            Packet::Publish(publish) => publish.size(),
            Packet::PublishAck(_)
            | Packet::PublishReceived(_)
            | Packet::PublishRelease(_)
            | Packet::PublishComplete(_)
            | Packet::UnsubscribeAck(_) => mem::size_of::<PacketId>(),
            Packet::Subscribe(subscribe) => subscribe.size(),
            Packet::SubscribeAck(subscribe_ack) => subscribe_ack.size(),
            Packet::Unsubscribe(unsubscribe) => unsubscribe.size(),
            Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match self {
            Packet::Connect(connect) => {
                if connect.client_id.is_empty() && !connect.clean_session {
                    return Err(Error::MissingClientId);
                }
                if connect.password.is_some() && connect.username.is_none() {
                    return Err(Error::PasswordWithoutUsername);
                }
            }
            Packet::Subscribe(subscribe) if subscribe.subscriptions.is_empty() => {
                return Err(Error::EmptyTopicFilterList)
            }
            Packet::Unsubscribe(unsubscribe) if unsubscribe.topic_filters.is_empty() => {
                return Err(Error::EmptyTopicFilterList)
            }
            _ => {}
        }

        Ok(())
    }
}

impl Connect {
    fn size(&self) -> usize {
        LENGTH_FIELD_SIZE + self.protocol_version.name().len()
            + mem::size_of::<u8>() // protocol level
            + mem::size_of::<u8>() // flags
            + mem::size_of::<u16>() // keep_alive
            + LENGTH_FIELD_SIZE + self.client_id.len()
            + self.last_will.as_ref().map_or(0, |will| {
                LENGTH_FIELD_SIZE + will.topic.len() + LENGTH_FIELD_SIZE + will.message.len()
            })
            + self.username.as_ref().map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
            + self.password.as_ref().map_or(0, |s| LENGTH_FIELD_SIZE + s.len())
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let mut flags = ConnectFlags::empty();
        if let Some(ref will) = self.last_will {
            flags.remove(ConnectFlags::WILL_QOS);
            flags |= ConnectFlags::LAST_WILL | will.qos.into();
            if will.retain {
                flags.insert(ConnectFlags::WILL_RETAIN);
            }
        }
        if self.username.is_some() {
            flags |= ConnectFlags::USERNAME;
        }
        if self.password.is_some() {
            flags |= ConnectFlags::PASSWORD;
        }
        if self.clean_session {
            flags |= ConnectFlags::CLEAN_SESSION;
        }

        buf.put_utf8_str(std::str::from_utf8(self.protocol_version.name()).unwrap());
        buf.put_u8(self.protocol_version.level());
        buf.put_u8(flags.bits());
        buf.put_u16(self.keep_alive);
        buf.put_utf8_str(&self.client_id);
        if let Some(ref will) = self.last_will {
            buf.put_utf8_str(&will.topic);
            buf.put_binary(&will.message);
        }
        if let Some(ref username) = self.username {
            buf.put_utf8_str(username);
        }
        if let Some(ref password) = self.password {
            buf.put_binary(password);
        }
    }
}

impl ConnectAck {
    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(if self.session_present { 1 } else { 0 });
        buf.put_u8(self.return_code as u8);
    }
}

impl Publish {
    fn size(&self) -> usize {
        LENGTH_FIELD_SIZE
            + self.topic.len()
            + self.packet_id.map_or(0, |_| mem::size_of::<PacketId>())
            + self.payload.len()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_utf8_str(&self.topic);
        if let Some(packet_id) = self.packet_id {
            buf.put_u16(packet_id);
        }
        buf.put_slice(&self.payload);
    }
}

impl Subscribe {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + self
                .subscriptions
                .iter()
                .map(|(topic_filter, _)| LENGTH_FIELD_SIZE + topic_filter.len() + mem::size_of::<u8>())
                .sum::<usize>()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        for (topic_filter, qos) in &self.subscriptions {
            buf.put_utf8_str(topic_filter);
            buf.put_u8(*qos as u8);
        }
    }
}

impl SubscribeAck {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>() + self.status.len()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        for &return_code in &self.status {
            buf.put_u8(return_code.into());
        }
    }
}

impl Unsubscribe {
    fn size(&self) -> usize {
        mem::size_of::<PacketId>()
            + self
                .topic_filters
                .iter()
                .map(|topic_filter| LENGTH_FIELD_SIZE + topic_filter.len())
                .sum::<usize>()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.packet_id);
        for topic_filter in &self.topic_filters {
            buf.put_utf8_str(topic_filter);
        }
    }
}

fn write_packet_id(buf: &mut BytesMut, packet_id: PacketId) {
    buf.put_u16(packet_id);
}

/// Serializes `packet` into a freshly allocated buffer.
///
/// Fails if the packet violates a structural invariant (missing client id, password without a
/// username, empty topic filter list) or its encoded body would overflow the four-byte
/// variable-byte remaining-length field.
pub fn encode(packet: &Packet) -> Result<BytesMut, Error> {
    packet.validate()?;

    let remaining_length = packet.remaining_length();
    if remaining_length > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge(remaining_length));
    }

    let mut buf = BytesMut::with_capacity(1 + size_of_varint(remaining_length) + remaining_length);

    buf.put_u8(((packet.packet_type() as u8) << 4) | packet.packet_flags());
    buf.put_varint(remaining_length);

    match packet {
        Packet::Connect(connect) => connect.write_to(&mut buf),
        Packet::ConnectAck(connect_ack) => connect_ack.write_to(&mut buf),
        Packet::Publish(publish) => publish.write_to(&mut buf),
        Packet::PublishAck(ack) => write_packet_id(&mut buf, ack.packet_id),
        Packet::PublishReceived(ack) => write_packet_id(&mut buf, ack.packet_id),
        Packet::PublishRelease(ack) => write_packet_id(&mut buf, ack.packet_id),
        Packet::PublishComplete(ack) => write_packet_id(&mut buf, ack.packet_id),
        Packet::Subscribe(subscribe) => subscribe.write_to(&mut buf),
        Packet::SubscribeAck(subscribe_ack) => subscribe_ack.write_to(&mut buf),
        Packet::Unsubscribe(unsubscribe) => unsubscribe.write_to(&mut buf),
        Packet::UnsubscribeAck(ack) => write_packet_id(&mut buf, ack.packet_id),
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => {}
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    macro_rules! assert_packet {
        ($packet:expr, $right:expr) => {
            assert_eq!(&encode(&$packet).unwrap()[..], &$right[..]);
        };
    }

    #[test]
    fn test_connect() {
        assert_packet!(
            Packet::Connect(Connect {
                protocol_version: ProtocolVersion::V311,
                clean_session: false,
                keep_alive: 60,
                client_id: "12345".to_owned(),
                last_will: None,
                username: Some("user".to_owned()),
                password: Some(Bytes::from_static(b"pass")),
            }),
            b"\x10\x1D\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass"
        );

        assert_packet!(Packet::Disconnect, b"\xe0\x00");
    }

    #[test]
    fn test_publish() {
        assert_packet!(
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::ExactlyOnce,
                topic: "topic".to_owned(),
                packet_id: Some(0x4321),
                payload: Bytes::from_static(b"data"),
            }),
            b"\x3d\x0D\x00\x05topic\x43\x21data"
        );

        assert_packet!(
            Packet::Publish(Publish {
                dup: false,
                retain: false,
                qos: QoS::AtMostOnce,
                topic: "topic".to_owned(),
                packet_id: None,
                payload: Bytes::from_static(b"data"),
            }),
            b"\x30\x0b\x00\x05topicdata"
        );
    }

    #[test]
    fn test_subscribe() {
        assert_packet!(
            Packet::Subscribe(Subscribe {
                packet_id: 0x1234,
                subscriptions: vec![
                    ("test".to_owned(), QoS::AtLeastOnce),
                    ("filter".to_owned(), QoS::ExactlyOnce),
                ],
            }),
            b"\x82\x12\x12\x34\x00\x04test\x01\x00\x06filter\x02"
        );
    }

    #[test]
    fn test_ping_pong() {
        assert_packet!(Packet::PingReq, b"\xc0\x00");
        assert_packet!(Packet::PingResp, b"\xd0\x00");
    }

    #[test]
    fn test_rejects_missing_client_id() {
        let packet = Packet::Connect(Connect {
            protocol_version: ProtocolVersion::V311,
            clean_session: false,
            keep_alive: 60,
            client_id: String::new(),
            last_will: None,
            username: None,
            password: None,
        });

        assert!(matches!(encode(&packet), Err(Error::MissingClientId)));
    }

    #[test]
    fn test_rejects_password_without_username() {
        let packet = Packet::Connect(Connect {
            protocol_version: ProtocolVersion::V311,
            clean_session: true,
            keep_alive: 60,
            client_id: String::new(),
            last_will: None,
            username: None,
            password: Some(Bytes::from_static(b"pass")),
        });

        assert!(matches!(encode(&packet), Err(Error::PasswordWithoutUsername)));
    }

    #[test]
    fn test_rejects_empty_subscribe() {
        let packet = Packet::Subscribe(Subscribe {
            packet_id: 1,
            subscriptions: Vec::new(),
        });

        assert!(matches!(encode(&packet), Err(Error::EmptyTopicFilterList)));
    }
}
