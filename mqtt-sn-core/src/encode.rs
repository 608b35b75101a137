use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::packet::*;

trait BufMutExt: BufMut {
    fn put_short_topic(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.put_u8(bytes.first().copied().unwrap_or(b' '));
        self.put_u8(bytes.get(1).copied().unwrap_or(b' '));
    }
}

impl<T: BufMut> BufMutExt for T {}

fn put_topic_id(buf: &mut BytesMut, topic_id: &TopicId) {
    match topic_id {
        TopicId::Normal(id) | TopicId::Predefined(id) => buf.put_u16(*id),
        TopicId::Short(name) => buf.put_short_topic(name),
    }
}

fn topic_id_type_of(topic_id: &TopicId) -> TopicIdType {
    match topic_id {
        TopicId::Normal(_) => TopicIdType::Normal,
        TopicId::Predefined(_) => TopicIdType::Predefined,
        TopicId::Short(_) => TopicIdType::Short,
    }
}

fn subscribe_topic_type(topic: &SubscribeTopic) -> TopicIdType {
    match topic {
        SubscribeTopic::Name(_) => TopicIdType::Normal,
        SubscribeTopic::Predefined(_) => TopicIdType::Predefined,
        SubscribeTopic::Short(_) => TopicIdType::Short,
    }
}

fn put_subscribe_topic(buf: &mut BytesMut, topic: &SubscribeTopic) {
    match topic {
        SubscribeTopic::Name(name) => buf.put_slice(name.as_bytes()),
        SubscribeTopic::Predefined(id) => buf.put_u16(*id),
        SubscribeTopic::Short(name) => buf.put_short_topic(name),
    }
}

fn subscribe_topic_len(topic: &SubscribeTopic) -> usize {
    match topic {
        SubscribeTopic::Name(name) => name.len(),
        SubscribeTopic::Predefined(_) => 2,
        SubscribeTopic::Short(_) => 2,
    }
}

impl Packet {
    fn msg_type(&self) -> Type {
        self.packet_type()
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::Advertise(_) => 3,
            Packet::Searchgw(_) => 1,
            Packet::Gwinfo(g) => 1 + g.gateway_address.as_ref().map_or(0, |a| a.len()),
            Packet::Connect(c) => 1 + 1 + 2 + c.client_id.len(),
            Packet::Connack(_) => 1,
            Packet::Willtopicreq => 0,
            Packet::Willtopic(w) => 1 + w.topic.len(),
            Packet::Willmsgreq => 0,
            Packet::Willmsg(w) => w.message.len(),
            Packet::Register(r) => 2 + 2 + r.topic_name.len(),
            Packet::Regack(_) => 5,
            Packet::Publish(p) => 1 + 2 + 2 + p.data.len(),
            Packet::Puback(_) => 5,
            Packet::Pubcomp(_) | Packet::Pubrec(_) | Packet::Pubrel(_) | Packet::Unsuback(_) => 2,
            Packet::Subscribe(s) => 1 + 2 + subscribe_topic_len(&s.topic),
            Packet::Suback(_) => 6,
            Packet::Unsubscribe(u) => 1 + 2 + subscribe_topic_len(&u.topic),
            Packet::Pingreq(p) => p.client_id.as_ref().map_or(0, |id| id.len()),
            Packet::Pingresp => 0,
            Packet::Disconnect(d) => d.duration.map_or(0, |_| 2),
            Packet::Willtopicupd(w) => 1 + w.topic.len(),
            Packet::Willtopicresp(_) => 1,
            Packet::Willmsgupd(w) => w.message.len(),
            Packet::Willmsgresp(_) => 1,
        }
    }

    fn write_body(&self, buf: &mut BytesMut) {
        match self {
            Packet::Advertise(a) => {
                buf.put_u8(a.gateway_id);
                buf.put_u16(a.duration);
            }
            Packet::Searchgw(s) => buf.put_u8(s.radius),
            Packet::Gwinfo(g) => {
                buf.put_u8(g.gateway_id);
                if let Some(ref addr) = g.gateway_address {
                    buf.put_slice(addr);
                }
            }
            Packet::Connect(c) => {
                let mut flags = Flags::empty();
                if c.will {
                    flags.insert(Flags::WILL);
                }
                if c.clean_session {
                    flags.insert(Flags::CLEAN_SESSION);
                }
                buf.put_u8(flags.bits());
                buf.put_u8(PROTOCOL_ID);
                buf.put_u16(c.duration);
                buf.put_slice(c.client_id.as_bytes());
            }
            Packet::Connack(c) => buf.put_u8(c.return_code as u8),
            Packet::Willtopicreq | Packet::Willmsgreq | Packet::Pingresp => {}
            Packet::Willtopic(w) | Packet::Willtopicupd(w) => {
                let mut flags = Flags::from(w.qos);
                if w.retain {
                    flags.insert(Flags::RETAIN);
                }
                buf.put_u8(flags.bits());
                buf.put_slice(w.topic.as_bytes());
            }
            Packet::Willmsg(w) | Packet::Willmsgupd(w) => buf.put_slice(&w.message),
            Packet::Register(r) => {
                buf.put_u16(r.topic_id);
                buf.put_u16(r.msg_id);
                buf.put_slice(r.topic_name.as_bytes());
            }
            Packet::Regack(r) => {
                buf.put_u16(r.topic_id);
                buf.put_u16(r.msg_id);
                buf.put_u8(r.return_code as u8);
            }
            Packet::Publish(p) => {
                let mut flags = Flags::from(topic_id_type_of(&p.topic_id));
                if let Some(qos) = p.qos {
                    flags |= Flags::from(qos);
                }
                if p.dup {
                    flags.insert(Flags::DUP);
                }
                if p.retain {
                    flags.insert(Flags::RETAIN);
                }
                buf.put_u8(flags.bits());
                put_topic_id(buf, &p.topic_id);
                buf.put_u16(p.msg_id);
                buf.put_slice(&p.data);
            }
            Packet::Puback(p) => {
                buf.put_u16(p.topic_id);
                buf.put_u16(p.msg_id);
                buf.put_u8(p.return_code as u8);
            }
            Packet::Pubcomp(a) | Packet::Pubrec(a) | Packet::Pubrel(a) | Packet::Unsuback(a) => {
                buf.put_u16(a.msg_id)
            }
            Packet::Subscribe(s) => {
                let mut flags = Flags::from(subscribe_topic_type(&s.topic));
                if let Some(qos) = s.qos {
                    flags |= Flags::from(qos);
                }
                if s.dup {
                    flags.insert(Flags::DUP);
                }
                buf.put_u8(flags.bits());
                buf.put_u16(s.msg_id);
                put_subscribe_topic(buf, &s.topic);
            }
            Packet::Suback(s) => {
                let flags = s.qos.map_or(Flags::empty(), Flags::from);
                buf.put_u8(flags.bits());
                buf.put_u16(s.topic_id);
                buf.put_u16(s.msg_id);
                buf.put_u8(s.return_code as u8);
            }
            Packet::Unsubscribe(u) => {
                let flags = Flags::from(subscribe_topic_type(&u.topic));
                buf.put_u8(flags.bits());
                buf.put_u16(u.msg_id);
                put_subscribe_topic(buf, &u.topic);
            }
            Packet::Pingreq(p) => {
                if let Some(ref id) = p.client_id {
                    buf.put_slice(id.as_bytes());
                }
            }
            Packet::Disconnect(d) => {
                if let Some(duration) = d.duration {
                    buf.put_u16(duration);
                }
            }
            Packet::Willtopicresp(w) | Packet::Willmsgresp(w) => buf.put_u8(w.return_code as u8),
        }
    }
}

/// Serializes `packet` into a freshly allocated buffer, including its length header.
///
/// Fails if the encoded body would exceed [`MAX_BODY_LENGTH`].
pub fn encode(packet: &Packet) -> Result<BytesMut, Error> {
    let body_len = 1 + packet.body_len(); // +1 for the message type octet
    if body_len > MAX_BODY_LENGTH {
        return Err(Error::PacketTooLarge(body_len));
    }

    let total_len = if body_len + 1 < 256 {
        body_len + 1
    } else {
        body_len + 3
    };

    let mut buf = BytesMut::with_capacity(total_len);
    if total_len < 256 {
        buf.put_u8(total_len as u8);
    } else {
        buf.put_u8(0x01);
        buf.put_u16(total_len as u16);
    }
    buf.put_u8(packet.msg_type() as u8);
    packet.write_body(&mut buf);

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_pingreq_pingresp() {
        assert_eq!(&encode(&Packet::Pingresp).unwrap()[..], b"\x02\x17");
    }

    #[test]
    fn test_publish_short_topic_qos_minus_one_round_trips() {
        let packet = Packet::Publish(Publish {
            dup: false,
            qos: Some(QoS::AtMostOnceNoConnect),
            retain: false,
            topic_id_type: Some(TopicIdType::Short),
            topic_id: TopicId::Short("tt".to_owned()),
            msg_id: 0,
            data: Bytes::from_static(b"Hello World"),
        });

        let encoded = encode(&packet).unwrap();
        assert_eq!(&encoded[..], b"\x12\x0C\x62tt\x00\x00Hello World");
        assert_eq!(crate::decode::parse(&encoded).unwrap(), packet);
    }

    #[test]
    fn test_rejects_oversized_body() {
        let packet = Packet::Willmsg(Willmsg {
            message: Bytes::from(vec![0u8; MAX_BODY_LENGTH]),
        });

        assert!(matches!(encode(&packet), Err(Error::PacketTooLarge(_))));
    }

    #[test]
    fn test_long_length_form() {
        let packet = Packet::Willmsg(Willmsg {
            message: Bytes::from(vec![b'x'; 300]),
        });

        let encoded = encode(&packet).unwrap();
        assert_eq!(encoded[0], 0x01);
        let len = u16::from_be_bytes([encoded[1], encoded[2]]) as usize;
        assert_eq!(len, encoded.len());
    }
}
