use std::convert::TryFrom;

use bytes::Bytes;

use crate::error::Error;
use crate::packet::*;

/// A cursor over a single packet's already-delimited body.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() < n {
            return Err(Error::TruncatedPacket);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn rest_bytes(&mut self) -> Bytes {
        let rest = self.buf;
        self.buf = &[];
        Bytes::copy_from_slice(rest)
    }

    fn rest_str(&mut self) -> Result<String, Error> {
        let rest = self.take(self.remaining())?;
        std::str::from_utf8(rest)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8)
    }

    fn rest_opt_u16(&mut self) -> Result<Option<u16>, Error> {
        if self.remaining() == 0 {
            Ok(None)
        } else {
            Ok(Some(self.u16()?))
        }
    }

    fn rest_opt_str(&mut self) -> Result<Option<String>, Error> {
        if self.remaining() == 0 {
            Ok(None)
        } else {
            Ok(Some(self.rest_str()?))
        }
    }

    fn rest_opt_bytes(&mut self) -> Option<Bytes> {
        if self.remaining() == 0 {
            None
        } else {
            Some(self.rest_bytes())
        }
    }
}

fn topic_from_flags(
    topic_id_type: Option<TopicIdType>,
    cursor: &mut Cursor,
) -> Result<TopicId, Error> {
    match topic_id_type {
        Some(TopicIdType::Normal) => Ok(TopicId::Normal(cursor.u16()?)),
        Some(TopicIdType::Predefined) => Ok(TopicId::Predefined(cursor.u16()?)),
        Some(TopicIdType::Short) => {
            let raw = cursor.take(2)?;
            let name = std::str::from_utf8(raw)
                .map(str::to_owned)
                .map_err(|_| Error::InvalidUtf8)?;
            Ok(TopicId::Short(name))
        }
        None => {
            // reserved topic-id-type value: preserve the raw two bytes as a short-shaped id
            let raw = cursor.take(2)?;
            Ok(TopicId::Short(
                raw.iter().map(|&b| b as char).collect::<String>(),
            ))
        }
    }
}

fn subscribe_topic_from_flags(
    topic_id_type: Option<TopicIdType>,
    cursor: &mut Cursor,
) -> Result<SubscribeTopic, Error> {
    match topic_id_type {
        Some(TopicIdType::Normal) | None => Ok(SubscribeTopic::Name(cursor.rest_str()?)),
        Some(TopicIdType::Predefined) => Ok(SubscribeTopic::Predefined(cursor.u16()?)),
        Some(TopicIdType::Short) => Ok(SubscribeTopic::Short(cursor.rest_str()?)),
    }
}

fn parse_body(msg_type: Type, body: &[u8]) -> Result<Packet, Error> {
    let mut cursor = Cursor::new(body);

    let packet = match msg_type {
        Type::ADVERTISE => Packet::Advertise(Advertise {
            gateway_id: cursor.u8()?,
            duration: cursor.u16()?,
        }),
        Type::SEARCHGW => Packet::Searchgw(Searchgw {
            radius: cursor.u8()?,
        }),
        Type::GWINFO => Packet::Gwinfo(Gwinfo {
            gateway_id: cursor.u8()?,
            gateway_address: cursor.rest_opt_bytes(),
        }),
        Type::CONNECT => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            let protocol_id = cursor.u8()?;
            if protocol_id != PROTOCOL_ID {
                return Err(Error::UnsupportedProtocolId(protocol_id));
            }
            let duration = cursor.u16()?;
            let client_id = cursor.rest_str()?;
            Packet::Connect(Connect {
                will: flags.contains(Flags::WILL),
                clean_session: flags.contains(Flags::CLEAN_SESSION),
                duration,
                client_id,
            })
        }
        Type::CONNACK => Packet::Connack(Connack {
            return_code: parse_return_code(cursor.u8()?)?,
        }),
        Type::WILLTOPICREQ => Packet::Willtopicreq,
        Type::WILLTOPIC => {
            if cursor.remaining() == 0 {
                // an empty Willtopic clears the will; model as an empty-topic record
                Packet::Willtopic(Willtopic {
                    qos: QoS::AtMostOnce,
                    retain: false,
                    topic: String::new(),
                })
            } else {
                let flags = Flags::from_bits_truncate(cursor.u8()?);
                Packet::Willtopic(Willtopic {
                    qos: flags.qos().unwrap_or(QoS::AtMostOnce),
                    retain: flags.contains(Flags::RETAIN),
                    topic: cursor.rest_str()?,
                })
            }
        }
        Type::WILLMSGREQ => Packet::Willmsgreq,
        Type::WILLMSG => Packet::Willmsg(Willmsg {
            message: cursor.rest_bytes(),
        }),
        Type::REGISTER => Packet::Register(Register {
            topic_id: cursor.u16()?,
            msg_id: cursor.u16()?,
            topic_name: cursor.rest_str()?,
        }),
        Type::REGACK => Packet::Regack(Regack {
            topic_id: cursor.u16()?,
            msg_id: cursor.u16()?,
            return_code: parse_return_code(cursor.u8()?)?,
        }),
        Type::PUBLISH => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            let topic_id_type = flags.topic_id_type();
            let topic_id = topic_from_flags(topic_id_type, &mut cursor)?;
            let msg_id = cursor.u16()?;
            let data = cursor.rest_bytes();
            Packet::Publish(Publish {
                dup: flags.contains(Flags::DUP),
                qos: flags.qos(),
                retain: flags.contains(Flags::RETAIN),
                topic_id_type,
                topic_id,
                msg_id,
                data,
            })
        }
        Type::PUBACK => Packet::Puback(Puback {
            topic_id: cursor.u16()?,
            msg_id: cursor.u16()?,
            return_code: parse_return_code(cursor.u8()?)?,
        }),
        Type::PUBCOMP => Packet::Pubcomp(PacketIdAck {
            msg_id: cursor.u16()?,
        }),
        Type::PUBREC => Packet::Pubrec(PacketIdAck {
            msg_id: cursor.u16()?,
        }),
        Type::PUBREL => Packet::Pubrel(PacketIdAck {
            msg_id: cursor.u16()?,
        }),
        Type::SUBSCRIBE => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            let msg_id = cursor.u16()?;
            let topic = subscribe_topic_from_flags(flags.topic_id_type(), &mut cursor)?;
            Packet::Subscribe(Subscribe {
                dup: flags.contains(Flags::DUP),
                qos: flags.qos(),
                msg_id,
                topic,
            })
        }
        Type::SUBACK => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            Packet::Suback(Suback {
                qos: flags.qos(),
                topic_id: cursor.u16()?,
                msg_id: cursor.u16()?,
                return_code: parse_return_code(cursor.u8()?)?,
            })
        }
        Type::UNSUBSCRIBE => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            let msg_id = cursor.u16()?;
            let topic = subscribe_topic_from_flags(flags.topic_id_type(), &mut cursor)?;
            Packet::Unsubscribe(Unsubscribe { msg_id, topic })
        }
        Type::UNSUBACK => Packet::Unsuback(PacketIdAck {
            msg_id: cursor.u16()?,
        }),
        Type::PINGREQ => Packet::Pingreq(Pingreq {
            client_id: cursor.rest_opt_str()?,
        }),
        Type::PINGRESP => Packet::Pingresp,
        Type::DISCONNECT => Packet::Disconnect(Disconnect {
            duration: cursor.rest_opt_u16()?,
        }),
        Type::WILLTOPICUPD => {
            let flags = Flags::from_bits_truncate(cursor.u8()?);
            Packet::Willtopicupd(Willtopic {
                qos: flags.qos().unwrap_or(QoS::AtMostOnce),
                retain: flags.contains(Flags::RETAIN),
                topic: cursor.rest_str()?,
            })
        }
        Type::WILLTOPICRESP => Packet::Willtopicresp(Willtopicresp {
            return_code: parse_return_code(cursor.u8()?)?,
        }),
        Type::WILLMSGUPD => Packet::Willmsgupd(Willmsg {
            message: cursor.rest_bytes(),
        }),
        Type::WILLMSGRESP => Packet::Willmsgresp(Willtopicresp {
            return_code: parse_return_code(cursor.u8()?)?,
        }),
    };

    Ok(packet)
}

fn parse_return_code(byte: u8) -> Result<ReturnCode, Error> {
    ReturnCode::try_from(byte).or(Ok(ReturnCode::RejectedNotSupported))
}

/// Parses one MQTT-SN packet from a complete, exactly-sized buffer.
///
/// Unlike the MQTT codec, MQTT-SN frames are self-delimiting datagrams: `buf` must contain
/// exactly one packet, as handed up whole by a UDP socket — a length mismatch between the header
/// and `buf.len()` is a protocol error, not "need more bytes".
pub fn parse(buf: &[u8]) -> Result<Packet, Error> {
    let (header_len, length) = read_length(buf)?;

    if length != buf.len() {
        return Err(Error::LengthMismatch);
    }

    let msg_type = Type::try_from(buf[header_len])
        .map_err(|_| Error::UnknownMessageType(buf[header_len]))?;

    parse_body(msg_type, &buf[header_len + 1..])
}

/// Reads the 1- or 3-byte length header. Returns `(header_len, total_packet_length)`.
pub(crate) fn read_length(buf: &[u8]) -> Result<(usize, usize), Error> {
    if buf.is_empty() {
        return Err(Error::TruncatedPacket);
    }

    let first = buf[0];
    if first == 0x01 {
        if buf.len() < 3 {
            return Err(Error::MalformedLength);
        }
        let length = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        Ok((3, length))
    } else if first == 0x00 {
        Err(Error::MalformedLength)
    } else {
        Ok((1, first as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_length_short() {
        assert_eq!(read_length(b"\x02\x16").unwrap(), (1, 2));
    }

    #[test]
    fn test_read_length_long() {
        let mut buf = vec![0x01, 0x01, 0x04];
        buf.extend(std::iter::repeat(0u8).take(0x104 - 3));
        assert_eq!(read_length(&buf).unwrap(), (3, 0x104));
    }

    #[test]
    fn test_pingreq_pingresp() {
        assert_eq!(parse(b"\x02\x16").unwrap(), Packet::Pingreq(Pingreq::default()));
        assert_eq!(parse(b"\x02\x17").unwrap(), Packet::Pingresp);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(parse(b"\x03\x16"), Err(Error::LengthMismatch)));
    }

    #[test]
    fn test_connect_rejects_bad_protocol_id() {
        let buf = b"\x06\x04\x04\x02\x00\x3c";
        assert!(matches!(
            parse(buf),
            Err(Error::UnsupportedProtocolId(2))
        ));
    }

    #[test]
    fn test_publish_short_topic_qos_minus_one() {
        let buf = b"\x12\x0C\x62tt\x00\x00Hello World";
        let packet = parse(buf).unwrap();

        assert_eq!(
            packet,
            Packet::Publish(Publish {
                dup: false,
                qos: Some(QoS::AtMostOnceNoConnect),
                retain: false,
                topic_id_type: Some(TopicIdType::Short),
                topic_id: TopicId::Short("tt".to_owned()),
                msg_id: 0,
                data: Bytes::from_static(b"Hello World"),
            })
        );
    }
}
