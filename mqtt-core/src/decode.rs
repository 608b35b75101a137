use std::convert::TryFrom;

use bytes::Bytes;
use nom::{
    bytes::complete::take_while_m_n,
    combinator::{recognize, verify},
    sequence::pair,
    IResult,
};

use crate::error::Error;
use crate::packet::*;

const CONTINUATION_BIT: u8 = 0x80;

/// Decodes the variable-byte remaining-length field shared by every fixed header.
///
/// Kept as a nom combinator because the continuation-bit scan is exactly the shape nom's
/// `take_while_m_n`/`verify` pair was built for; everything past the fixed header is parsed by
/// hand so each failure can carry the specific [`Error`] variant the session engine reports.
fn variable_length(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, digits) = recognize(pair(
        take_while_m_n(0, 3, |b| (b & CONTINUATION_BIT) != 0),
        verify(nom::number::complete::be_u8, |b| (b & CONTINUATION_BIT) == 0),
    ))(input)?;

    let value = digits.iter().enumerate().fold(0usize, |value, (i, b)| {
        value + (usize::from(*b & !CONTINUATION_BIT) << (7 * i))
    });

    Ok((input, value))
}

/// Result of looking for a complete fixed header at the front of a buffer.
pub(crate) enum Header {
    /// Not enough bytes buffered yet to even know the remaining length.
    Incomplete,
    Found {
        fixed: FixedHeader,
        /// Bytes occupied by the fixed header itself (1 to 5).
        header_len: usize,
    },
}

/// Looks for a complete fixed header without consuming anything; the caller decides whether the
/// body (`fixed.remaining_length` bytes past `header_len`) has also arrived.
pub(crate) fn peek_fixed_header(input: &[u8]) -> Result<Header, Error> {
    if input.is_empty() {
        return Ok(Header::Incomplete);
    }

    let first = input[0];
    let packet_type =
        Type::try_from((first >> 4) & 0x0F).map_err(|_| Error::UnknownPacketType(first))?;
    let packet_flags = first & 0x0F;

    match variable_length(&input[1..]) {
        Ok((rest, remaining_length)) => Ok(Header::Found {
            fixed: FixedHeader {
                packet_type,
                packet_flags,
                remaining_length,
            },
            header_len: input.len() - rest.len() + 1,
        }),
        Err(nom::Err::Incomplete(_)) => Ok(Header::Incomplete),
        Err(_) => {
            if input.len() < 5 {
                // might just be starved of the final, non-continuation byte
                Ok(Header::Incomplete)
            } else {
                Err(Error::MalformedVariableByteInteger)
            }
        }
    }
}

/// A cursor over a single packet's already-delimited body, producing the specific [`Error`]
/// variant the session engine and public API surface to callers.
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

    fn binary(&mut self) -> Result<Bytes, Error> {
        let len = self.u16()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    fn utf8_str(&mut self) -> Result<String, Error> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidUtf8)
    }
}

/// Parses the body of a single Control Packet, given its already-validated fixed header.
///
/// `body` must be exactly `fixed.remaining_length` bytes; the caller ([`crate::PacketReader`] or
/// [`parse`]) is responsible for slicing it out of the stream buffer.
fn parse_body(fixed: &FixedHeader, body: &[u8]) -> Result<Packet, Error> {
    let mut cursor = Cursor::new(body);

    let packet = match fixed.packet_type {
        Type::CONNECT => Packet::Connect(parse_connect(&mut cursor)?),
        Type::CONNACK => Packet::ConnectAck(parse_connect_ack(&mut cursor)?),
        Type::PUBLISH => Packet::Publish(parse_publish(fixed.packet_flags, &mut cursor)?),
        Type::PUBACK => Packet::PublishAck(PublishAck {
            packet_id: cursor.u16()?,
        }),
        Type::PUBREC => Packet::PublishReceived(PublishReceived {
            packet_id: cursor.u16()?,
        }),
        Type::PUBREL => Packet::PublishRelease(PublishRelease {
            packet_id: cursor.u16()?,
        }),
        Type::PUBCOMP => Packet::PublishComplete(PublishComplete {
            packet_id: cursor.u16()?,
        }),
        Type::SUBSCRIBE => Packet::Subscribe(parse_subscribe(&mut cursor)?),
        Type::SUBACK => Packet::SubscribeAck(parse_subscribe_ack(&mut cursor)?),
        Type::UNSUBSCRIBE => Packet::Unsubscribe(parse_unsubscribe(&mut cursor)?),
        Type::UNSUBACK => Packet::UnsubscribeAck(UnsubscribeAck {
            packet_id: cursor.u16()?,
        }),
        Type::PINGREQ => Packet::PingReq,
        Type::PINGRESP => Packet::PingResp,
        Type::DISCONNECT => Packet::Disconnect,
    };

    Ok(packet)
}

fn parse_connect(cursor: &mut Cursor) -> Result<Connect, Error> {
    let name = cursor.utf8_name()?;
    let protocol_version = match name.as_slice() {
        b"MQIsdp" => ProtocolVersion::V310,
        b"MQTT" => ProtocolVersion::V311,
        _ => return Err(Error::MalformedBody),
    };

    let level = cursor.u8()?;
    if level != protocol_version.level() {
        return Err(Error::MalformedBody);
    }

    let flags = ConnectFlags::from_bits(cursor.u8()?).ok_or(Error::MalformedBody)?;
    let keep_alive = cursor.u16()?;
    let client_id = cursor.utf8_str()?;

    if client_id.is_empty() && !flags.contains(ConnectFlags::CLEAN_SESSION) {
        return Err(Error::MissingClientId);
    }

    let last_will = if flags.contains(ConnectFlags::LAST_WILL) {
        Some(LastWill {
            qos: flags.qos(),
            retain: flags.contains(ConnectFlags::WILL_RETAIN),
            topic: cursor.utf8_str()?,
            message: cursor.binary()?,
        })
    } else {
        None
    };

    let username = if flags.contains(ConnectFlags::USERNAME) {
        Some(cursor.utf8_str()?)
    } else {
        None
    };
    let password = if flags.contains(ConnectFlags::PASSWORD) {
        if username.is_none() {
            return Err(Error::PasswordWithoutUsername);
        }
        Some(cursor.binary()?)
    } else {
        None
    };

    Ok(Connect {
        protocol_version,
        clean_session: flags.contains(ConnectFlags::CLEAN_SESSION),
        keep_alive,
        client_id,
        last_will,
        username,
        password,
    })
}

impl<'a> Cursor<'a> {
    /// Reads the protocol name field (length-prefixed, but not validated as UTF-8 here since an
    /// unrecognized name is reported as a protocol error, not an encoding one).
    fn utf8_name(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

fn parse_connect_ack(cursor: &mut Cursor) -> Result<ConnectAck, Error> {
    let flags = ConnectAckFlags::from_bits(cursor.u8()?).ok_or(Error::MalformedBody)?;
    let return_code =
        ConnectReturnCode::try_from(cursor.u8()?).map_err(|_| Error::MalformedBody)?;

    Ok(ConnectAck {
        session_present: flags.contains(ConnectAckFlags::SESSION_PRESENT),
        return_code,
    })
}

fn parse_publish(packet_flags: u8, cursor: &mut Cursor) -> Result<Publish, Error> {
    let flags = PublishFlags::from_bits_truncate(packet_flags);
    let qos = flags.qos();
    let topic = cursor.utf8_str()?;
    let packet_id = if qos >= QoS::AtLeastOnce {
        Some(cursor.u16()?)
    } else {
        None
    };
    let payload = Bytes::copy_from_slice(cursor.take(cursor.remaining())?);

    Ok(Publish {
        dup: flags.contains(PublishFlags::DUP),
        qos,
        retain: flags.contains(PublishFlags::RETAIN),
        topic,
        packet_id,
        payload,
    })
}

fn parse_subscribe(cursor: &mut Cursor) -> Result<Subscribe, Error> {
    let packet_id = cursor.u16()?;
    let mut subscriptions = Vec::new();

    while cursor.remaining() > 0 {
        let topic_filter = cursor.utf8_str()?;
        let qos = QoS::try_from(cursor.u8()? & 0x03).map_err(|_| Error::MalformedBody)?;
        subscriptions.push((topic_filter, qos));
    }

    if subscriptions.is_empty() {
        return Err(Error::EmptyTopicFilterList);
    }

    Ok(Subscribe {
        packet_id,
        subscriptions,
    })
}

fn parse_subscribe_ack(cursor: &mut Cursor) -> Result<SubscribeAck, Error> {
    let packet_id = cursor.u16()?;
    let mut status = Vec::new();

    while cursor.remaining() > 0 {
        let code = cursor.u8()?;
        status.push(if code & SubscribeReturnCode::FAILURE == 0 {
            SubscribeReturnCode::Success(
                QoS::try_from(code & 0x03).map_err(|_| Error::MalformedBody)?,
            )
        } else {
            SubscribeReturnCode::Failure
        });
    }

    Ok(SubscribeAck { packet_id, status })
}

fn parse_unsubscribe(cursor: &mut Cursor) -> Result<Unsubscribe, Error> {
    let packet_id = cursor.u16()?;
    let mut topic_filters = Vec::new();

    while cursor.remaining() > 0 {
        topic_filters.push(cursor.utf8_str()?);
    }

    if topic_filters.is_empty() {
        return Err(Error::EmptyTopicFilterList);
    }

    Ok(Unsubscribe {
        packet_id,
        topic_filters,
    })
}

/// Parses one Control Packet from the front of `input`.
///
/// Returns `Ok(None)` when `input` does not yet contain a complete packet (the caller should read
/// more bytes and try again); returns `Ok(Some((packet, consumed)))` on success, where `consumed`
/// is the number of bytes the caller should drop from its buffer.
pub fn parse(input: &[u8]) -> Result<Option<(Packet, usize)>, Error> {
    let (fixed, header_len) = match peek_fixed_header(input)? {
        Header::Incomplete => return Ok(None),
        Header::Found { fixed, header_len } => (fixed, header_len),
    };

    let total_len = header_len + fixed.remaining_length;
    if input.len() < total_len {
        return Ok(None);
    }

    let body = &input[header_len..total_len];
    let packet = parse_body(&fixed, body)?;

    Ok(Some((packet, total_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_length() {
        assert_eq!(variable_length(b"\x00"), Ok((&b""[..], 0)));
        assert_eq!(variable_length(b"\x7f"), Ok((&b""[..], 127)));
        assert_eq!(variable_length(b"\x80\x01"), Ok((&b""[..], 128)));
        assert_eq!(variable_length(b"\xff\x7f"), Ok((&b""[..], 16383)));
        assert_eq!(variable_length(b"\xff\xff\xff\x7f"), Ok((&b""[..], 268435455)));
    }

    #[test]
    fn test_incomplete() {
        assert!(matches!(parse(b"\x20"), Ok(None)));
        assert!(matches!(parse(b"\x20\x02\x00"), Ok(None)));
    }

    #[test]
    fn test_connect() {
        let (packet, consumed) = parse(
            b"\x10\x1e\x00\x04MQTT\x04\xC0\x00\x3C\x00\x0512345\x00\x04user\x00\x04pass",
        )
        .unwrap()
        .unwrap();

        assert_eq!(consumed, 32);
        assert_eq!(
            packet,
            Packet::Connect(Connect {
                protocol_version: ProtocolVersion::V311,
                clean_session: false,
                keep_alive: 60,
                client_id: "12345".to_owned(),
                last_will: None,
                username: Some("user".to_owned()),
                password: Some(Bytes::from_static(b"pass")),
            })
        );
    }

    #[test]
    fn test_connect_v310() {
        let (packet, _) = parse(b"\x10\x0C\x00\x06MQIsdp\x03\x00\x00\x3c\x00\x00")
            .unwrap()
            .unwrap();

        assert_eq!(
            packet,
            Packet::Connect(Connect {
                protocol_version: ProtocolVersion::V310,
                clean_session: false,
                keep_alive: 60,
                client_id: String::new(),
                last_will: None,
                username: None,
                password: None,
            })
        );
    }

    #[test]
    fn test_publish() {
        let (packet, _) = parse(b"\x3d\x0D\x00\x05topic\x43\x21data")
            .unwrap()
            .unwrap();

        assert_eq!(
            packet,
            Packet::Publish(Publish {
                dup: true,
                retain: true,
                qos: QoS::ExactlyOnce,
                topic: "topic".to_owned(),
                packet_id: Some(0x4321),
                payload: Bytes::from_static(b"data"),
            })
        );
    }

    #[test]
    fn test_disconnect() {
        assert_eq!(parse(b"\xe0\x00").unwrap().unwrap().0, Packet::Disconnect);
    }

    #[test]
    fn test_ping_pong() {
        assert_eq!(parse(b"\xc0\x00").unwrap().unwrap().0, Packet::PingReq);
        assert_eq!(parse(b"\xd0\x00").unwrap().unwrap().0, Packet::PingResp);
    }

    #[test]
    fn test_subscribe_requires_topic() {
        assert!(matches!(
            parse(b"\x82\x02\x12\x34"),
            Err(Error::EmptyTopicFilterList)
        ));
    }

    #[test]
    fn test_connect_ack() {
        let (packet, _) = parse(b"\x20\x02\x01\x04").unwrap().unwrap();

        assert_eq!(
            packet,
            Packet::ConnectAck(ConnectAck {
                session_present: true,
                return_code: ConnectReturnCode::BadUserNameOrPassword,
            })
        );
    }
}
