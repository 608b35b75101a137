#![feature(test)]

extern crate test;

use test::Bencher;

use bytes::Bytes;
use mqtt_core::{
    Connect, LastWill, Packet, ProtocolVersion, Publish, QoS, Subscribe, SubscribeAck,
    SubscribeReturnCode, Unsubscribe,
};

#[bench]
fn bench_encode_connect_packets(b: &mut Bencher) {
    let p = Packet::Connect(Connect {
        protocol_version: ProtocolVersion::V311,
        clean_session: false,
        keep_alive: 60,
        client_id: "12345".to_owned(),
        last_will: Some(LastWill {
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: "topic".to_owned(),
            message: Bytes::from_static(b"message"),
        }),
        username: None,
        password: None,
    });

    b.iter(|| mqtt_core::encode(&p).unwrap());
}

#[bench]
fn bench_encode_publish_packets(b: &mut Bencher) {
    let p = Packet::Publish(Publish {
        dup: true,
        retain: true,
        qos: QoS::ExactlyOnce,
        topic: "topic".to_owned(),
        packet_id: Some(0x4321),
        payload: Bytes::from_static(b"data"),
    });

    b.iter(|| mqtt_core::encode(&p).unwrap());
}

#[bench]
fn bench_encode_subscribe_packets(b: &mut Bencher) {
    let p = Packet::Subscribe(Subscribe {
        packet_id: 0x1234,
        subscriptions: vec![
            ("test".to_owned(), QoS::AtLeastOnce),
            ("filter".to_owned(), QoS::ExactlyOnce),
        ],
    });

    b.iter(|| mqtt_core::encode(&p).unwrap());
}

#[bench]
fn bench_encode_subscribe_ack_packets(b: &mut Bencher) {
    let p = Packet::SubscribeAck(SubscribeAck {
        packet_id: 0x1234,
        status: vec![
            SubscribeReturnCode::Success(QoS::AtLeastOnce),
            SubscribeReturnCode::Failure,
            SubscribeReturnCode::Success(QoS::ExactlyOnce),
        ],
    });

    b.iter(|| mqtt_core::encode(&p).unwrap());
}

#[bench]
fn bench_encode_unsubscribe_packets(b: &mut Bencher) {
    let p = Packet::Unsubscribe(Unsubscribe {
        packet_id: 0x1234,
        topic_filters: vec!["test".to_owned(), "filter".to_owned()],
    });

    b.iter(|| mqtt_core::encode(&p).unwrap());
}
