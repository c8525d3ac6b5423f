//! Property-based tests using proptest
//!
//! These tests check the BTP frame and ILP packet codecs across randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use btp_server::core::frame::{BtpError, ContentType, Frame, FrameBody, ProtocolData};
use btp_server::core::packet::{ErrorCode, Fulfill, Packet, Prepare, Reject};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn content_type() -> impl Strategy<Value = ContentType> {
    prop_oneof![
        Just(ContentType::OctetStream),
        Just(ContentType::TextPlainUtf8),
        Just(ContentType::ApplicationJson),
    ]
}

fn protocol_data() -> impl Strategy<Value = Vec<ProtocolData>> {
    prop::collection::vec(
        ("[a-z_]{1,16}", content_type(), prop::collection::vec(any::<u8>(), 0..300)).prop_map(
            |(name, content_type, data)| ProtocolData::new(name, content_type, data),
        ),
        0..6,
    )
}

fn btp_error() -> impl Strategy<Value = BtpError> {
    (
        "[FTR][0-9]{2}",
        "[A-Za-z]{1,24}",
        prop::collection::vec(any::<u8>(), 0..200),
        protocol_data(),
    )
        .prop_map(|(code, name, data, protocol_data)| BtpError {
            code,
            name,
            triggered_at: "20300607204842.483Z".to_string(),
            data,
            protocol_data,
        })
}

fn frame() -> impl Strategy<Value = Frame> {
    let body = prop_oneof![
        protocol_data().prop_map(FrameBody::Message),
        protocol_data().prop_map(FrameBody::Response),
        btp_error().prop_map(FrameBody::Error),
        (any::<u64>(), protocol_data()).prop_map(|(amount, protocol_data)| FrameBody::Transfer {
            amount,
            protocol_data
        }),
    ];
    (any::<u32>(), body).prop_map(|(request_id, body)| Frame { request_id, body })
}

fn packet() -> impl Strategy<Value = Packet> {
    let prepare = (
        any::<u64>(),
        0i64..4_000_000_000_000,
        any::<[u8; 32]>(),
        "(g|test|example)(\\.[a-z0-9_~-]{1,12}){1,4}",
        prop::collection::vec(any::<u8>(), 0..500),
    )
        .prop_map(|(amount, millis, execution_condition, destination, data)| {
            Packet::Prepare(Prepare {
                amount,
                expires_at: Utc.timestamp_millis_opt(millis).unwrap(),
                execution_condition,
                destination,
                data,
            })
        });
    let fulfill = (any::<[u8; 32]>(), prop::collection::vec(any::<u8>(), 0..500))
        .prop_map(|(fulfillment, data)| Packet::Fulfill(Fulfill { fulfillment, data }));
    let reject = (
        "[FTR][0-9]{2}",
        "(test\\.[a-z]{1,8})?",
        ".{0,40}",
        prop::collection::vec(any::<u8>(), 0..200),
    )
        .prop_map(|(code, triggered_by, message, data)| {
            Packet::Reject(Reject {
                code: code.parse::<ErrorCode>().unwrap(),
                triggered_by,
                message,
                data,
            })
        });
    prop_oneof![prepare, fulfill, reject]
}

// Property: any frame survives encode then decode
proptest! {
    #[test]
    fn prop_frame_roundtrip(frame in frame()) {
        let decoded = Frame::from_bytes(&frame.to_bytes()).expect("Decoding should not fail");
        prop_assert_eq!(decoded, frame);
    }
}

// Property: any packet survives encode then decode
proptest! {
    #[test]
    fn prop_packet_roundtrip(packet in packet()) {
        let decoded = Packet::from_bytes(&packet.to_bytes()).expect("Decoding should not fail");
        prop_assert_eq!(decoded, packet);
    }
}

// Property: the frame decoder never panics on arbitrary input
proptest! {
    #[test]
    fn prop_frame_decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = Frame::from_bytes(&data);
    }
}

// Property: the packet decoder never panics on arbitrary input
proptest! {
    #[test]
    fn prop_packet_decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = Packet::from_bytes(&data);
    }
}

// Property: truncating a valid frame always fails to decode
proptest! {
    #[test]
    fn prop_truncated_frame_rejected(frame in frame(), cut in 1usize..64) {
        let bytes = frame.to_bytes();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(Frame::from_bytes(&bytes[..keep]).is_err());
    }
}
