#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the wire codecs, the dispatcher and the registry.
//! Tests boundary conditions and malformed input.

use std::sync::Arc;

use btp_server::core::frame::{BtpError, ContentType, Frame, FrameBody, ProtocolData};
use btp_server::core::packet::{ErrorCode, Packet, Reject};
use btp_server::error::PluginError;
use btp_server::protocol::dispatcher::Dispatcher;
use btp_server::transport::connection::Connection;
use btp_server::transport::registry::ConnectionRegistry;
use tokio::sync::mpsc;

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_frame_empty_protocol_data() {
    let frame = Frame::message(0, vec![]);
    let bytes = frame.to_bytes();
    // type, request id, contents length, var-uint count (length 1, value 0)
    assert_eq!(bytes, vec![6, 0, 0, 0, 0, 2, 1, 0]);
    assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
}

#[test]
fn test_frame_long_form_length_prefix() {
    let data = vec![0xAB; 70_000];
    let frame = Frame::response(u32::MAX, vec![ProtocolData::octets("big", data.clone())]);
    let decoded = Frame::from_bytes(&frame.to_bytes()).expect("Should decode large frame");
    assert_eq!(decoded.request_id, u32::MAX);
    assert_eq!(decoded.find_protocol("big").unwrap().data.len(), data.len());
}

#[test]
fn test_frame_empty_buffer() {
    assert!(matches!(
        Frame::from_bytes(&[]),
        Err(PluginError::DeserializeError(_))
    ));
}

#[test]
fn test_frame_unknown_type() {
    assert!(matches!(
        Frame::from_bytes(&[3, 0, 0, 0, 1, 2, 1, 0]),
        Err(PluginError::UnknownFrameType(3))
    ));
}

#[test]
fn test_frame_trailing_bytes_rejected() {
    let mut bytes = Frame::message(1, vec![]).to_bytes();
    bytes.push(0);
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_length_claim_beyond_input() {
    // Contents claim 0x7fff bytes but only a handful follow
    let bytes = [6, 0, 0, 0, 1, 0x82, 0x7f, 0xff, 1, 0];
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_oversized_length_of_length() {
    let bytes = [6, 0, 0, 0, 1, 0x89, 1, 1, 1, 1, 1, 1, 1, 1, 1];
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_indefinite_length_rejected() {
    let bytes = [6, 0, 0, 0, 1, 0x80];
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_huge_entry_count_rejected() {
    // Count of 2^32 entries with nothing behind it
    let bytes = [6, 0, 0, 0, 1, 6, 5, 1, 0, 0, 0, 0];
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_unknown_content_type() {
    let mut bytes = Frame::message(1, vec![ProtocolData::octets("x", vec![])]).to_bytes();
    // Content type byte sits after the 1-byte name
    let idx = bytes.len() - 2;
    bytes[idx] = 9;
    assert!(Frame::from_bytes(&bytes).is_err());
}

#[test]
fn test_frame_text_content_type_preserved() {
    let frame = Frame::message(
        1,
        vec![ProtocolData::new("json", ContentType::ApplicationJson, b"{}".to_vec())],
    );
    let decoded = Frame::from_bytes(&frame.to_bytes()).unwrap();
    assert_eq!(
        decoded.find_protocol("json").unwrap().content_type,
        ContentType::ApplicationJson
    );
}

#[test]
fn test_error_frame_fields() {
    let err = BtpError::new("T00", "UnreachableError", "nobody home");
    let frame = Frame::error(12, err.clone());
    match Frame::from_bytes(&frame.to_bytes()).unwrap().body {
        FrameBody::Error(decoded) => {
            assert_eq!(decoded, err);
            assert_eq!(decoded.triggered_at.len(), 19);
            assert!(decoded.triggered_at.ends_with('Z'));
        }
        other => panic!("expected ERROR, got {other:?}"),
    }
}

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_packet_unknown_type() {
    assert!(matches!(
        Packet::from_bytes(&[99, 0]),
        Err(PluginError::UnknownPacketType(99))
    ));
}

#[test]
fn test_reject_with_empty_fields() {
    let packet = Packet::Reject(Reject {
        code: ErrorCode::T00InternalError,
        triggered_by: String::new(),
        message: String::new(),
        data: vec![],
    });
    assert_eq!(Packet::from_bytes(&packet.to_bytes()).unwrap(), packet);
}

#[test]
fn test_reject_with_bad_code() {
    let mut bytes = Packet::Reject(Reject {
        code: ErrorCode::F00BadRequest,
        triggered_by: String::new(),
        message: String::new(),
        data: vec![],
    })
    .to_bytes();
    bytes[2] = b'X';
    assert!(Packet::from_bytes(&bytes).is_err());
}

#[test]
fn test_prepare_with_bad_expiry() {
    let mut bytes = vec![12, 0];
    let mut contents = vec![0u8; 8];
    contents.extend_from_slice(b"2030130120484248X");
    contents.extend_from_slice(&[0u8; 32]);
    contents.extend_from_slice(&[12]);
    contents.extend_from_slice(b"test.example");
    contents.push(0);
    bytes[1] = contents.len() as u8;
    bytes.extend_from_slice(&contents);
    assert!(Packet::from_bytes(&bytes).is_err());
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

#[test]
fn test_dispatcher_concurrent_registration() {
    let dispatcher = Arc::new(Dispatcher::new());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = dispatcher.clone();
            std::thread::spawn(move || {
                dispatcher
                    .register(&format!("proto{i}"), |_, _| Ok(vec![]))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for i in 0..8 {
        assert!(dispatcher.is_registered(&format!("proto{i}")));
    }
}

#[test]
fn test_dispatcher_replaces_handler() {
    let dispatcher = Dispatcher::new();
    dispatcher
        .register("p", |_, _| Ok(vec![ProtocolData::text("p", "old")]))
        .unwrap();
    dispatcher
        .register("p", |_, _| Ok(vec![ProtocolData::text("p", "new")]))
        .unwrap();
    let reply = dispatcher
        .dispatch("a", &[ProtocolData::text("p", "")])
        .unwrap()
        .unwrap();
    assert_eq!(reply[0].data, b"new".to_vec());
}

// ============================================================================
// REGISTRY EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_registry_unauthenticated_connection_is_not_routable() {
    let registry = ConnectionRegistry::new();
    let (tx, _rx) = mpsc::channel(1);
    let conn = Arc::new(Connection::new(tx, None));
    registry.insert(conn.clone()).await;

    assert_eq!(registry.len().await, 1);
    assert!(registry.connections_for("anyone").await.is_empty());
    assert_eq!(registry.stats().await.routable_accounts, 0);

    registry.remove(conn.id()).await;
    registry.remove(conn.id()).await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_registry_bind_after_remove_fails() {
    let registry = ConnectionRegistry::new();
    let (tx, _rx) = mpsc::channel(1);
    let conn = Arc::new(Connection::new(tx, None));
    registry.insert(conn.clone()).await;
    registry.remove(conn.id()).await;

    assert!(!registry.bind("alice", conn.id()).await);
    assert!(registry.route("alice").await.is_none());
}
