#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use btp_server::core::frame::{Frame, ProtocolData, PROTOCOL_ILP};
use btp_server::protocol::correlator::{CallCorrelator, CallError};
use btp_server::transport::connection::{Connection, Outbound};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_calls_resolve_out_of_order() {
    let calls = 200usize;
    let correlator = CallCorrelator::new(Duration::from_secs(10));
    let (tx, mut rx) = mpsc::channel(calls);
    let conn = Arc::new(Connection::new(tx, None));

    let mut tasks = JoinSet::new();
    for i in 0..calls {
        let correlator = correlator.clone();
        let conn = conn.clone();
        tasks.spawn(async move {
            let tag = (i as u32).to_be_bytes().to_vec();
            let frame = Frame::message(0, vec![ProtocolData::octets(PROTOCOL_ILP, tag.clone())]);
            let reply = correlator.call(&conn, frame).await.unwrap();
            // Each caller must get the reply built from its own request
            assert_eq!(reply[0].data, tag);
        });
    }

    let mut sent = Vec::with_capacity(calls);
    for _ in 0..calls {
        match rx.recv().await {
            Some(Outbound::Frame(frame)) => sent.push(frame),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    let unique: HashMap<u32, ()> = sent.iter().map(|f| (f.request_id, ())).collect();
    assert_eq!(unique.len(), calls, "request IDs must be unique while pending");

    // Answer in reverse order of sending
    for frame in sent.into_iter().rev() {
        let tag = frame.find_protocol(PROTOCOL_ILP).unwrap().data.clone();
        let reply = Frame::response(frame.request_id, vec![ProtocolData::octets(PROTOCOL_ILP, tag)]);
        assert!(correlator.resolve(conn.id(), reply).await);
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert_eq!(correlator.pending_total().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disconnect_fails_only_that_connections_calls() {
    let correlator = CallCorrelator::new(Duration::from_secs(10));
    let (tx_a, mut rx_a) = mpsc::channel(16);
    let (tx_b, mut rx_b) = mpsc::channel(16);
    let conn_a = Arc::new(Connection::new(tx_a, None));
    let conn_b = Arc::new(Connection::new(tx_b, None));

    let call_a = {
        let correlator = correlator.clone();
        let conn = conn_a.clone();
        tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
    };
    let call_b = {
        let correlator = correlator.clone();
        let conn = conn_b.clone();
        tokio::spawn(async move { correlator.call(&conn, Frame::message(0, vec![])).await })
    };

    let Some(Outbound::Frame(_)) = rx_a.recv().await else {
        panic!("expected frame on a");
    };
    let Some(Outbound::Frame(sent_b)) = rx_b.recv().await else {
        panic!("expected frame on b");
    };

    assert_eq!(correlator.cancel_connection(conn_a.id()).await, 1);
    assert_eq!(call_a.await.unwrap(), Err(CallError::Disconnected));

    // Cancelling again and late responses are no-ops
    assert_eq!(correlator.cancel_connection(conn_a.id()).await, 0);
    assert!(
        correlator
            .resolve(conn_b.id(), Frame::response(sent_b.request_id, vec![]))
            .await
    );
    assert!(
        !correlator
            .resolve(conn_b.id(), Frame::response(sent_b.request_id, vec![]))
            .await
    );
    assert_eq!(call_b.await.unwrap(), Ok(vec![]));
}
